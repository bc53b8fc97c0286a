//! Transport backed by the `webrtc` crate
//!
//! Enabled with the `webrtc` feature. Each [`WebRtcConnector::connect`]
//! builds one `RTCPeerConnection` with the default codecs and interceptors
//! and bridges its callbacks onto [`TransportEvent`]s.

use crate::config::IceServer;
use crate::error::{Error, Result};
use crate::media::{MediaStream, TrackKind};
use crate::peer::{
    ConnectionParams, ConnectionState, Connector, DescriptionOptions, IceCandidate,
    IceGatheringState, Transport, TransportEvent, TransportEventHandler,
};
use crate::sdp::{SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let converted = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(Error::negotiation(
                "description",
                "rollback is not supported by this transport",
            ))
        }
    };
    converted.map_err(|e| Error::validation(format!("invalid session description: {}", e)))
}

fn from_rtc(description: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn from_rtc_candidate(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    match candidate.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }),
        Err(e) => {
            warn!(error = %e, "could not serialise local candidate");
            None
        }
    }
}

/// Allocates `RTCPeerConnection`s
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    /// New connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebRtcConnector {
    async fn connect(
        &self,
        params: ConnectionParams,
        handler: TransportEventHandler,
    ) -> Result<Arc<dyn Transport>> {
        let unavailable = |e: webrtc::Error| Error::transport_unavailable(e.to_string());

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(unavailable)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(unavailable)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        if !params.constraints.optional.is_empty() || !params.constraints.mandatory.is_empty() {
            debug!(constraints = ?params.constraints, "transport constraints are not applied by this backend");
        }
        let configuration = RTCConfiguration {
            ice_servers: params.ice_servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };
        let connection = Arc::new(
            api.new_peer_connection(configuration)
                .await
                .map_err(unavailable)?,
        );
        register_callbacks(&connection, handler);
        info!(servers = params.ice_servers.len(), "peer connection allocated");

        Ok(Arc::new(WebRtcTransport { connection }))
    }
}

fn register_callbacks(connection: &RTCPeerConnection, handler: TransportEventHandler) {
    let on_candidate = handler.clone();
    connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let handler = on_candidate.clone();
        Box::pin(async move {
            match candidate {
                Some(candidate) => {
                    if let Some(candidate) = from_rtc_candidate(&candidate) {
                        handler(TransportEvent::IceCandidate(Some(candidate)));
                    }
                }
                None => handler(TransportEvent::IceCandidate(None)),
            }
        })
    }));

    let on_gathering = handler.clone();
    connection.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        let handler = on_gathering.clone();
        Box::pin(async move {
            let state = match state {
                RTCIceGathererState::New => IceGatheringState::New,
                RTCIceGathererState::Gathering => IceGatheringState::Gathering,
                RTCIceGathererState::Complete => IceGatheringState::Complete,
                _ => return,
            };
            handler(TransportEvent::IceGatheringStateChange(state));
        })
    }));

    let on_state = handler.clone();
    connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let handler = on_state.clone();
        Box::pin(async move {
            let state = match state {
                RTCPeerConnectionState::New => ConnectionState::New,
                RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                RTCPeerConnectionState::Connected => ConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => ConnectionState::Failed,
                RTCPeerConnectionState::Closed => ConnectionState::Closed,
                RTCPeerConnectionState::Unspecified => return,
            };
            handler(TransportEvent::ConnectionStateChange(state));
        })
    }));

    // one remote stream per stream id, reported on its first track
    let seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    connection.on_track(Box::new(move |track, _receiver, _transceiver| {
        let handler = handler.clone();
        let seen = seen.clone();
        Box::pin(async move {
            let stream_id = track.stream_id();
            if !seen.lock().insert(stream_id.clone()) {
                return;
            }
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            handler(TransportEvent::RemoteStream(
                MediaStream::new(stream_id).with_track(kind),
            ));
        })
    }));
}

/// [`Transport`] over one `RTCPeerConnection`
pub struct WebRtcTransport {
    connection: Arc<RTCPeerConnection>,
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("state", &self.connection.connection_state())
            .finish()
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_offer(&self, options: &DescriptionOptions) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            voice_activity_detection: options.voice_activity_detection,
            ice_restart: options.ice_restart,
        };
        let offer = self
            .connection
            .create_offer(Some(options))
            .await
            .map_err(|e| Error::negotiation("create offer", e.to_string()))?;
        from_rtc(offer).ok_or_else(|| Error::negotiation("create offer", "untyped description"))
    }

    async fn create_answer(&self, options: &DescriptionOptions) -> Result<SessionDescription> {
        let options = RTCAnswerOptions {
            voice_activity_detection: options.voice_activity_detection,
        };
        let answer = self
            .connection
            .create_answer(Some(options))
            .await
            .map_err(|e| Error::negotiation("create answer", e.to_string()))?;
        from_rtc(answer).ok_or_else(|| Error::negotiation("create answer", "untyped description"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc(description)?;
        self.connection
            .set_local_description(description)
            .await
            .map_err(|e| Error::negotiation("set local description", e.to_string()))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc(description)?;
        self.connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::negotiation("set remote description", e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::negotiation("add ice candidate", e.to_string()))
    }

    async fn add_stream(&self, stream: &MediaStream) -> Result<()> {
        for track in stream.tracks.iter().filter(|track| track.enabled) {
            let kind = match track.kind {
                TrackKind::Audio => RTPCodecType::Audio,
                TrackKind::Video => RTPCodecType::Video,
            };
            self.connection
                .add_transceiver_from_kind(kind, None)
                .await
                .map_err(|e| Error::negotiation("add stream", e.to_string()))?;
        }
        debug!(stream = %stream.id, tracks = stream.tracks.len(), "transceivers added");
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.connection
            .local_description()
            .await
            .and_then(from_rtc)
    }

    async fn close(&self) -> Result<()> {
        self.connection
            .close()
            .await
            .map_err(|e| Error::negotiation("close", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_server_mapping() {
        let server = rtc_ice_server(&IceServer::turn("turn:turn.example.org", "user", "secret"));
        assert_eq!(server.urls, vec!["turn:turn.example.org"]);
        assert_eq!(server.username, "user");
        assert_eq!(server.credential, "secret");
    }

    #[test]
    fn test_rollback_is_rejected() {
        let rollback = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(to_rtc(rollback).is_err());
    }

    #[tokio::test]
    async fn test_offer_from_real_connection() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handler: TransportEventHandler = Arc::new(move |event| sink.lock().push(event));
        let transport = WebRtcConnector::new()
            .connect(ConnectionParams::default(), handler)
            .await
            .unwrap();
        let stream = MediaStream::new("local").with_track(TrackKind::Audio);
        transport.add_stream(&stream).await.unwrap();

        let offer = transport
            .create_offer(&DescriptionOptions::default())
            .await
            .unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        transport.close().await.unwrap();
    }
}
