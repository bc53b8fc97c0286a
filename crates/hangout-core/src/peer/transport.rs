//! Connection primitive consumed by a peer
//!
//! A [`Connector`] allocates a [`Transport`] from ICE servers and
//! constraints. The transport performs the actual offer/answer, description
//! and candidate work, and reports asynchronous happenings through the
//! [`TransportEventHandler`] it was given at allocation.

use crate::config::{IceServer, TransportConstraints};
use crate::error::Result;
use crate::media::MediaStream;
use crate::sdp::SessionDescription;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// ICE candidate, forwarded verbatim between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute value (`candidate:...`)
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate for the first media section
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// SDP attribute line carrying this candidate
    pub fn to_sdp_line(&self) -> String {
        format!("a={}", self.candidate)
    }
}

/// ICE gathering progress reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// Nothing gathered yet
    New,
    /// Candidates are being gathered
    Gathering,
    /// Gathering finished
    Complete,
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IceGatheringState::New => write!(f, "new"),
            IceGatheringState::Gathering => write!(f, "gathering"),
            IceGatheringState::Complete => write!(f, "complete"),
        }
    }
}

/// Connectivity reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not started
    New,
    /// Checks in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity failed
    Failed,
    /// Transport closed
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Asynchronous transport callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Remote side added a stream
    RemoteStream(MediaStream),
    /// A local candidate was gathered; `None` marks the end of candidates
    IceCandidate(Option<IceCandidate>),
    /// Gathering state changed
    IceGatheringStateChange(IceGatheringState),
    /// Connection state changed
    ConnectionStateChange(ConnectionState),
}

/// Receiver of transport callbacks
pub type TransportEventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Parameters used to allocate a transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    /// ICE servers
    pub ice_servers: Vec<IceServer>,
    /// Transport constraints
    pub constraints: TransportConstraints,
}

/// Options for offer or answer creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionOptions {
    /// Restart ICE with fresh credentials
    #[serde(default)]
    pub ice_restart: bool,
    /// Enable voice activity detection
    #[serde(default = "default_vad")]
    pub voice_activity_detection: bool,
}

fn default_vad() -> bool {
    true
}

impl Default for DescriptionOptions {
    fn default() -> Self {
        Self {
            ice_restart: false,
            voice_activity_detection: true,
        }
    }
}

/// Allocates transports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Allocate a transport reporting to `handler`.
    ///
    /// Fails with [`Error::TransportUnavailable`](crate::Error::TransportUnavailable)
    /// when no connection primitive can be created.
    async fn connect(
        &self,
        params: ConnectionParams,
        handler: TransportEventHandler,
    ) -> Result<Arc<dyn Transport>>;
}

/// Network/ICE transport exclusively owned by one peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create an offer
    async fn create_offer(&self, options: &DescriptionOptions) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self, options: &DescriptionOptions) -> Result<SessionDescription>;

    /// Commit the local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Commit the remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Add a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach an outbound stream
    async fn add_stream(&self, stream: &MediaStream) -> Result<()>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Release the transport
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_json_shape() {
        let candidate = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host");
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json.get("usernameFragment").is_none());

        let back: IceCandidate = serde_json::from_value(json).unwrap();
        assert_eq!(back, candidate);
        assert!(candidate.to_sdp_line().starts_with("a=candidate:1"));
    }

    #[test]
    fn test_description_options_default() {
        let options: DescriptionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, DescriptionOptions::default());
        assert!(options.voice_activity_detection);
    }
}
