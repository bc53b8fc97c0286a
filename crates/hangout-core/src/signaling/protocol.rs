//! Master/slave negotiation over a relay
//!
//! A [`Signaler`] joins a room and lets the relay decide roles. The endpoint
//! that learns somebody joined (`slave` notice) becomes master and offers;
//! the endpoint receiving the master's offer becomes slave and answers.
//!
//! In non-trickle mode each side sends exactly one description, once its
//! gathering finished, with every candidate embedded. In trickle mode the
//! description goes out as soon as it is committed and candidates follow
//! one by one; inbound candidates that precede the remote description are
//! held until it is applied.

use super::message::SignalMessage;
use super::relay::{Inbox, Relay};
use crate::config::{NegotiationMode, SignalingConfig};
use crate::error::Result;
use crate::events::ListenerId;
use crate::media::Media;
use crate::peer::{
    DescriptionRequest, IceCandidate, NegotiationState, Peer, PeerEvent, PeerTopic, Role,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::logging::task_span;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug)]
enum Outbound {
    Send(SignalMessage),
    LocalDescription,
}

/// Drives one peer through the relay handshake
pub struct Signaler {
    peer: Peer,
    relay: Arc<dyn Relay>,
    config: SignalingConfig,
    media: Option<Media>,
}

impl std::fmt::Debug for Signaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signaler")
            .field("peer", &self.peer.id())
            .field("config", &self.config)
            .finish()
    }
}

impl Signaler {
    /// Signaler for `peer` talking through `relay`
    pub fn new(peer: Peer, relay: Arc<dyn Relay>, config: SignalingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            peer,
            relay,
            config,
            media: None,
        })
    }

    /// Send the stream captured by `media`
    pub fn with_media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }

    /// Create the peer if needed, join the room and process `inbox` until it
    /// closes or the returned handle is stopped.
    pub async fn start(self, inbox: Inbox) -> Result<SignalingHandle> {
        let Signaler {
            peer,
            relay,
            config,
            media,
        } = self;

        if let Some(media) = media {
            peer.attach_media(media).await?;
        }
        if peer.state() == NegotiationState::Idle {
            peer.create().await?;
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let listeners = match config.mode {
            NegotiationMode::NonTrickle => {
                let tx = out_tx.clone();
                vec![peer.once(PeerTopic::Ready, move |_| {
                    let _ = tx.send(Outbound::LocalDescription);
                })]
            }
            NegotiationMode::Trickle => trickle_listeners(&peer, &out_tx),
        };

        let outbound = tokio::spawn(
            send_loop(peer.clone(), relay, out_rx).instrument(task_span(peer.id(), "outbound")),
        );
        let inbound = tokio::spawn(
            receive_loop(peer.clone(), config.mode, inbox)
                .instrument(task_span(peer.id(), "inbound")),
        );

        info!(peer = %peer.id(), room = %config.room, mode = %config.mode, "joining room");
        let _ = out_tx.send(Outbound::Send(SignalMessage::Join(config.room.clone())));

        Ok(SignalingHandle {
            peer,
            listeners,
            outbound,
            inbound,
        })
    }
}

fn trickle_listeners(peer: &Peer, out_tx: &mpsc::UnboundedSender<Outbound>) -> Vec<ListenerId> {
    [PeerTopic::Candidate, PeerTopic::Offer, PeerTopic::Answer]
        .into_iter()
        .map(|topic| {
            let tx = out_tx.clone();
            peer.on(topic, move |event| {
                let message = match event {
                    PeerEvent::Candidate(candidate) => SignalMessage::Candidate(candidate.clone()),
                    PeerEvent::Offer(description) => {
                        SignalMessage::MasterOffer(description.clone())
                    }
                    PeerEvent::Answer(description) => {
                        SignalMessage::SlaveOffer(description.clone())
                    }
                    _ => return,
                };
                let _ = tx.send(Outbound::Send(message));
            })
        })
        .collect()
}

async fn send_loop(peer: Peer, relay: Arc<dyn Relay>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        let message = match outbound {
            Outbound::Send(message) => message,
            Outbound::LocalDescription => {
                let Some(description) = peer.local_description().await else {
                    warn!(peer = %peer.id(), "ready without a local description");
                    continue;
                };
                match peer.role() {
                    Role::Master => SignalMessage::MasterOffer(description),
                    Role::Slave => SignalMessage::SlaveOffer(description),
                    Role::Undetermined => {
                        warn!(peer = %peer.id(), "ready before a role was assigned");
                        continue;
                    }
                }
            }
        };
        debug!(peer = %peer.id(), event = message.event(), "sending");
        if let Err(e) = relay.send(message).await {
            error!(peer = %peer.id(), error = %e, "relay send failed");
        }
    }
}

async fn receive_loop(peer: Peer, mode: NegotiationMode, mut inbox: Inbox) {
    let mut held: Vec<IceCandidate> = Vec::new();
    while let Some(message) = inbox.recv().await {
        debug!(peer = %peer.id(), event = message.event(), "received");
        if let Err(e) = handle(&peer, mode, message, &mut held).await {
            warn!(peer = %peer.id(), error = %e, "could not handle relay message");
        }
    }
    debug!(peer = %peer.id(), "relay inbox closed");
}

async fn handle(
    peer: &Peer,
    mode: NegotiationMode,
    message: SignalMessage,
    held: &mut Vec<IceCandidate>,
) -> Result<()> {
    match message {
        SignalMessage::Master => {
            peer.set_role(Role::Master);
            info!(peer = %peer.id(), "waiting for somebody to join");
        }
        SignalMessage::Slave => {
            peer.set_role(Role::Master);
            peer.offer(DescriptionRequest::new()).await?;
        }
        SignalMessage::MasterOffer(description) => {
            peer.set_role(Role::Slave);
            if peer.remote(description).await? {
                flush(peer, held).await?;
                peer.answer(DescriptionRequest::new()).await?;
            }
        }
        SignalMessage::SlaveOffer(description) => {
            if peer.remote(description).await? {
                flush(peer, held).await?;
            }
        }
        SignalMessage::Candidate(candidate) => match mode {
            NegotiationMode::NonTrickle => {
                debug!(peer = %peer.id(), "ignoring trickled candidate");
            }
            NegotiationMode::Trickle if peer.has_remote_description() => {
                peer.ice(candidate).await?;
            }
            NegotiationMode::Trickle => held.push(candidate),
        },
        SignalMessage::Join(room) => {
            warn!(peer = %peer.id(), %room, "unexpected join from relay");
        }
    }
    Ok(())
}

async fn flush(peer: &Peer, held: &mut Vec<IceCandidate>) -> Result<()> {
    for candidate in held.drain(..) {
        peer.ice(candidate).await?;
    }
    Ok(())
}

/// Running signaling session
pub struct SignalingHandle {
    peer: Peer,
    listeners: Vec<ListenerId>,
    outbound: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl std::fmt::Debug for SignalingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingHandle")
            .field("peer", &self.peer.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl SignalingHandle {
    /// The negotiated peer
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Whether the inbox closed
    pub fn is_finished(&self) -> bool {
        self.inbound.is_finished()
    }

    /// Stop processing relay traffic; the peer is left open
    pub fn stop(self) {
        for id in &self.listeners {
            self.peer.off(*id);
        }
        self.outbound.abort();
        self.inbound.abort();
    }

    /// Stop and close the peer
    pub async fn close(self) -> Result<()> {
        let peer = self.peer.clone();
        self.stop();
        peer.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::peer::scripted::ScriptedConnector;
    use crate::sdp::SdpType;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<SignalMessage>>,
    }

    #[async_trait]
    impl Relay for Recording {
        async fn send(&self, message: SignalMessage) -> Result<()> {
            self.sent.lock().push(message);
            Ok(())
        }
    }

    impl Recording {
        fn events(&self) -> Vec<&'static str> {
            self.sent.lock().iter().map(SignalMessage::event).collect()
        }
    }

    async fn until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn setup(
        mode: NegotiationMode,
    ) -> (Peer, Arc<ScriptedConnector>, Arc<Recording>, Signaler) {
        let connector = Arc::new(ScriptedConnector::new());
        let peer = Peer::with_config(PeerConfig::host_only(), connector.clone()).unwrap();
        let relay = Arc::new(Recording::default());
        let signaler = Signaler::new(
            peer.clone(),
            relay.clone(),
            SignalingConfig::new("room").with_mode(mode),
        )
        .unwrap();
        (peer, connector, relay, signaler)
    }

    #[tokio::test]
    async fn test_rejects_empty_room() {
        let connector = Arc::new(ScriptedConnector::new());
        let peer = Peer::new(connector);
        let relay = Arc::new(Recording::default());
        assert!(Signaler::new(peer, relay, SignalingConfig::new("")).is_err());
    }

    #[tokio::test]
    async fn test_joins_and_offers_once_ready() {
        let (peer, connector, relay, signaler) = setup(NegotiationMode::NonTrickle);
        let (tx, inbox) = mpsc::unbounded_channel();
        let handle = signaler.start(inbox).await.unwrap();
        until(|| relay.events() == vec!["join"]).await;

        tx.send(SignalMessage::Slave).unwrap();
        until(|| peer.state() == NegotiationState::LocalSet).await;
        assert_eq!(peer.role(), Role::Master);

        // nothing goes out before gathering finishes
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(relay.events(), vec!["join"]);

        connector.last().unwrap().complete_gathering();
        until(|| relay.events().len() == 2).await;
        assert_eq!(relay.events(), vec!["join", "master offer"]);
        handle.stop();
    }

    #[tokio::test]
    async fn test_slave_answers_after_remote() {
        let (peer, connector, relay, signaler) = setup(NegotiationMode::NonTrickle);
        let (tx, inbox) = mpsc::unbounded_channel();
        let _handle = signaler.start(inbox).await.unwrap();

        tx.send(SignalMessage::MasterOffer(
            crate::sdp::SessionDescription::offer(crate::peer::scripted::TEMPLATE_SDP),
        ))
        .unwrap();
        until(|| peer.state() == NegotiationState::LocalSet).await;
        assert_eq!(peer.role(), Role::Slave);

        connector.last().unwrap().gather(Vec::new());
        connector.last().unwrap().complete_gathering();
        until(|| relay.events().len() == 2).await;
        let sent = relay.sent.lock();
        assert!(matches!(
            &sent[1],
            SignalMessage::SlaveOffer(description) if description.sdp_type == SdpType::Answer
        ));
    }

    #[tokio::test]
    async fn test_trickle_holds_early_candidates() {
        let (peer, connector, relay, signaler) = setup(NegotiationMode::Trickle);
        let (tx, inbox) = mpsc::unbounded_channel();
        let _handle = signaler.start(inbox).await.unwrap();

        tx.send(SignalMessage::Candidate(IceCandidate::new("candidate:1")))
            .unwrap();
        tx.send(SignalMessage::MasterOffer(
            crate::sdp::SessionDescription::offer(crate::peer::scripted::TEMPLATE_SDP),
        ))
        .unwrap();
        until(|| relay.events().contains(&"slave offer")).await;

        assert_eq!(connector.last().unwrap().remote_candidates().len(), 1);
        assert!(peer.has_remote_description());
    }
}
