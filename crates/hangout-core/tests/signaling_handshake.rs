//! Master/slave handshake through the in-process relay

mod common;

use async_trait::async_trait;
use common::{init_tracing, wait_until};
use hangout_core::peer::scripted::ScriptedConnector;
use hangout_core::peer::IceCandidate;
use hangout_core::sdp::payload_order;
use hangout_core::signaling::SignalMessage;
use hangout_core::{
    prefer_opus, DescriptionRequest, MemoryRelay, NegotiationMode, Peer, PeerConfig, PeerTopic,
    Relay, Result, Role, Signaler, SignalingConfig, SignalingHandle,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn host(port: u16) -> IceCandidate {
    IceCandidate::new(format!("candidate:{} 1 udp 2130706431 10.0.0.1 {} typ host", port, port))
}

async fn endpoint(
    relay: &MemoryRelay,
    mode: NegotiationMode,
    candidates: Vec<IceCandidate>,
) -> (SignalingHandle, Arc<ScriptedConnector>) {
    let connector = Arc::new(ScriptedConnector::new().auto_gather(candidates));
    let peer = Peer::with_config(PeerConfig::host_only(), connector.clone()).unwrap();
    peer.codec(prefer_opus);
    let (client, inbox) = relay.connect();
    let config = SignalingConfig::new("call").with_mode(mode);
    let handle = Signaler::new(peer, Arc::new(client), config)
        .unwrap()
        .start(inbox)
        .await
        .unwrap();
    (handle, connector)
}

async fn handshake(mode: NegotiationMode) {
    init_tracing();
    let relay = MemoryRelay::new();

    let (first, first_connector) = endpoint(&relay, mode, vec![host(5000), host(5001)]).await;
    wait_until("first endpoint joined", || relay.room_size("call") == 1).await;
    let (second, second_connector) = endpoint(&relay, mode, vec![host(6000)]).await;

    let master = first.peer().clone();
    let slave = second.peer().clone();
    wait_until("descriptions exchanged", || {
        master.has_remote_description() && slave.has_remote_description()
    })
    .await;
    wait_until("both ready", || master.is_ready() && slave.is_ready()).await;

    assert_eq!(master.role(), Role::Master);
    assert_eq!(slave.role(), Role::Slave);

    let offer = second_connector.last().unwrap().remote().unwrap();
    assert_eq!(
        payload_order(&offer.sdp, "audio").unwrap(),
        vec!["111", "0", "8", "126"]
    );

    let master_transport = first_connector.last().unwrap();
    let slave_transport = second_connector.last().unwrap();
    match mode {
        NegotiationMode::NonTrickle => {
            // candidates travel inside the descriptions
            assert_eq!(offer.candidate_count(), 2);
            assert_eq!(master_transport.remote().unwrap().candidate_count(), 1);
            assert!(master_transport.remote_candidates().is_empty());
            assert!(slave_transport.remote_candidates().is_empty());
        }
        NegotiationMode::Trickle => {
            wait_until("candidates trickled", || {
                master_transport.remote_candidates().len() == 1
                    && slave_transport.remote_candidates().len() == 2
            })
            .await;
        }
    }

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_non_trickle_handshake() {
    handshake(NegotiationMode::NonTrickle).await;
}

#[tokio::test]
async fn test_trickle_handshake() {
    handshake(NegotiationMode::Trickle).await;
}

#[derive(Default)]
struct RecordingRelay {
    sent: Mutex<Vec<SignalMessage>>,
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }
}

impl RecordingRelay {
    fn count(&self, event: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|message| message.event() == event)
            .count()
    }
}

#[tokio::test]
async fn test_gathering_without_candidates_relays_one_offer() {
    init_tracing();
    let connector = Arc::new(ScriptedConnector::new());
    let peer = Peer::with_config(PeerConfig::host_only(), connector.clone()).unwrap();
    let ready = Arc::new(AtomicUsize::new(0));
    let counter = ready.clone();
    peer.on(PeerTopic::Ready, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let relay = Arc::new(RecordingRelay::default());
    let (tx, inbox) = mpsc::unbounded_channel();
    let handle = Signaler::new(peer.clone(), relay.clone(), SignalingConfig::new("call"))
        .unwrap()
        .start(inbox)
        .await
        .unwrap();
    tx.send(SignalMessage::Master).unwrap();
    wait_until("role assigned", || peer.role() == Role::Master).await;

    peer.offer(DescriptionRequest::new()).await.unwrap();
    let transport = connector.last().unwrap();
    transport.complete_gathering();
    transport.complete_gathering();

    wait_until("offer relayed", || relay.count("master offer") == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ready.load(Ordering::SeqCst), 1);
    assert_eq!(relay.count("master offer"), 1);
    assert_eq!(relay.count("join"), 1);
    handle.stop();
}
