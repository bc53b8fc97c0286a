//! In-process pairing of two peers
//!
//! [`connect`] wires a master and a slave living in the same process: the
//! master's offer goes to the slave, which answers; the answer goes back;
//! candidates flow both ways. Each direction is one ordered channel drained
//! by one task, and candidates that arrive before the receiving side has a
//! remote description are held back until it does.

use super::{DescriptionRequest, NegotiationState, Peer, PeerEvent, PeerTopic, Role};
use crate::error::Result;
use crate::events::ListenerId;
use crate::peer::transport::IceCandidate;
use crate::sdp::SessionDescription;
use futures::future::try_join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::logging::task_span;
use tracing::{debug, warn, Instrument};

/// Options for [`connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Create the offer right away; when `false` call [`PeerLink::offer`]
    pub offer: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self { offer: true }
    }
}

impl ConnectOptions {
    /// Leave the offer to the caller
    pub fn deferred() -> Self {
        Self { offer: false }
    }
}

#[derive(Debug)]
enum Relayed {
    Candidate(IceCandidate),
    Description(SessionDescription),
    Stop,
}

/// Running pairing between two peers
pub struct PeerLink {
    master: Peer,
    listeners: Vec<(Peer, ListenerId)>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("master", &self.master.id())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl PeerLink {
    /// Create the master's offer
    pub async fn offer(&self) -> Result<Option<SessionDescription>> {
        self.master.offer(DescriptionRequest::new()).await
    }

    /// Stop relaying between the peers
    pub fn detach(self) {
        for (peer, id) in &self.listeners {
            peer.off(*id);
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn forward(
    peer: &Peer,
    topic: PeerTopic,
    tx: mpsc::UnboundedSender<Relayed>,
    listeners: &mut Vec<(Peer, ListenerId)>,
) {
    let id = peer.on(topic, move |event| {
        let relayed = match event {
            PeerEvent::Candidate(candidate) => Relayed::Candidate(candidate.clone()),
            PeerEvent::Offer(description) | PeerEvent::Answer(description) => {
                Relayed::Description(description.clone())
            }
            PeerEvent::Closed => Relayed::Stop,
            _ => return,
        };
        let _ = tx.send(relayed);
    });
    listeners.push((peer.clone(), id));
}

async fn drive(peer: Peer, answers: bool, mut rx: mpsc::UnboundedReceiver<Relayed>) {
    let mut held: Vec<IceCandidate> = Vec::new();
    while let Some(relayed) = rx.recv().await {
        let step = match relayed {
            Relayed::Stop => break,
            Relayed::Candidate(candidate) if !peer.has_remote_description() => {
                held.push(candidate);
                Ok(())
            }
            Relayed::Candidate(candidate) => peer.ice(candidate).await.map(|_| ()),
            Relayed::Description(description) => {
                apply(&peer, answers, description, &mut held).await
            }
        };
        if let Err(e) = step {
            warn!(peer = %peer.id(), error = %e, "pairing stopped");
            break;
        }
    }
    debug!(peer = %peer.id(), "pairing task finished");
}

async fn apply(
    peer: &Peer,
    answers: bool,
    description: SessionDescription,
    held: &mut Vec<IceCandidate>,
) -> Result<()> {
    if !peer.remote(description).await? {
        return Ok(());
    }
    for candidate in held.drain(..) {
        peer.ice(candidate).await?;
    }
    if answers {
        peer.answer(DescriptionRequest::new()).await?;
    }
    Ok(())
}

/// Pair `master` and `slave`, creating both if needed
pub async fn connect(master: &Peer, slave: &Peer, options: ConnectOptions) -> Result<PeerLink> {
    let (to_slave, slave_rx) = mpsc::unbounded_channel();
    let (to_master, master_rx) = mpsc::unbounded_channel();

    let mut listeners = Vec::new();
    for topic in [PeerTopic::Candidate, PeerTopic::Offer, PeerTopic::Closed] {
        forward(master, topic, to_slave.clone(), &mut listeners);
    }
    for topic in [PeerTopic::Candidate, PeerTopic::Answer, PeerTopic::Closed] {
        forward(slave, topic, to_master.clone(), &mut listeners);
    }

    let tasks = vec![
        tokio::spawn(drive(slave.clone(), true, slave_rx).instrument(task_span(slave.id(), "link"))),
        tokio::spawn(
            drive(master.clone(), false, master_rx).instrument(task_span(master.id(), "link")),
        ),
    ];

    let link = PeerLink {
        master: master.clone(),
        listeners,
        tasks,
    };

    master.set_role(Role::Master);
    slave.set_role(Role::Slave);
    let idle = [master, slave]
        .into_iter()
        .filter(|peer| peer.state() == NegotiationState::Idle);
    if let Err(e) = try_join_all(idle.map(Peer::create)).await {
        link.detach();
        return Err(e);
    }

    if options.offer {
        link.offer().await?;
    }
    Ok(link)
}
