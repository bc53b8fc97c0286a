//! Rendezvous channel
//!
//! A [`Relay`] carries [`SignalMessage`]s from one endpoint to the others in
//! its room; inbound messages arrive on an [`Inbox`]. [`MemoryRelay`] is an
//! in-process room hub implementing the role handshake: the first joiner of
//! a room is told `master`, and on every later join the members already in
//! the room are told `slave`. Every other message goes to the other members
//! of the sender's room.

use super::message::SignalMessage;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Inbound side of a relay connection
pub type Inbox = mpsc::UnboundedReceiver<SignalMessage>;

/// Outbound side of a relay connection
#[async_trait]
pub trait Relay: Send + Sync {
    /// Publish a message to the room
    async fn send(&self, message: SignalMessage) -> Result<()>;
}

#[derive(Default)]
struct HubState {
    clients: HashMap<u64, mpsc::UnboundedSender<SignalMessage>>,
    rooms: HashMap<String, Vec<u64>>,
    membership: HashMap<u64, String>,
    next_id: u64,
}

impl HubState {
    fn deliver(&self, to: u64, message: SignalMessage) {
        if let Some(client) = self.clients.get(&to) {
            if client.send(message).is_err() {
                debug!(client = to, "inbox closed, dropping message");
            }
        }
    }

    fn members(&self, room: &str) -> Vec<u64> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    fn leave(&mut self, id: u64) {
        if let Some(room) = self.membership.remove(&id) {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.retain(|member| *member != id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
    }
}

/// In-process room hub
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<HubState>>,
}

impl std::fmt::Debug for MemoryRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryRelay")
            .field("clients", &state.clients.len())
            .field("rooms", &state.rooms.len())
            .finish()
    }
}

impl MemoryRelay {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a client connection
    pub fn connect(&self) -> (RelayClient, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.clients.insert(id, tx);
            id
        };
        debug!(client = id, "relay client connected");
        (
            RelayClient {
                id,
                state: self.state.clone(),
            },
            rx,
        )
    }

    /// Number of clients in `room`
    pub fn room_size(&self, room: &str) -> usize {
        self.state.lock().rooms.get(room).map_or(0, Vec::len)
    }
}

/// Client connection to a [`MemoryRelay`]; leaves its room when dropped
pub struct RelayClient {
    id: u64,
    state: Arc<Mutex<HubState>>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient").field("id", &self.id).finish()
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.leave(self.id);
        state.clients.remove(&self.id);
    }
}

#[async_trait]
impl Relay for RelayClient {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        let mut state = self.state.lock();
        match message {
            SignalMessage::Join(room) => {
                state.leave(self.id);
                let present = state.members(&room);
                state.rooms.entry(room.clone()).or_default().push(self.id);
                state.membership.insert(self.id, room.clone());
                if present.is_empty() {
                    info!(%room, "room created");
                    state.deliver(self.id, SignalMessage::Master);
                } else {
                    info!(%room, members = present.len() + 1, "peer joined room");
                    for member in present {
                        state.deliver(member, SignalMessage::Slave);
                    }
                }
                Ok(())
            }
            SignalMessage::Master | SignalMessage::Slave => {
                warn!(client = self.id, "client sent a relay-only message");
                Err(Error::signaling("role notices are issued by the relay"))
            }
            message => {
                let Some(room) = state.membership.get(&self.id).cloned() else {
                    return Err(Error::signaling(format!(
                        "'{}' sent before joining a room",
                        message
                    )));
                };
                debug!(client = self.id, %room, event = message.event(), "relaying");
                for member in state.members(&room) {
                    if member != self.id {
                        state.deliver(member, message.clone());
                    }
                }
                Ok(())
            }
        }
    }
}
