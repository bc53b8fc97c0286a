//! Signaling
//!
//! Wire messages, the relay abstraction with an in-process room hub, and the
//! master/slave protocol that negotiates a [`Peer`](crate::peer::Peer)
//! through it.

pub mod message;
pub mod protocol;
pub mod relay;

pub use message::SignalMessage;
pub use protocol::{Signaler, SignalingHandle};
pub use relay::{Inbox, MemoryRelay, Relay, RelayClient};
