//! # hangout-core - peer negotiation for two-party calls
//!
//! Building blocks for setting up a two-party media session:
//! - **store**: reactive attribute store with per-key change notification
//! - **events**: event queue that buffers completion signals for late listeners
//! - **sdp**: session descriptions and the codec rewriter (prefer opus, drop CN)
//! - **peer**: the offer/answer state machine over a pluggable transport
//! - **signaling**: master/slave negotiation through a room relay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hangout_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let relay = MemoryRelay::new();
//!
//!     let peer = Peer::new(Arc::new(ScriptedConnector::new()));
//!     peer.codec(prefer_opus);
//!
//!     let (client, inbox) = relay.connect();
//!     let signaler = Signaler::new(peer, Arc::new(client), SignalingConfig::default())?;
//!     let session = signaler.start(inbox).await?;
//!
//!     session.peer().on(PeerTopic::RemoteStream, |event| {
//!         println!("remote stream: {:?}", event);
//!     });
//!     Ok(())
//! }
//! ```

// Error handling
pub mod error;

// Configuration
pub mod config;

// Logging setup
pub mod logging;

// Reactive attributes
pub mod store;

// Buffered events
pub mod events;

// Session descriptions and codec rewriting
pub mod sdp;

// Negotiation state machine
pub mod peer;

// Local media
pub mod media;

// Relay signaling
pub mod signaling;

// Network transport
#[cfg(feature = "webrtc")]
pub mod webrtc;

// Public exports
pub use config::{IceServer, NegotiationMode, PeerConfig, SignalingConfig, TransportConstraints};
pub use error::{Error, Result};
pub use events::{EventQueue, ListenerId};
pub use media::{Media, MediaEvent, MediaSource, MediaStream, MediaTopic, TrackKind};
pub use peer::{
    connect, ConnectOptions, DescriptionRequest, NegotiationState, Peer, PeerEvent, PeerLink,
    PeerTopic, Role,
};
pub use sdp::{prefer_opus, PreferCodec, SdpTransform, SdpType, SessionDescription};
pub use signaling::{MemoryRelay, Relay, SignalMessage, Signaler, SignalingHandle};
pub use store::{AttributeEvent, Store, StoreTopic};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        connect, prefer_opus, ConnectOptions, DescriptionRequest, Error, IceServer, Media,
        MediaStream, MemoryRelay, NegotiationMode, NegotiationState, Peer, PeerConfig,
        PeerEvent, PeerTopic, PreferCodec, Relay, Result, Role, SessionDescription,
        SignalMessage, Signaler, SignalingConfig, Store, StoreTopic,
    };
    pub use crate::peer::scripted::ScriptedConnector;
    pub use crate::peer::{Connector, IceCandidate, Transport, TransportEvent};

    #[cfg(feature = "webrtc")]
    pub use crate::webrtc::WebRtcConnector;
}

/// Negotiation constants
pub mod constants {
    pub use crate::config::{DEFAULT_ROOM, DEFAULT_STUN_SERVER};
    pub use crate::sdp::CRLF;
}
