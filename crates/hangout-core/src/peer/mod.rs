//! Negotiation state machine
//!
//! A [`Peer`] owns one transport and drives offer/answer creation,
//! description application and ICE gathering on it. Its attributes live in a
//! [`Store`]; its events go through an [`EventQueue`] so completion signals
//! such as [`PeerEvent::Ready`] and [`PeerEvent::Offer`] reach listeners that
//! subscribe after the fact.
//!
//! ```text
//! Idle -> Created -> Offering | Answering -> LocalSet -> GatheringIce -> Ready
//!                                                           any -> Closed
//! ```
//!
//! Transport failures never escape negotiation calls: they are emitted as
//! [`PeerEvent::Error`] and the peer stays in its last reached state.
//! Calling an operation in a state that does not allow it is returned as
//! [`Error::InvalidState`].

pub mod connect;
pub mod scripted;
pub mod state;
pub mod transport;

pub use connect::{connect, ConnectOptions, PeerLink};
pub use state::{NegotiationState, Role};
pub use transport::{
    ConnectionParams, ConnectionState, Connector, DescriptionOptions, IceCandidate,
    IceGatheringState, Transport, TransportEvent, TransportEventHandler,
};

use crate::config::{IceServer, PeerConfig, TransportConstraints};
use crate::error::{Error, Result};
use crate::events::{EventQueue, ListenerId};
use crate::media::{Media, MediaStream};
use crate::sdp::{CodecPipeline, SdpTransform, SdpType, SessionDescription};
use crate::store::Store;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Peer event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerTopic {
    Create,
    Candidate,
    Ready,
    Offer,
    Answer,
    LocalStream,
    RemoteStream,
    ConnectionState,
    Error,
    Closed,
}

impl fmt::Display for PeerTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerTopic::Create => write!(f, "create"),
            PeerTopic::Candidate => write!(f, "candidate"),
            PeerTopic::Ready => write!(f, "ready"),
            PeerTopic::Offer => write!(f, "offer"),
            PeerTopic::Answer => write!(f, "answer"),
            PeerTopic::LocalStream => write!(f, "local stream"),
            PeerTopic::RemoteStream => write!(f, "remote stream"),
            PeerTopic::ConnectionState => write!(f, "connection state"),
            PeerTopic::Error => write!(f, "error"),
            PeerTopic::Closed => write!(f, "closed"),
        }
    }
}

/// Events published by a peer
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Transport allocated with these parameters
    Create(ConnectionParams),
    /// Local candidate gathered
    Candidate(IceCandidate),
    /// Gathering finished; fires once per peer
    Ready,
    /// Offer created and committed (codec-rewritten)
    Offer(SessionDescription),
    /// Answer created and committed (codec-rewritten)
    Answer(SessionDescription),
    /// Outbound stream attached
    LocalStream(MediaStream),
    /// Remote stream arrived
    RemoteStream(MediaStream),
    /// Transport connectivity changed
    ConnectionState(ConnectionState),
    /// Transport rejected an operation
    Error(Arc<Error>),
    /// Peer closed
    Closed,
}

impl PeerEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> PeerTopic {
        match self {
            PeerEvent::Create(_) => PeerTopic::Create,
            PeerEvent::Candidate(_) => PeerTopic::Candidate,
            PeerEvent::Ready => PeerTopic::Ready,
            PeerEvent::Offer(_) => PeerTopic::Offer,
            PeerEvent::Answer(_) => PeerTopic::Answer,
            PeerEvent::LocalStream(_) => PeerTopic::LocalStream,
            PeerEvent::RemoteStream(_) => PeerTopic::RemoteStream,
            PeerEvent::ConnectionState(_) => PeerTopic::ConnectionState,
            PeerEvent::Error(_) => PeerTopic::Error,
            PeerEvent::Closed => PeerTopic::Closed,
        }
    }
}

/// Callback invoked with a freshly committed description
pub type DescriptionCallback = Box<dyn FnOnce(&SessionDescription) + Send>;

/// Arguments of [`Peer::offer`] and [`Peer::answer`]
#[derive(Default)]
pub struct DescriptionRequest {
    /// Invoked after the description is committed, before the event is queued
    pub on_result: Option<DescriptionCallback>,
    /// Creation options passed to the transport
    pub options: DescriptionOptions,
}

impl fmt::Debug for DescriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptionRequest")
            .field("on_result", &self.on_result.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl DescriptionRequest {
    /// Request with default options and no callback
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result callback
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&SessionDescription) + Send + 'static,
    {
        self.on_result = Some(Box::new(callback));
        self
    }

    /// Set creation options
    pub fn options(mut self, options: DescriptionOptions) -> Self {
        self.options = options;
        self
    }
}

struct PeerInner {
    id: String,
    store: Store,
    events: EventQueue<PeerTopic, PeerEvent>,
    connector: Arc<dyn Connector>,
    connection: RwLock<Option<Arc<dyn Transport>>>,
    codecs: RwLock<CodecPipeline>,
    role: RwLock<Role>,
    state: RwLock<NegotiationState>,
    creating: AtomicBool,
    ready: AtomicBool,
    remote_set: AtomicBool,
    media: RwLock<Option<Media>>,
}

/// One endpoint of a session
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("role", &self.role())
            .field("codecs", &*self.inner.codecs.read())
            .finish()
    }
}

impl Peer {
    /// Peer using the default configuration
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let store = Store::new();
        if let Err(e) = PeerConfig::default()
            .to_attributes()
            .and_then(|attributes| store.set_many(attributes))
        {
            warn!(error = %e, "could not seed default peer attributes");
        }
        Self::from_store(store, connector)
    }

    /// Peer seeded from `config`
    pub fn with_config(config: PeerConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let store = Store::new();
        store.set_many(config.to_attributes()?)?;
        Ok(Self::from_store(store, connector))
    }

    fn from_store(store: Store, connector: Arc<dyn Connector>) -> Self {
        let peer = Self {
            inner: Arc::new(PeerInner {
                id: Uuid::new_v4().to_string(),
                store,
                events: EventQueue::new(),
                connector,
                connection: RwLock::new(None),
                codecs: RwLock::new(CodecPipeline::new()),
                role: RwLock::new(Role::Undetermined),
                state: RwLock::new(NegotiationState::Idle),
                creating: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                remote_set: AtomicBool::new(false),
                media: RwLock::new(None),
            }),
        };
        peer.mirror("state", NegotiationState::Idle.to_string());
        peer
    }

    /// Peer identifier, used in logs
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Attribute store
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Set an attribute
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<bool> {
        self.inner.store.set(key, value)
    }

    /// Read an attribute
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.store.get(key)
    }

    /// Current negotiation state
    pub fn state(&self) -> NegotiationState {
        *self.inner.state.read()
    }

    /// Current role
    pub fn role(&self) -> Role {
        *self.inner.role.read()
    }

    /// Assign the role
    pub fn set_role(&self, role: Role) {
        let previous = std::mem::replace(&mut *self.inner.role.write(), role);
        if previous != role {
            info!(peer = %self.inner.id, %role, "role assigned");
            self.mirror("role", role.to_string());
        }
    }

    /// Whether gathering has finished
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Whether a remote description has been applied
    pub fn has_remote_description(&self) -> bool {
        self.inner.remote_set.load(Ordering::SeqCst)
    }

    /// Number of registered codec transforms
    pub fn codec_count(&self) -> usize {
        self.inner.codecs.read().len()
    }

    /// Append a codec transform; applies to descriptions committed afterwards
    pub fn codec<T>(&self, transform: T) -> &Self
    where
        T: SdpTransform + 'static,
    {
        self.inner.codecs.write().push(Arc::new(transform));
        self
    }

    /// Subscribe to a topic, replaying queued events
    pub fn on<F>(&self, topic: PeerTopic, listener: F) -> ListenerId
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(topic, listener)
    }

    /// Subscribe for one delivery
    pub fn once<F>(&self, topic: PeerTopic, listener: F) -> ListenerId
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(topic, listener)
    }

    /// Detach a listener
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Queued events waiting for a listener on `topic`
    pub fn pending(&self, topic: PeerTopic) -> usize {
        self.inner.events.pending(&topic)
    }

    fn mirror(&self, key: &str, value: String) {
        if let Err(e) = self.inner.store.set_strict(key, value) {
            warn!(peer = %self.inner.id, key, error = %e, "could not mirror attribute");
        }
    }

    fn advance(&self, next: NegotiationState) -> bool {
        let advanced = {
            let mut state = self.inner.state.write();
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        };
        if advanced {
            debug!(peer = %self.inner.id, state = %next, "negotiation state");
            self.mirror("state", next.to_string());
        }
        advanced
    }

    fn transport(&self, operation: &str) -> Result<Arc<dyn Transport>> {
        let state = self.state();
        if !state.has_transport() {
            return Err(Error::invalid_state(operation, state));
        }
        self.inner
            .connection
            .read()
            .clone()
            .ok_or_else(|| Error::invalid_state(operation, state))
    }

    fn report(&self, error: Error) {
        error!(peer = %self.inner.id, category = error.category(), error = %error, "transport failure");
        self.inner
            .events
            .emit(&PeerTopic::Error, PeerEvent::Error(Arc::new(error)));
    }

    fn connection_params(&self) -> Result<ConnectionParams> {
        let ice_servers: Vec<IceServer> = match self.get("servers") {
            None | Some(Value::Null) => Vec::new(),
            Some(servers) => serde_json::from_value(servers)
                .map_err(|e| Error::validation(format!("invalid 'servers' attribute: {}", e)))?,
        };
        let optional = match self.get("optional") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::validation(format!(
                    "'optional' must be an array, got {}",
                    other
                )))
            }
        };
        let mandatory = match self.get("mandatory") {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(Value::Array(items)) if items.is_empty() => serde_json::Map::new(),
            Some(other) => {
                return Err(Error::validation(format!(
                    "'mandatory' must be an object, got {}",
                    other
                )))
            }
        };
        Ok(ConnectionParams {
            ice_servers,
            constraints: TransportConstraints {
                optional,
                mandatory,
            },
        })
    }

    /// Allocate the transport from the `servers`, `optional` and
    /// `mandatory` attributes and register transport callbacks.
    ///
    /// Must complete before any offer, answer or candidate.
    pub async fn create(&self) -> Result<()> {
        let state = self.state();
        if state != NegotiationState::Idle || self.inner.creating.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_state("create", state));
        }
        let params = match self.allocate().await {
            Ok(params) => params,
            Err(e) => {
                self.inner.creating.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!(
            peer = %self.inner.id,
            servers = params.ice_servers.len(),
            "peer connection created"
        );
        self.inner
            .events
            .emit(&PeerTopic::Create, PeerEvent::Create(params));

        let media = self.inner.media.read().clone();
        if let Some(stream) = media.and_then(|media| media.stream()) {
            self.stream(stream).await?;
        }
        Ok(())
    }

    async fn allocate(&self) -> Result<ConnectionParams> {
        let params = self.connection_params()?;

        let weak: Weak<PeerInner> = Arc::downgrade(&self.inner);
        let handler: TransportEventHandler = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                Peer { inner }.handle_transport_event(event);
            }
        });

        let transport = self
            .inner
            .connector
            .connect(params.clone(), handler)
            .await
            .map_err(|e| {
                error!(peer = %self.inner.id, error = %e, "could not allocate transport");
                e
            })?;

        let rejected = {
            let mut state = self.inner.state.write();
            if *state == NegotiationState::Idle {
                *self.inner.connection.write() = Some(transport.clone());
                *state = NegotiationState::Created;
                None
            } else {
                Some(*state)
            }
        };
        if let Some(state) = rejected {
            // closed while the connector was working
            if let Err(e) = transport.close().await {
                warn!(peer = %self.inner.id, error = %e, "transport close failed");
            }
            return Err(Error::invalid_state("create", state));
        }
        debug!(peer = %self.inner.id, state = %NegotiationState::Created, "negotiation state");
        self.mirror("state", NegotiationState::Created.to_string());
        Ok(params)
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        if self.state() == NegotiationState::Closed {
            debug!(peer = %self.inner.id, ?event, "ignoring transport event after close");
            return;
        }
        match event {
            TransportEvent::RemoteStream(stream) => {
                info!(peer = %self.inner.id, stream = %stream.id, "remote stream added");
                self.inner
                    .events
                    .emit(&PeerTopic::RemoteStream, PeerEvent::RemoteStream(stream));
            }
            TransportEvent::IceCandidate(Some(candidate)) => {
                self.advance(NegotiationState::GatheringIce);
                debug!(peer = %self.inner.id, candidate = %candidate.candidate, "local candidate");
                self.inner
                    .events
                    .emit(&PeerTopic::Candidate, PeerEvent::Candidate(candidate));
            }
            TransportEvent::IceCandidate(None) => self.signal_ready(),
            TransportEvent::IceGatheringStateChange(IceGatheringState::Complete) => {
                self.signal_ready()
            }
            TransportEvent::IceGatheringStateChange(gathering) => {
                debug!(peer = %self.inner.id, %gathering, "ice gathering state");
                if gathering == IceGatheringState::Gathering {
                    self.advance(NegotiationState::GatheringIce);
                }
            }
            TransportEvent::ConnectionStateChange(connection) => {
                info!(peer = %self.inner.id, %connection, "connection state");
                self.mirror("connection", connection.to_string());
                self.inner.events.emit(
                    &PeerTopic::ConnectionState,
                    PeerEvent::ConnectionState(connection),
                );
            }
        }
    }

    fn signal_ready(&self) {
        if self.inner.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        self.advance(NegotiationState::Ready);
        info!(peer = %self.inner.id, "ice gathering complete");
        self.inner.events.queue(PeerTopic::Ready, PeerEvent::Ready);
    }

    /// Create an offer, commit it through [`Peer::local`], call back and
    /// queue [`PeerEvent::Offer`].
    ///
    /// Returns `Ok(None)` when the transport failed; the failure is emitted
    /// as [`PeerEvent::Error`].
    pub async fn offer(&self, request: DescriptionRequest) -> Result<Option<SessionDescription>> {
        self.describe(SdpType::Offer, request).await
    }

    /// Create an answer, commit it through [`Peer::local`], call back and
    /// queue [`PeerEvent::Answer`].
    pub async fn answer(&self, request: DescriptionRequest) -> Result<Option<SessionDescription>> {
        self.describe(SdpType::Answer, request).await
    }

    async fn describe(
        &self,
        kind: SdpType,
        request: DescriptionRequest,
    ) -> Result<Option<SessionDescription>> {
        let (operation, pending, topic) = match kind {
            SdpType::Answer => ("answer", NegotiationState::Answering, PeerTopic::Answer),
            _ => ("offer", NegotiationState::Offering, PeerTopic::Offer),
        };
        let state = self.state();
        if state != NegotiationState::Created {
            return Err(Error::invalid_state(operation, state));
        }
        let transport = self.transport(operation)?;
        self.advance(pending);

        let DescriptionRequest {
            on_result,
            options,
        } = request;
        let created = match kind {
            SdpType::Answer => transport.create_answer(&options).await,
            _ => transport.create_offer(&options).await,
        };
        let description = match created {
            Ok(description) => description,
            Err(e) => {
                self.report(e);
                return Ok(None);
            }
        };

        let Some(description) = self.local(description).await? else {
            return Ok(None);
        };
        if let Some(callback) = on_result {
            callback(&description);
        }
        let event = match kind {
            SdpType::Answer => PeerEvent::Answer(description.clone()),
            _ => PeerEvent::Offer(description.clone()),
        };
        self.inner.events.queue(topic, event);
        Ok(Some(description))
    }

    /// Run the codec pipeline over `session` and commit the result as the
    /// local description. Returns the committed description.
    pub async fn local(&self, session: SessionDescription) -> Result<Option<SessionDescription>> {
        let transport = self.transport("local")?;
        let sdp = self.inner.codecs.read().apply(&session.sdp);
        let rewritten = session.with_sdp(sdp);
        match transport.set_local_description(rewritten.clone()).await {
            Ok(()) => {
                self.advance(NegotiationState::LocalSet);
                debug!(peer = %self.inner.id, kind = %rewritten.sdp_type, "local description set");
                Ok(Some(rewritten))
            }
            Err(e) => {
                self.report(e);
                Ok(None)
            }
        }
    }

    /// Commit a received description. Returns whether the transport
    /// accepted it.
    pub async fn remote(&self, session: SessionDescription) -> Result<bool> {
        let transport = self.transport("remote")?;
        let kind = session.sdp_type;
        match transport.set_remote_description(session).await {
            Ok(()) => {
                self.inner.remote_set.store(true, Ordering::SeqCst);
                debug!(peer = %self.inner.id, %kind, "remote description set");
                Ok(true)
            }
            Err(e) => {
                self.report(e);
                Ok(false)
            }
        }
    }

    /// Forward a remote candidate to the transport
    pub async fn ice(&self, candidate: IceCandidate) -> Result<bool> {
        let transport = self.transport("ice")?;
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.report(e);
                Ok(false)
            }
        }
    }

    /// Attach an outbound stream and queue [`PeerEvent::LocalStream`]
    pub async fn stream(&self, stream: MediaStream) -> Result<bool> {
        let transport = self.transport("stream")?;
        match transport.add_stream(&stream).await {
            Ok(()) => {
                debug!(peer = %self.inner.id, stream = %stream.id, "local stream added");
                self.inner
                    .events
                    .queue(PeerTopic::LocalStream, PeerEvent::LocalStream(stream));
                Ok(true)
            }
            Err(e) => {
                self.report(e);
                Ok(false)
            }
        }
    }

    /// Adopt a media entity. Its captured stream is added when the transport
    /// is created, or right away if it already is.
    pub async fn attach_media(&self, media: Media) -> Result<()> {
        let stream = media.stream();
        *self.inner.media.write() = Some(media);
        match stream {
            Some(stream) if self.state().has_transport() => {
                self.stream(stream).await?;
            }
            Some(_) => {}
            None => warn!(peer = %self.inner.id, "attached media has no captured stream"),
        }
        Ok(())
    }

    /// Local description as the transport currently holds it, candidates
    /// included
    pub async fn local_description(&self) -> Option<SessionDescription> {
        let transport = self.transport("local_description").ok()?;
        transport.local_description().await
    }

    /// Discard the transport and every queued event. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.inner.state.write(), NegotiationState::Closed);
        if previous == NegotiationState::Closed {
            return Ok(());
        }
        let transport = self.inner.connection.write().take();
        self.inner.events.clear_pending();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(peer = %self.inner.id, error = %e, "transport close failed");
            }
        }
        self.mirror("state", NegotiationState::Closed.to_string());
        info!(peer = %self.inner.id, from = %previous, "peer closed");
        self.inner.events.emit(&PeerTopic::Closed, PeerEvent::Closed);
        Ok(())
    }
}
