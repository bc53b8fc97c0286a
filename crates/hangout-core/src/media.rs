//! Local media capture
//!
//! [`Media`] is a store-backed entity holding capture constraints. Capture
//! itself is delegated to a [`MediaSource`]; the resulting stream is queued
//! as a [`MediaEvent::Stream`] so listeners attached after capture still
//! receive it.

use crate::error::{Error, Result};
use crate::events::{EventQueue, ListenerId};
use crate::store::Store;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kind of media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone audio
    Audio,
    /// Camera video
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// One track of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    /// Track identifier
    pub id: String,
    /// Track kind
    pub kind: TrackKind,
    /// Whether the track produces media
    pub enabled: bool,
}

impl MediaTrack {
    /// Enabled track with a fresh identifier
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            enabled: true,
        }
    }
}

/// Group of tracks captured together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    /// Stream identifier
    pub id: String,
    /// Tracks in the stream
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Empty stream
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    /// Add a track
    pub fn with_track(mut self, kind: TrackKind) -> Self {
        self.tracks.push(MediaTrack::new(kind));
        self
    }

    /// Whether the stream has a track of `kind`
    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|track| track.kind == kind)
    }
}

/// Capture constraints taken from the media store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// `true`, `false` or a constraint object
    pub audio: Value,
    /// `true`, `false` or a constraint object
    pub video: Value,
}

impl MediaConstraints {
    /// Whether a track of `kind` is requested
    pub fn wants(&self, kind: TrackKind) -> bool {
        let value = match kind {
            TrackKind::Audio => &self.audio,
            TrackKind::Video => &self.video,
        };
        !matches!(value, Value::Null | Value::Bool(false))
    }
}

/// Capability producing a local stream
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Capture a stream honouring `constraints`
    async fn capture(&self, constraints: &MediaConstraints) -> Result<MediaStream>;
}

/// Source producing trackful streams without devices
#[derive(Debug, Clone, Default)]
pub struct SyntheticSource {
    failure: Option<String>,
}

impl SyntheticSource {
    /// Source that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
        }
    }
}

#[async_trait]
impl MediaSource for SyntheticSource {
    async fn capture(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        if let Some(reason) = &self.failure {
            return Err(Error::transport_unavailable(reason.clone()));
        }
        let mut stream = MediaStream::new(Uuid::new_v4().to_string());
        for kind in [TrackKind::Audio, TrackKind::Video] {
            if constraints.wants(kind) {
                stream = stream.with_track(kind);
            }
        }
        Ok(stream)
    }
}

/// Media event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaTopic {
    /// Stream captured
    Stream,
    /// Capture failed
    Error,
    /// Capture stopped
    Stop,
}

/// Media events
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// Stream captured with the given constraints
    Stream {
        constraints: MediaConstraints,
        stream: MediaStream,
    },
    /// Capture failed
    Error(Arc<Error>),
    /// Capture stopped
    Stop,
}

/// Store-backed local media entity
#[derive(Clone)]
pub struct Media {
    store: Store,
    events: Arc<EventQueue<MediaTopic, MediaEvent>>,
    current: Arc<RwLock<Option<MediaStream>>>,
}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Media")
            .field("store", &self.store)
            .field("capturing", &self.current.read().is_some())
            .finish()
    }
}

impl Default for Media {
    fn default() -> Self {
        Self::new()
    }
}

/// Default capture attributes
pub fn default_constraints() -> Map<String, Value> {
    let mut defaults = Map::new();
    defaults.insert("audio".into(), json!(true));
    defaults.insert("video".into(), json!({"mandatory": {}, "optional": []}));
    defaults.insert("autoplay".into(), json!(true));
    defaults
}

impl Media {
    /// Media with default constraints
    pub fn new() -> Self {
        Self {
            store: Store::with_data(default_constraints()),
            events: Arc::new(EventQueue::new()),
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Media with attributes layered over the defaults
    pub fn with_attributes(attributes: Map<String, Value>) -> Result<Self> {
        let media = Self::new();
        media.store.set_many(attributes)?;
        Ok(media)
    }

    /// Attribute store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Request a track kind
    pub fn enable(&self, kind: TrackKind) -> Result<bool> {
        self.store.enable(kind.to_string())
    }

    /// Stop requesting a track kind
    pub fn disable(&self, kind: TrackKind) -> Result<bool> {
        self.store.disable(kind.to_string())
    }

    /// Current capture constraints
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.store.get("audio").unwrap_or(Value::Bool(false)),
            video: self.store.get("video").unwrap_or(Value::Bool(false)),
        }
    }

    /// Capture a stream from `source`.
    ///
    /// Success queues [`MediaEvent::Stream`]; failure emits
    /// [`MediaEvent::Error`] and is also returned.
    pub async fn capture(&self, source: &dyn MediaSource) -> Result<MediaStream> {
        let constraints = self.constraints();
        match source.capture(&constraints).await {
            Ok(stream) => {
                info!(stream = %stream.id, tracks = stream.tracks.len(), "media captured");
                *self.current.write() = Some(stream.clone());
                self.events.queue(
                    MediaTopic::Stream,
                    MediaEvent::Stream {
                        constraints,
                        stream: stream.clone(),
                    },
                );
                Ok(stream)
            }
            Err(e) => {
                warn!(error = %e, "media capture failed");
                let message = match &e {
                    Error::TransportUnavailable { reason } => reason.clone(),
                    other => other.to_string(),
                };
                self.events
                    .emit(&MediaTopic::Error, MediaEvent::Error(Arc::new(e)));
                Err(Error::transport_unavailable(message))
            }
        }
    }

    /// Stop the captured stream
    pub fn stop(&self) {
        if self.current.write().take().is_some() {
            debug!("media stopped");
        }
        self.events.emit(&MediaTopic::Stop, MediaEvent::Stop);
    }

    /// Captured stream, if any
    pub fn stream(&self) -> Option<MediaStream> {
        self.current.read().clone()
    }

    /// Wait until a stream is captured
    pub async fn wait_for_stream(&self) -> Result<MediaStream> {
        if let Some(stream) = self.stream() {
            return Ok(stream);
        }
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.events.once(MediaTopic::Stream, move |event| {
            if let MediaEvent::Stream { stream, .. } = event {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(stream.clone());
                }
            }
        });
        if let Some(stream) = self.stream() {
            self.events.off(id);
            return Ok(stream);
        }
        rx.await
            .map_err(|_| Error::transport_unavailable("media dropped before capture"))
    }

    /// Subscribe to media events
    pub fn on<F>(&self, topic: MediaTopic, listener: F) -> ListenerId
    where
        F: Fn(&MediaEvent) + Send + Sync + 'static,
    {
        self.events.on(topic, listener)
    }

    /// Detach a listener
    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }
}
