//! Session descriptions and SDP rewriting
//!
//! Locally produced descriptions pass through a [`CodecPipeline`] of
//! [`SdpTransform`]s before they are committed to the transport. Transforms
//! are pure text-in, text-out functions applied left to right.

pub mod codec;

pub use codec::{prefer_opus, PreferCodec};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Line separator used by SDP
pub const CRLF: &str = "\r\n";

/// Kind of session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial proposal
    Offer,
    /// Final response
    Answer,
    /// Provisional response
    Pranswer,
    /// Undo the last pending offer
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
            SdpType::Pranswer => write!(f, "pranswer"),
            SdpType::Rollback => write!(f, "rollback"),
        }
    }
}

/// Typed SDP payload, JSON compatible with the browser `RTCSessionDescription`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Same kind, rewritten text
    pub fn with_sdp(&self, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: self.sdp_type,
            sdp: sdp.into(),
        }
    }

    /// Number of `a=candidate` lines bundled in the description
    pub fn candidate_count(&self) -> usize {
        self.sdp
            .split(CRLF)
            .filter(|line| line.starts_with("a=candidate:"))
            .count()
    }
}

/// Text rewrite applied to a locally produced description
pub trait SdpTransform: Send + Sync {
    /// Rewrite SDP text
    fn transform(&self, sdp: &str) -> String;

    /// Name used in logs
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> SdpTransform for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn transform(&self, sdp: &str) -> String {
        self(sdp)
    }
}

/// Ordered list of transforms
#[derive(Clone, Default)]
pub struct CodecPipeline {
    transforms: Vec<Arc<dyn SdpTransform>>,
}

impl fmt::Debug for CodecPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.transforms.iter().map(|transform| transform.name()))
            .finish()
    }
}

impl CodecPipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transform
    pub fn push(&mut self, transform: Arc<dyn SdpTransform>) {
        self.transforms.push(transform);
    }

    /// Number of transforms
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether the pipeline is empty
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply every transform in registration order
    pub fn apply(&self, sdp: &str) -> String {
        self.transforms
            .iter()
            .fold(sdp.to_string(), |sdp, transform| transform.transform(&sdp))
    }
}

/// Payload types listed on the first `m=<media>` line, in priority order
pub fn payload_order(sdp: &str, media: &str) -> Option<Vec<String>> {
    let prefix = format!("m={} ", media);
    let line = sdp.split(CRLF).find(|line| line.starts_with(&prefix))?;
    Some(line.split(' ').skip(3).map(str::to_string).collect())
}
