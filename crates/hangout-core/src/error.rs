//! Error types for the hangout core

use thiserror::Error;

/// Result type for hangout core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating a session
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed store mutation input
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Transport rejected an offer, answer, candidate or description
    #[error("Negotiation failed in {operation}: {reason}")]
    Negotiation { operation: String, reason: String },

    /// No usable connection primitive in this runtime
    #[error("Transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    /// Operation called in a lifecycle state that does not allow it
    #[error("Invalid state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    /// A change handler tried to mutate the key it is being notified about
    #[error("Reentrant update of key '{key}'")]
    ReentrantUpdate { key: String },

    /// Relay channel or signaling protocol error
    #[error("Signaling error: {message}")]
    Signaling { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// JSON (de)serialisation error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a negotiation error
    pub fn negotiation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Negotiation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport-unavailable error
    pub fn transport_unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create a reentrant update error
    pub fn reentrant(key: impl Into<String>) -> Self {
        Self::ReentrantUpdate { key: key.into() }
    }

    /// Create a signaling error
    pub fn signaling(message: impl Into<String>) -> Self {
        Self::Signaling {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether a caller may retry the failed operation on a fresh peer
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Negotiation { .. } | Self::Signaling { .. } | Self::TransportUnavailable { .. }
        )
    }

    /// Short category name, used as a structured logging field
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Negotiation { .. } => "negotiation",
            Self::TransportUnavailable { .. } => "transport",
            Self::InvalidState { .. } => "state",
            Self::ReentrantUpdate { .. } => "reentrant",
            Self::Signaling { .. } => "signaling",
            Self::Configuration { .. } => "config",
            Self::Json(_) => "json",
        }
    }
}
