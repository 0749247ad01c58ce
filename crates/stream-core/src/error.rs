use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConnectionState, FailureClass};

/// Broad error category, aligned with how the controller reacts to a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamErrorCategory {
    /// Transport never produced a response.
    Network,
    /// The server answered with an undesired status.
    Application,
    /// Malformed or unexpected body fragment.
    Framing,
    /// No bytes arrived within the idle threshold.
    IdleTimeout,
    /// Backoff gave up for the active class.
    Exhausted,
    /// Invalid configuration or signer input.
    Config,
    /// Invariant break inside the client.
    Internal,
}

/// Stable error payload used across the core/runtime boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct StreamError {
    /// High-level error category.
    pub category: StreamErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl StreamError {
    /// Construct a new stream error.
    pub fn new(
        category: StreamErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transport-level failure (connect, TLS, read, write).
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StreamErrorCategory::Network, code, message)
    }

    /// Build a standard invalid-state error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            StreamErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is in state {current:?}"),
        )
    }

    /// Whether the controller keeps reconnecting after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            StreamErrorCategory::Network
                | StreamErrorCategory::Application
                | StreamErrorCategory::Framing
                | StreamErrorCategory::IdleTimeout
        )
    }
}

/// Map a session's terminal status to its backoff class.
///
/// Status 0 means no response was ever received.
pub fn classify_status(status: u16) -> FailureClass {
    match status {
        0 => FailureClass::Network,
        _ => FailureClass::Application,
    }
}
