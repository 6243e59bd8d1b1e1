//! Error Types
//!
//! One error type covers the whole pipeline. Decode-local problems
//! (`Decode`, `ToolArguments`) are normally logged and recovered inside the
//! decoders; they only surface when a caller asks for them explicitly.
//! Everything else terminates the current operation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by decoding, orchestration, and scheduling
#[derive(Clone, Debug, Error)]
pub enum ConductorError {
    /// A single wire frame could not be understood
    #[error("Malformed frame: {message}")]
    Decode {
        /// What went wrong while reading the frame
        message: String,
    },

    /// Accumulated tool-call arguments were not valid JSON at block close
    #[error("Tool call {call_id} has unparsable arguments: {message}")]
    ToolArguments {
        /// Tool call identifier
        call_id: String,
        /// Parser error text
        message: String,
    },

    /// Non-success HTTP status or a broken connection
    #[error("Transport failure{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        /// HTTP status, when the failure came from the response head
        status: Option<u16>,
        /// Response body excerpt or connection error text
        message: String,
    },

    /// The operation did not finish before its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Every retry attempt failed
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Number of attempts that ran
        attempts: u32,
        /// The failure of the final attempt
        last_error: Box<ConductorError>,
    },

    /// Failure raised by a wrapped operation, passed through untouched
    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl ConductorError {
    /// Wrap an arbitrary operation failure
    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        Self::Other(Arc::new(err.into()))
    }

    /// Build a transport error from a response status and body excerpt
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Build a transport error for a connection-level failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Whether this error is a cancellation signal (never retried)
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error came from the deadline race
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for ConductorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = ConductorError> = std::result::Result<T, E>;
