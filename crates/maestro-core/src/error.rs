//! Error types for Maestro.
//!
//! Every failure a caller of the lease protocol can observe is a variant of
//! [`MaestroError`]. Nothing in this crate retries a request on its own; the
//! only retry loop is the explicit [`Connection::connect_with_retry`].
//!
//! [`Connection::connect_with_retry`]: crate::connection::Connection::connect_with_retry

use std::time::Duration;
use thiserror::Error;

/// Main error type for Maestro.
#[derive(Debug, Error)]
pub enum MaestroError {
    // Connection errors
    #[error("Not connected to the coordinating backend")]
    NotConnected,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connection to the coordinating backend was lost")]
    ConnectionLost,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    // Protocol errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Reply for unknown request id {request_id}")]
    UnknownReply { request_id: u64 },

    // Downstream HTTP errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation was cancelled")]
    Cancelled,
}

/// Result type alias for Maestro operations.
pub type Result<T> = std::result::Result<T, MaestroError>;

impl From<std::io::Error> for MaestroError {
    fn from(err: std::io::Error) -> Self {
        MaestroError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MaestroError {
    fn from(err: serde_json::Error) -> Self {
        MaestroError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MaestroError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => MaestroError::ConnectionLost,
            other => MaestroError::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for MaestroError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest does not report which limit fired, so keep its own wording.
        let message = if err.is_timeout() {
            format!("Request timed out: {}", err)
        } else {
            err.to_string()
        };
        MaestroError::Network {
            message,
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

impl MaestroError {
    /// Build a protocol error from a payload that failed to decode.
    pub fn protocol(message: impl Into<String>, source: Option<serde_json::Error>) -> Self {
        MaestroError::Protocol {
            message: message.into(),
            source,
        }
    }

    /// Build a transport error from any displayable cause.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        MaestroError::Transport {
            message: message.to_string(),
        }
    }

    /// Check whether re-establishing the connection might clear this error.
    ///
    /// Only used by `connect_with_retry`; requests themselves are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MaestroError::Transport { .. }
                | MaestroError::ConnectionLost
                | MaestroError::Timeout(_)
                | MaestroError::Io { .. }
        )
    }

    /// True for failures that mean the connection itself is unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            MaestroError::NotConnected
                | MaestroError::Transport { .. }
                | MaestroError::ConnectionLost
        )
    }
}
