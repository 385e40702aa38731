//! Error types for the live quiz session synchronizer.

use thiserror::Error;

use crate::protocol::SessionId;

/// Errors that can occur while synchronizing a live quiz session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Session identifiers must be strictly positive.
    #[error("invalid session id {0}: must be positive")]
    InvalidSessionId(SessionId),

    /// The push channel handshake could not be completed.
    #[error("push channel connect error: {0}")]
    TransportConnect(String),

    /// The push channel close handshake failed.
    #[error("push channel close error: {0}")]
    TransportClose(String),

    /// Failed to receive a message from the push channel.
    #[error("push channel receive error: {0}")]
    TransportReceive(String),

    /// The push channel handshake did not finish in time.
    #[error("push channel handshake timed out")]
    HandshakeTimeout,

    /// Failed to serialize or deserialize a wire message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An HTTP request to the session API could not be completed.
    #[cfg(feature = "http-client")]
    #[error("request to `{path}` failed")]
    Http {
        /// Request path relative to the API base URL.
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The session API answered with a non-success status and no envelope.
    #[error("unexpected status {status} for `{path}`")]
    HttpStatus {
        /// Request path relative to the API base URL.
        path: String,
        /// HTTP status code.
        status: u16,
    },

    /// The session API answered with `ok: false`.
    #[error("request rejected by server: {}", .message.as_deref().unwrap_or("no reason given"))]
    Rejected {
        /// Human-readable reason supplied by the server, if any.
        message: Option<String>,
    },

    /// A required environment variable is missing.
    #[error("missing environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },

    /// The controller loop is no longer running.
    #[error("session controller is not running")]
    NotRunning,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for session synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
