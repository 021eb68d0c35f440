//! Live Query Client Error Hierarchy
//!
//! Defines the error types of the synchronization client, categorized by the
//! layer that produces them: connection lifecycle, transport protocol,
//! change-event decoding, REST fallback and configuration.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shared transport could not be acquired
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Push transport protocol failures
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Change event payloads that could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// REST snapshot retrieval failures
    #[error(transparent)]
    Fallback(#[from] FallbackError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration values that loaded but are not usable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// The transport failed to start. Every caller waiting on the same
    /// connect attempt observes the same reason.
    #[error("Transport failed to start: {0}")]
    StartFailed(String),

    /// The connect attempt did not finish in time
    #[error("Transport start timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Operation requires a connected transport
    #[error("Transport is not connected")]
    NotConnected,

    /// Hub handshake was rejected or malformed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Hub message violated the protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Underlying websocket failures
    #[error(transparent)]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Server completed a reload invocation with an error
    #[error("Reload for channel {channel} failed: {reason}")]
    ReloadFailed { channel: String, reason: String },

    /// Connection closed by the server or lost
    #[error("Connection closed: {0}")]
    Closed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame is not a JSON object or misses required fields
    #[error("Malformed change event: {0}")]
    Malformed(String),

    /// Operation tag outside the known set
    #[error("Unknown operation tag: {0}")]
    UnknownOp(String),

    /// JSON parsing failures
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    /// HTTP client failures
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Snapshot endpoint replied with a non-success status
    #[error("Snapshot endpoint returned status {0}")]
    Status(u16),

    /// Snapshot body could not be parsed
    #[error("Snapshot body rejected: {0}")]
    Body(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(e))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Fallback(e.into())
    }
}

impl Error {
    /// Whether the error originates from the push connection lifecycle and a
    /// later `acquire` may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Transport(TransportError::NotConnected)
                | Error::Transport(TransportError::Closed(_))
                | Error::Transport(TransportError::WebSocket(_))
        )
    }
}
