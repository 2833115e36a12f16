//! Error taxonomy for the real-time messaging client.

use std::time::Duration;

use thiserror::Error;

use crate::types::MessageId;

/// The main result type used throughout the crate.
pub type RtmResult<T> = Result<T, RtmError>;

/// Errors produced by the connection manager.
///
/// Connection-level variants (`Dial`, `Handshake`, `WebSocket`,
/// `ConnectionClosed`, `ProbeTimeout`) accompany a transition out of the
/// connected state. Everything else is local to the call that returned it.
#[derive(Error, Debug)]
pub enum RtmError {
    /// Transport-level dial or handshake failure.
    #[error("Dial error: {endpoint}: {message}")]
    Dial { endpoint: String, message: String },

    /// The protocol-level `hello` did not arrive.
    #[error("Handshake error: {message}")]
    Handshake { message: String },

    /// Read or write failure on the live stream.
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// The stream ended or the remote closed it.
    #[error("Connection closed: {}", reason.as_deref().unwrap_or("no reason given"))]
    ConnectionClosed { reason: Option<String> },

    /// A liveness probe went unanswered for longer than the window.
    #[error("Liveness probe {id} unanswered after {timeout:?}")]
    ProbeTimeout { id: MessageId, timeout: Duration },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Operation requires a live connection.
    #[error("Not connected")]
    NotConnected,

    /// `connect` while a connection is live or being established.
    #[error("Already connected")]
    AlreadyConnected,

    /// A teardown is still in progress.
    #[error("Connection is closing")]
    Closing,

    /// The outgoing message is structurally unusable.
    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    /// Message text exceeds the service limit.
    #[error("Message text is {length} characters, limit is {max}")]
    MessageTooLong { length: usize, max: usize },

    /// An identifier was tracked twice.
    #[error("Duplicate message identifier {id}")]
    DuplicateId { id: MessageId },

    /// A wire timestamp that is not a decimal number of seconds.
    #[error("Malformed timestamp: {raw:?}")]
    MalformedTimestamp { raw: String },

    /// Non-blocking submission found the outbound queue full.
    #[error("Outgoing queue is full")]
    QueueFull,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound payload could not be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// The session provider failed to start a session.
    #[error("Session error: {message}")]
    Session { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[cfg(feature = "tungstenite")]
impl From<tokio_tungstenite::tungstenite::Error> for RtmError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::connection_closed(Some(e.to_string()))
            }
            other => Self::websocket(other.to_string()),
        }
    }
}

impl RtmError {
    /// Create a dial error.
    pub fn dial(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dial {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an invalid-message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    /// Create a malformed-timestamp error.
    pub fn malformed_timestamp(raw: impl Into<String>) -> Self {
        Self::MalformedTimestamp { raw: raw.into() }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a session error.
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for failures that end the current connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. }
                | Self::Handshake { .. }
                | Self::WebSocket { .. }
                | Self::ConnectionClosed { .. }
                | Self::ProbeTimeout { .. }
        )
    }
}
