//! Message-oriented duplex stream abstraction.
//!
//! The client never touches sockets directly. A [`Dialer`] turns an endpoint
//! into a [`BoxWire`]: a stream of inbound [`Frame`]s and a sink for outbound
//! ones, already past any transport handshake.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, Stream};

use crate::error::{RtmError, RtmResult};

#[cfg(any(test, feature = "testing"))]
pub mod memory;
#[cfg(feature = "tungstenite")]
pub mod tungstenite;

#[cfg(feature = "tungstenite")]
pub use self::tungstenite::{TungsteniteDialer, TungsteniteWire};

/// One transport frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data.len(),
            Self::Close => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A negotiated duplex stream of [`Frame`]s.
///
/// The stream yields `Err` on read failure and `None` at end of stream.
/// Sink errors are [`RtmError`]s.
pub trait WireStream:
    Stream<Item = RtmResult<Frame>> + Sink<Frame, Error = RtmError> + Send + Unpin + 'static
{
}

impl<T> WireStream for T where
    T: Stream<Item = RtmResult<Frame>>
        + Sink<Frame, Error = RtmError>
        + Send
        + Unpin
        + 'static
{
}

pub type BoxWire = Box<dyn WireStream>;

/// Opens wires to endpoints.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Dial `endpoint`, giving up after `timeout`.
    async fn dial(&self, endpoint: &str, timeout: Duration) -> RtmResult<BoxWire>;
}
