//! `tokio-tungstenite` backed wire.

use std::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;

use super::{BoxWire, Dialer, Frame};
use crate::error::{RtmError, RtmResult};

/// Adapts a [`WebSocketStream`] to [`Frame`]s.
pub struct TungsteniteWire<S> {
    inner: WebSocketStream<S>,
}

impl<S> TungsteniteWire<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> WebSocketStream<S> {
        self.inner
    }
}

fn to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Ping(data) => Some(Frame::Ping(data)),
        Message::Pong(data) => Some(Frame::Pong(data)),
        Message::Close(_) => Some(Frame::Close),
        Message::Frame(_) => None,
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(data) => Message::binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

impl<S> Stream for TungsteniteWire<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = RtmResult<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(message)) => {
                    if let Some(frame) = to_frame(message) {
                        return Poll::Ready(Some(Ok(frame)));
                    }
                }
                Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<S> Sink<Frame> for TungsteniteWire<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = RtmError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_ready(cx)
            .map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().inner)
            .start_send(to_message(item))
            .map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_flush(cx)
            .map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_close(cx)
            .map_err(Into::into)
    }
}

/// Dials `ws://` and `wss://` endpoints with `tokio-tungstenite`.
///
/// TLS endpoints need the `rustls` feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteDialer;

impl TungsteniteDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, endpoint: &str, timeout: Duration) -> RtmResult<BoxWire> {
        debug!(endpoint, "Dialing");
        let (stream, response) = tokio::time::timeout(timeout, connect_async(endpoint))
            .await
            .map_err(|_| RtmError::timeout(timeout))?
            .map_err(|e| RtmError::dial(endpoint, e.to_string()))?;
        debug!(endpoint, status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(TungsteniteWire::new(stream)))
    }
}
