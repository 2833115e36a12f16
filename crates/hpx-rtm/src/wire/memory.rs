//! In-process wire for tests, built with the `testing` feature.
//!
//! [`memory_pair`] returns the client side ([`MemoryWire`]) and a
//! [`MemoryPeer`] that plays the service: it injects inbound frames and
//! observes what the client wrote. The outbound direction is bounded, so a
//! peer that stops reading stalls the client's writer.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use super::{BoxWire, Dialer, Frame};
use crate::error::{RtmError, RtmResult};

/// Client half of an in-memory connection.
pub struct MemoryWire {
    inbound: mpsc::UnboundedReceiver<RtmResult<Frame>>,
    outbound: PollSender<Frame>,
}

impl Stream for MemoryWire {
    type Item = RtmResult<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inbound.poll_recv(cx)
    }
}

fn peer_gone() -> RtmError {
    RtmError::connection_closed(Some("memory peer dropped".to_string()))
}

impl Sink<Frame> for MemoryWire {
    type Error = RtmError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().outbound)
            .poll_ready(cx)
            .map_err(|_| peer_gone())
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().outbound)
            .start_send(item)
            .map_err(|_| peer_gone())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().outbound.close();
        Poll::Ready(Ok(()))
    }
}

/// Service half of an in-memory connection.
pub struct MemoryPeer {
    endpoint: String,
    inject: Option<mpsc::UnboundedSender<RtmResult<Frame>>>,
    written: mpsc::Receiver<Frame>,
}

impl MemoryPeer {
    /// Endpoint the client dialed.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver a frame to the client.
    pub fn send(&self, frame: Frame) -> RtmResult<()> {
        let inject = self.inject.as_ref().ok_or_else(peer_gone)?;
        inject
            .send(Ok(frame))
            .map_err(|_| RtmError::connection_closed(Some("memory wire dropped".to_string())))
    }

    pub fn send_text(&self, text: impl Into<String>) -> RtmResult<()> {
        self.send(Frame::Text(text.into()))
    }

    pub fn send_json(&self, value: &Value) -> RtmResult<()> {
        self.send_text(serde_json::to_string(value)?)
    }

    /// Make the client's next read fail with `error`.
    pub fn fail(&self, error: RtmError) -> RtmResult<()> {
        let inject = self.inject.as_ref().ok_or_else(peer_gone)?;
        inject
            .send(Err(error))
            .map_err(|_| RtmError::connection_closed(Some("memory wire dropped".to_string())))
    }

    /// End the inbound stream; the client sees end of stream.
    pub fn close(&mut self) {
        self.inject = None;
    }

    /// Make every further write by the client fail. Inbound stays open.
    pub fn refuse_writes(&mut self) {
        self.written.close();
    }

    /// Next frame written by the client. `None` once the client closed its
    /// sink and everything was read.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.written.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.written.try_recv().ok()
    }

    /// Next text frame, skipping transport control frames.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Close => return None,
                _ => continue,
            }
        }
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }
}

/// Create a connected wire and peer. `capacity` bounds frames written by the
/// client and not yet read by the peer.
pub fn memory_pair(endpoint: impl Into<String>, capacity: usize) -> (MemoryWire, MemoryPeer) {
    let (inject_tx, inject_rx) = mpsc::unbounded_channel();
    let (written_tx, written_rx) = mpsc::channel(capacity.max(1));

    let wire = MemoryWire {
        inbound: inject_rx,
        outbound: PollSender::new(written_tx),
    };
    let peer = MemoryPeer {
        endpoint: endpoint.into(),
        inject: Some(inject_tx),
        written: written_rx,
    };
    (wire, peer)
}

/// A [`Dialer`] that hands each new connection's peer to a [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryDialer {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    capacity: usize,
    refuse: Arc<AtomicBool>,
}

impl MemoryDialer {
    /// Make subsequent dials fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, endpoint: &str, _timeout: Duration) -> RtmResult<BoxWire> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RtmError::dial(endpoint, "connection refused"));
        }

        let (wire, peer) = memory_pair(endpoint, self.capacity);
        self.peers
            .send(peer)
            .map_err(|_| RtmError::dial(endpoint, "listener dropped"))?;
        Ok(Box::new(wire))
    }
}

/// Receives the peer side of every connection a [`MemoryDialer`] opens.
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// Create a dialer and the listener that observes its connections.
pub fn memory_dialer(capacity: usize) -> (MemoryDialer, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dialer = MemoryDialer {
        peers: tx,
        capacity,
        refuse: Arc::new(AtomicBool::new(false)),
    };
    (dialer, MemoryListener { peers: rx })
}
