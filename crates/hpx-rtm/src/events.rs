//! Inbound event fan-out.
//!
//! Every decoded protocol event and every lifecycle notification goes through
//! one bounded channel. The reader blocks when it is full, so nothing is
//! dropped and the order on the wire is the order consumers observe.

use std::{sync::Arc, time::Duration};

use futures_util::Stream;
use tokio::{
    sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::RtmError,
    session::SessionInfo,
    timestamp::TimeString,
    types::{ConnectionEpoch, MessageId},
};

/// A decoded inbound record with its envelope metadata.
#[derive(Clone, Debug)]
pub struct InboundEvent<E> {
    /// Envelope `type` tag.
    pub type_tag: String,
    /// Envelope `ts`, when present.
    pub timestamp: Option<TimeString>,
    /// Decoder output.
    pub data: E,
}

/// Everything a consumer can observe on an [`EventStream`].
#[derive(Debug)]
pub enum RtmEvent<E> {
    /// A link is installed and its loops are running.
    Connected { epoch: ConnectionEpoch },
    /// The service completed the protocol handshake.
    Hello { info: SessionInfo },
    /// The link is gone and all loops have stopped.
    Disconnected {
        epoch: ConnectionEpoch,
        intentional: bool,
        reason: Option<String>,
    },
    /// A liveness probe was answered.
    LatencyReport { latency: Duration },
    /// The service accepted message `reply_to`.
    Ack {
        reply_to: MessageId,
        timestamp: Option<TimeString>,
        text: Option<String>,
    },
    /// The service rejected message `reply_to`.
    AckError {
        reply_to: MessageId,
        code: i64,
        message: String,
    },
    /// Writing message `id` failed; the link is being torn down.
    OutgoingError { id: MessageId, error: RtmError },
    /// An inbound payload could not be decoded. The connection stays up.
    DecodeError {
        type_tag: Option<String>,
        raw: String,
        error: RtmError,
    },
    /// A domain event.
    Event(InboundEvent<E>),
}

impl<E> RtmEvent<E> {
    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Hello { .. } => "hello",
            Self::Disconnected { .. } => "disconnected",
            Self::LatencyReport { .. } => "latency_report",
            Self::Ack { .. } => "ack",
            Self::AckError { .. } => "ack_error",
            Self::OutgoingError { .. } => "outgoing_error",
            Self::DecodeError { .. } => "decode_error",
            Self::Event(_) => "event",
        }
    }
}

/// Consumer handle for inbound events.
///
/// Clones share one queue: every event is delivered to exactly one of them.
pub struct EventStream<E> {
    rx: Arc<Mutex<mpsc::Receiver<RtmEvent<E>>>>,
}

impl<E> Clone for EventStream<E> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<E: Send + 'static> EventStream<E> {
    pub(crate) fn new(rx: mpsc::Receiver<RtmEvent<E>>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wait for the next event. `None` once the client and all of its
    /// connections are gone.
    pub async fn recv(&self) -> Option<RtmEvent<E>> {
        self.rx.lock().await.recv().await
    }

    /// Take an event if one is ready.
    pub fn try_recv(&self) -> Option<RtmEvent<E>> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = RtmEvent<E>> + Send {
        futures_util::stream::unfold(self, |events| async move {
            let event = events.recv().await?;
            Some((event, events))
        })
    }
}

/// Producer side, owned by the client and its link tasks.
///
/// Events that must not be lost but must not block teardown (write failures,
/// `Disconnected`) go through [`publish_final`](Self::publish_final). When the
/// channel is full they are parked in one delivery task per client; later
/// final events chain behind it and the next link's reader waits for it, so
/// consumers still observe them in order.
pub(crate) struct EventSink<E> {
    tx: mpsc::Sender<RtmEvent<E>>,
    backlog: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            backlog: Arc::clone(&self.backlog),
        }
    }
}

impl<E: Send + 'static> EventSink<E> {
    pub(crate) fn new(tx: mpsc::Sender<RtmEvent<E>>) -> Self {
        Self {
            tx,
            backlog: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Blocking publish that gives up when `stop` fires.
    ///
    /// Returns `false` if the event was not delivered.
    pub(crate) async fn publish(&self, event: RtmEvent<E>, stop: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            res = self.tx.send(event) => res.is_ok(),
        }
    }

    /// Queue an event without waiting on consumers. It is never dropped while
    /// a consumer handle exists, and never overtakes an earlier final event.
    pub(crate) fn publish_final(&self, event: RtmEvent<E>) {
        let mut backlog = self.backlog.lock();
        let previous = backlog.take().filter(|task| !task.is_finished());

        let event = match previous {
            Some(_) => event,
            None => match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(event)) => event,
                Err(TrySendError::Closed(_)) => return,
            },
        };

        debug!(kind = event.kind(), "Event channel full, deferring delivery");
        let tx = self.tx.clone();
        *backlog = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let _ = tx.send(event).await;
        }));
    }

    /// Wait until every deferred final event has been delivered.
    ///
    /// Returns `false` if `stop` fired first; the backlog is kept.
    pub(crate) async fn flush_backlog(&self, stop: &CancellationToken) -> bool {
        let Some(mut task) = self.backlog.lock().take() else {
            return true;
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                let mut backlog = self.backlog.lock();
                if backlog.is_none() {
                    *backlog = Some(task);
                } else {
                    // A newer final event is already chained behind it.
                    warn!("Deferred event delivery detached during stop");
                }
                false
            }
            _ = &mut task => true,
        }
    }
}
