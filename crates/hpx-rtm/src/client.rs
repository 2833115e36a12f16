//! The managed connection client.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::RtmConfig,
    decoder::{EventDecoder, JsonDecoder},
    error::{RtmError, RtmResult},
    events::{EventSink, EventStream},
    link::{self, LinkParts},
    message::{OutgoingMessage, QueuedMessage},
    probe::ProbeTracker,
    sequencer::Sequencer,
    session::{SessionInfo, SessionProvider, SessionStart},
    state::{ConnectionPhase, ConnectionSnapshot, ConnectionState},
    types::{ConnectionEpoch, MessageId},
    wire::{BoxWire, Dialer},
};

/// State shared between the client handles and the link tasks.
pub(crate) struct Shared<D: EventDecoder> {
    pub(crate) config: RtmConfig,
    pub(crate) session: Arc<dyn SessionProvider>,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) decoder: D,
    pub(crate) state: ConnectionState,
    pub(crate) sequencer: Sequencer,
    pub(crate) probes: ProbeTracker,
    pub(crate) events: EventStream<D::Event>,
    sink: EventSink<D::Event>,
    enqueue: parking_lot::Mutex<()>,
}

impl<D: EventDecoder> Shared<D> {
    pub(crate) fn new(
        config: RtmConfig,
        session: Arc<dyn SessionProvider>,
        dialer: Arc<dyn Dialer>,
        decoder: D,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.incoming_capacity);
        Self {
            config,
            session,
            dialer,
            decoder,
            state: ConnectionState::new(),
            sequencer: Sequencer::new(),
            probes: ProbeTracker::new(),
            events: EventStream::new(events_rx),
            sink: EventSink::new(events_tx),
            enqueue: parking_lot::Mutex::new(()),
        }
    }

    pub(crate) fn event_sink(&self) -> EventSink<D::Event> {
        self.sink.clone()
    }
}

/// Rolls the phase back to `Disconnected` unless the connect attempt got as
/// far as installing a link. Covers both error returns and a dropped future.
struct ConnectGuard<'a> {
    state: &'a ConnectionState,
    armed: bool,
}

impl<'a> ConnectGuard<'a> {
    fn new(state: &'a ConnectionState) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.abort_connect();
        }
    }
}

struct ClientInner<D: EventDecoder> {
    shared: Arc<Shared<D>>,
}

impl<D: EventDecoder> Drop for ClientInner<D> {
    fn drop(&mut self) {
        if let Some(stop) = self.shared.state.live_stop() {
            debug!("Last client handle dropped, closing connection");
            stop.cancel();
        }
    }
}

/// A managed real-time connection.
///
/// Cheap to clone; all clones drive the same connection. Dropping the last
/// clone closes a live connection.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use hpx_rtm::{OutgoingMessage, RtmClient, RtmConfig, RtmEvent, SessionInfo, StaticSession};
///
/// # async fn run() -> hpx_rtm::RtmResult<()> {
/// let session = StaticSession::new(SessionInfo {
///     url: "wss://rtm.example.com/websocket".to_string(),
///     ..Default::default()
/// });
/// let client = RtmClient::tungstenite(RtmConfig::default(), session)?;
/// client.connect().await?;
///
/// client
///     .send_message(OutgoingMessage::new("C024BE91L", "Hello world"))
///     .await?;
///
/// let events = client.events();
/// while let Some(event) = events.recv().await {
///     if let RtmEvent::Disconnected { .. } = event {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct RtmClient<D: EventDecoder = JsonDecoder> {
    inner: Arc<ClientInner<D>>,
}

impl<D: EventDecoder> Clone for RtmClient<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RtmClient<JsonDecoder> {
    /// Create a client that yields inbound events as JSON values.
    pub fn new(
        config: RtmConfig,
        session: impl SessionProvider,
        dialer: impl Dialer,
    ) -> RtmResult<Self> {
        Self::with_decoder(config, session, dialer, JsonDecoder)
    }

    /// Create a client that dials with `tokio-tungstenite`.
    #[cfg(feature = "tungstenite")]
    pub fn tungstenite(config: RtmConfig, session: impl SessionProvider) -> RtmResult<Self> {
        Self::new(config, session, crate::wire::TungsteniteDialer::new())
    }
}

impl<D: EventDecoder> RtmClient<D> {
    /// Create a client with a custom inbound decoder.
    pub fn with_decoder(
        config: RtmConfig,
        session: impl SessionProvider,
        dialer: impl Dialer,
        decoder: D,
    ) -> RtmResult<Self> {
        Self::from_parts(config, Arc::new(session), Arc::new(dialer), decoder)
    }

    /// Create a client from shared collaborators.
    pub fn from_parts(
        config: RtmConfig,
        session: Arc<dyn SessionProvider>,
        dialer: Arc<dyn Dialer>,
        decoder: D,
    ) -> RtmResult<Self> {
        config.validate().map_err(RtmError::config)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                shared: Arc::new(Shared::new(config, session, dialer, decoder)),
            }),
        })
    }

    fn shared(&self) -> &Arc<Shared<D>> {
        &self.inner.shared
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start a session, dial, and start the connection loops.
    ///
    /// With `wait_for_hello` (the default) this returns once the service has
    /// sent `hello`, so [`session_info`](Self::session_info) is populated.
    pub async fn connect(&self) -> RtmResult<ConnectionEpoch> {
        let shared = self.shared();
        let config = &shared.config;
        shared.state.begin_connect()?;
        let guard = ConnectGuard::new(&shared.state);

        let (start, wire) = match self.open().await {
            Ok(opened) => opened,
            Err(err) => {
                warn!(error = %err, "Connect failed");
                return Err(err);
            }
        };

        shared.sequencer.reset();
        let stop = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.outgoing_capacity);
        let (done_tx, mut done_rx) = watch::channel(false);
        let (hello_tx, hello_rx) = oneshot::channel();

        let epoch = shared
            .state
            .install(stop.clone(), outgoing_tx, done_rx.clone())?;
        guard.disarm();

        tokio::spawn(link::supervise(
            Arc::clone(shared),
            wire,
            LinkParts {
                epoch,
                stop,
                outgoing: outgoing_rx,
                done: done_tx,
                hello: hello_tx,
                session: start.info,
            },
        ));

        if !config.wait_for_hello {
            return Ok(epoch);
        }

        match timeout(config.hello_timeout, hello_rx).await {
            Ok(Ok(())) => Ok(epoch),
            Ok(Err(_)) => {
                let _ = done_rx.wait_for(|done| *done).await;
                Err(RtmError::handshake("connection closed before hello"))
            }
            Err(_) => {
                warn!(%epoch, timeout = ?config.hello_timeout, "No hello from service");
                if let Ok(link) = shared.state.begin_teardown(Some(epoch), false) {
                    link.stop.cancel();
                }
                let _ = done_rx.wait_for(|done| *done).await;
                Err(RtmError::handshake(format!(
                    "no hello within {:?}",
                    config.hello_timeout
                )))
            }
        }
    }

    async fn open(&self) -> RtmResult<(SessionStart, BoxWire)> {
        let shared = self.shared();
        let connect_timeout = shared.config.connect_timeout;

        let start = shared.session.start_session().await?;
        info!(endpoint = %start.endpoint, "Connecting");

        let wire = timeout(
            connect_timeout,
            shared.dialer.dial(&start.endpoint, connect_timeout),
        )
        .await
        .map_err(|_| RtmError::timeout(connect_timeout))??;

        Ok((start, wire))
    }

    /// Close the live connection and wait until all of its loops stopped.
    ///
    /// Fails with [`RtmError::NotConnected`] if there is nothing to close.
    pub async fn disconnect(&self) -> RtmResult<()> {
        let link = self.shared().state.begin_teardown(None, true)?;
        info!(epoch = %link.epoch, "Disconnecting");
        link.stop.cancel();
        link.wait_closed().await;
        Ok(())
    }

    /// Connect again after a disconnect.
    ///
    /// One attempt, no backoff; retry policy belongs to the caller.
    pub async fn reconnect(&self) -> RtmResult<ConnectionEpoch> {
        if self.is_connected() {
            return Err(RtmError::AlreadyConnected);
        }
        self.connect().await
    }

    // ─── Outbound ────────────────────────────────────────────────────────

    /// Queue a message, waiting while the queue is full.
    ///
    /// Returns the identifier the message was sent with. Replies from the
    /// service reference it as `reply_to`.
    pub async fn send_message(&self, message: OutgoingMessage) -> RtmResult<MessageId> {
        let sender = self.prepare(&message)?;
        let permit = sender.reserve().await.map_err(|_| link_closed())?;
        self.enqueue(&sender, permit, &message)
    }

    /// Queue a message without waiting. Fails with [`RtmError::QueueFull`].
    pub fn try_send_message(&self, message: OutgoingMessage) -> RtmResult<MessageId> {
        let sender = self.prepare(&message)?;
        let permit = sender.try_reserve().map_err(|err| match err {
            TrySendError::Full(()) => RtmError::QueueFull,
            TrySendError::Closed(()) => link_closed(),
        })?;
        self.enqueue(&sender, permit, &message)
    }

    /// Queue a message, waiting at most `wait` for room.
    pub async fn send_message_timeout(
        &self,
        message: OutgoingMessage,
        wait: Duration,
    ) -> RtmResult<MessageId> {
        let sender = self.prepare(&message)?;
        let permit = timeout(wait, sender.reserve())
            .await
            .map_err(|_| RtmError::timeout(wait))?
            .map_err(|_| link_closed())?;
        self.enqueue(&sender, permit, &message)
    }

    /// Queue a message, logging instead of returning a rejection.
    pub async fn submit(&self, message: OutgoingMessage) {
        if let Err(err) = self.send_message(message).await {
            warn!(error = %err, "Dropping outgoing message");
        }
    }

    fn prepare(&self, message: &OutgoingMessage) -> RtmResult<mpsc::Sender<QueuedMessage>> {
        let shared = self.shared();
        message.validate(shared.config.max_message_text_len)?;
        shared.state.outgoing_sender()
    }

    fn enqueue(
        &self,
        sender: &mpsc::Sender<QueuedMessage>,
        permit: mpsc::Permit<'_, QueuedMessage>,
        message: &OutgoingMessage,
    ) -> RtmResult<MessageId> {
        let shared = self.shared();
        let _guard = shared.enqueue.lock();
        if sender.is_closed() {
            return Err(link_closed());
        }

        let id = shared.sequencer.next_id();
        let payload = message.encode(id)?;
        permit.send(QueuedMessage { id, payload });
        debug!(%id, channel = %message.channel, "Message queued");
        Ok(id)
    }

    /// Messages waiting for the writer on the live connection.
    pub fn outgoing_queue_len(&self) -> usize {
        self.shared()
            .state
            .outgoing_sender()
            .map(|sender| sender.max_capacity() - sender.capacity())
            .unwrap_or(0)
    }

    // ─── Inspection ──────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.snapshot().is_connected
    }

    /// Whether the most recent teardown was requested by the caller.
    pub fn was_intentional(&self) -> bool {
        self.snapshot().was_intentional
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.snapshot().phase
    }

    /// Epoch of the most recent successful connect.
    pub fn epoch(&self) -> ConnectionEpoch {
        self.snapshot().epoch
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared().state.snapshot()
    }

    /// Session metadata, available between `hello` and teardown.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared().state.session_info()
    }

    /// Inbound events. All handles returned here share one queue.
    pub fn events(&self) -> EventStream<D::Event> {
        self.shared().events.clone()
    }

    /// The session provider this client bootstraps connections with.
    pub fn session(&self) -> &Arc<dyn SessionProvider> {
        &self.shared().session
    }

    pub fn config(&self) -> &RtmConfig {
        &self.shared().config
    }

    /// Liveness probes written and not yet answered.
    pub fn outstanding_probes(&self) -> usize {
        self.shared().probes.len()
    }
}

fn link_closed() -> RtmError {
    RtmError::connection_closed(Some("connection torn down".to_string()))
}
