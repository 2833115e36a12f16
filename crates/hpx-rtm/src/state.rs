//! Connection state: the live link and the flags that describe it.
//!
//! Everything here sits behind one `parking_lot::Mutex`, so a reader never
//! sees `is_connected` disagree with the presence of the link.

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{RtmError, RtmResult},
    message::QueuedMessage,
    session::SessionInfo,
    types::ConnectionEpoch,
};

/// Lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No link, no connect in progress.
    Disconnected,
    /// Session bootstrap or dial in progress.
    Connecting,
    /// A link is installed.
    Connected,
    /// The link was taken down; loops are still stopping.
    Closing,
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// A consistent view of [`ConnectionState`] taken under its lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub phase: ConnectionPhase,
    pub is_connected: bool,
    pub was_intentional: bool,
    pub has_link: bool,
    /// Epoch of the most recent successful connect.
    pub epoch: ConnectionEpoch,
}

/// Handle to one live connection.
pub(crate) struct Link {
    pub(crate) epoch: ConnectionEpoch,
    pub(crate) stop: CancellationToken,
    pub(crate) outgoing: mpsc::Sender<QueuedMessage>,
    done: watch::Receiver<bool>,
}

impl Link {
    /// Wait until the link supervisor has finished.
    pub(crate) async fn wait_closed(mut self) {
        let _ = self.done.wait_for(|done| *done).await;
    }
}

struct StateInner {
    phase: ConnectionPhase,
    link: Option<Link>,
    is_connected: bool,
    was_intentional: bool,
    session: Option<SessionInfo>,
    epoch: ConnectionEpoch,
}

pub(crate) struct ConnectionState {
    inner: Mutex<StateInner>,
}

impl ConnectionState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                phase: ConnectionPhase::Disconnected,
                link: None,
                is_connected: false,
                was_intentional: true,
                session: None,
                epoch: ConnectionEpoch::default(),
            }),
        }
    }

    pub(crate) fn begin_connect(&self) -> RtmResult<()> {
        let mut inner = self.inner.lock();
        match inner.phase {
            ConnectionPhase::Disconnected => {
                inner.phase = ConnectionPhase::Connecting;
                Ok(())
            }
            ConnectionPhase::Connecting | ConnectionPhase::Connected => {
                Err(RtmError::AlreadyConnected)
            }
            ConnectionPhase::Closing => Err(RtmError::Closing),
        }
    }

    pub(crate) fn abort_connect(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == ConnectionPhase::Connecting {
            inner.phase = ConnectionPhase::Disconnected;
        }
    }

    /// Store a freshly dialed link. Returns its epoch.
    pub(crate) fn install(
        &self,
        stop: CancellationToken,
        outgoing: mpsc::Sender<QueuedMessage>,
        done: watch::Receiver<bool>,
    ) -> RtmResult<ConnectionEpoch> {
        let mut inner = self.inner.lock();
        if inner.phase != ConnectionPhase::Connecting {
            return Err(RtmError::internal(format!(
                "install while {:?}",
                inner.phase
            )));
        }

        let epoch = inner.epoch.next();
        inner.epoch = epoch;
        inner.link = Some(Link {
            epoch,
            stop,
            outgoing,
            done,
        });
        inner.is_connected = true;
        inner.phase = ConnectionPhase::Connected;
        info!(%epoch, "Connection established");
        Ok(epoch)
    }

    /// Take the link out of the state.
    ///
    /// With `Some(epoch)`, only a link of that epoch is taken. The caller
    /// must cancel the returned link's stop token.
    pub(crate) fn begin_teardown(
        &self,
        epoch: Option<ConnectionEpoch>,
        intentional: bool,
    ) -> RtmResult<Link> {
        let mut inner = self.inner.lock();
        let matches = match (&inner.link, epoch) {
            (Some(link), Some(epoch)) => link.epoch == epoch,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return Err(RtmError::NotConnected);
        }

        let link = inner.link.take().ok_or(RtmError::NotConnected)?;
        inner.is_connected = false;
        inner.was_intentional = intentional;
        inner.phase = ConnectionPhase::Closing;
        debug!(epoch = %link.epoch, intentional, "Connection closing");
        Ok(link)
    }

    /// Complete a teardown once every loop has stopped.
    pub(crate) fn finish_teardown(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase == ConnectionPhase::Closing {
            inner.phase = ConnectionPhase::Disconnected;
        }
        inner.was_intentional
    }

    pub(crate) fn publish_session(&self, epoch: ConnectionEpoch, info: SessionInfo) -> bool {
        let mut inner = self.inner.lock();
        let live = inner.link.as_ref().is_some_and(|link| link.epoch == epoch);
        if live {
            inner.session = Some(info);
        }
        live
    }

    pub(crate) fn session_info(&self) -> Option<SessionInfo> {
        self.inner.lock().session.clone()
    }

    pub(crate) fn clear_session(&self) {
        self.inner.lock().session = None;
    }

    pub(crate) fn outgoing_sender(&self) -> RtmResult<mpsc::Sender<QueuedMessage>> {
        self.inner
            .lock()
            .link
            .as_ref()
            .map(|link| link.outgoing.clone())
            .ok_or(RtmError::NotConnected)
    }

    /// Stop token of the live link, if any.
    pub(crate) fn live_stop(&self) -> Option<CancellationToken> {
        self.inner.lock().link.as_ref().map(|link| link.stop.clone())
    }

    pub(crate) fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.lock();
        ConnectionSnapshot {
            phase: inner.phase,
            is_connected: inner.is_connected,
            was_intentional: inner.was_intentional,
            has_link: inner.link.is_some(),
            epoch: inner.epoch,
        }
    }
}
