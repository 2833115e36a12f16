//! Outstanding liveness probe bookkeeping using `scc::HashMap`.

use std::time::{Duration, Instant};

use crate::{
    error::{RtmError, RtmResult},
    types::MessageId,
};

/// Tracks probes that have been written but not yet answered.
///
/// Entries are removed when their pong arrives, when they age past the
/// liveness window, or all at once on teardown.
#[derive(Debug, Default)]
pub struct ProbeTracker {
    outstanding: scc::HashMap<MessageId, Instant>,
}

impl ProbeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe send time.
    pub fn record(&self, id: MessageId, sent_at: Instant) -> RtmResult<()> {
        self.outstanding
            .insert_sync(id, sent_at)
            .map_err(|_| RtmError::DuplicateId { id })
    }

    /// Remove a probe on acknowledgement, returning when it was sent.
    pub fn resolve(&self, id: MessageId) -> Option<Instant> {
        self.outstanding.remove_sync(&id).map(|(_, sent_at)| sent_at)
    }

    /// Discard every outstanding probe. Returns how many were dropped.
    pub fn clear_all(&self) -> usize {
        let count = self.outstanding.len();
        self.outstanding.clear_sync();
        count
    }

    /// Remove probes older than `window`, oldest identifier first.
    pub fn expire_older_than(&self, window: Duration) -> Vec<MessageId> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.outstanding.retain_sync(|id, sent_at| {
            if now.saturating_duration_since(*sent_at) >= window {
                expired.push(*id);
                false
            } else {
                true
            }
        });
        expired.sort_unstable();
        expired
    }

    /// Age of the oldest outstanding probe.
    pub fn oldest_age(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut oldest: Option<Instant> = None;
        self.outstanding.retain_sync(|_, sent_at| {
            if oldest.is_none_or(|current| *sent_at < current) {
                oldest = Some(*sent_at);
            }
            true
        });
        oldest.map(|sent_at| now.saturating_duration_since(sent_at))
    }

    /// Number of outstanding probes.
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// Returns `true` if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}
