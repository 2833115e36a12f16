//! Message identifier allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::MessageId;

/// Issues strictly increasing [`MessageId`]s shared by messages and probes.
#[derive(Debug, Default)]
pub struct Sequencer {
    last: AtomicU64,
}

impl Sequencer {
    /// Create a sequencer whose first identifier is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier.
    pub fn next_id(&self) -> MessageId {
        MessageId::new(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Start a new epoch; the next identifier is 1 again.
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }

    /// The most recently issued raw identifier, 0 if none.
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc};

    use super::*;

    #[test]
    fn test_starts_at_one() {
        let seq = Sequencer::new();
        assert_eq!(seq.last_issued(), 0);
        assert_eq!(seq.next_id(), MessageId::new(1));
        assert_eq!(seq.next_id(), MessageId::new(2));
        assert_eq!(seq.last_issued(), 2);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let seq = Sequencer::new();
        for _ in 0..5 {
            seq.next_id();
        }
        seq.reset();
        assert_eq!(seq.next_id(), MessageId::new(1));
    }

    #[test]
    fn test_concurrent_ids_have_no_gaps() {
        let seq = Arc::new(Sequencer::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..500).map(|_| seq.next_id().get()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = BTreeSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }

        assert_eq!(all.len(), 4000);
        assert_eq!(all.first(), Some(&1));
        assert_eq!(all.last(), Some(&4000));
    }
}
