//! Detection of sent transactions that were dropped by the network.
//!
//! A transaction is only considered cancelled once the node has reported it missing from both the
//! pool and the chain on [`CANCELLED_TRANSACTION_THRESHOLD`] consecutive checks. A single
//! inconsistent node response therefore never returns funds to the wallet.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::primitives::TxHash;

/// Consecutive misses before a transaction is reported as cancelled.
pub const CANCELLED_TRANSACTION_THRESHOLD: u32 = 10;

/// Tracks how many consecutive checks each missing transaction has failed.
#[derive(Debug, Default, Clone)]
pub struct CancelledTransactions {
    fail_counts: HashMap<TxHash, u32>,
}

impl CancelledTransactions {
    /// Create new CancelledTransactions with nothing tracked
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the fail counts with the hashes the node currently reports missing.
    ///
    /// Returns the hashes that reached the threshold on this check. They are no longer tracked.
    /// Tracked hashes that are no longer missing are forgotten.
    pub fn check(&mut self, missing_hashes: &[TxHash]) -> Vec<TxHash> {
        let missing = missing_hashes.iter().collect::<HashSet<_>>();
        self.fail_counts.retain(|hash, _| missing.contains(hash));

        let mut seen = HashSet::new();
        let mut cancelled = Vec::new();
        for hash in missing_hashes {
            if !seen.insert(hash) {
                continue;
            }

            match self.fail_counts.entry(*hash) {
                Entry::Occupied(mut entry) => {
                    *entry.get_mut() += 1;
                    if *entry.get() >= CANCELLED_TRANSACTION_THRESHOLD {
                        entry.remove();
                        cancelled.push(*hash);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(1);
                }
            }
        }

        cancelled
    }

    /// Consecutive misses recorded for `hash`, `None` if it is not tracked.
    pub fn fail_count(&self, hash: &TxHash) -> Option<u32> {
        self.fail_counts.get(hash).copied()
    }

    /// Number of tracked transactions
    pub fn len(&self) -> usize {
        self.fail_counts.len()
    }

    /// Returns `true` if no transactions are tracked
    pub fn is_empty(&self) -> bool {
        self.fail_counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    const HASH: TxHash = TxHash::from_bytes([1; 32]);
    const OTHER: TxHash = TxHash::from_bytes([2; 32]);

    #[test]
    fn emitted_once_after_ten_consecutive_misses() {
        let mut tracker = CancelledTransactions::new();

        for check in 1..CANCELLED_TRANSACTION_THRESHOLD {
            assert!(tracker.check(&[HASH]).is_empty());
            assert_eq!(tracker.fail_count(&HASH), Some(check));
        }

        assert_eq!(tracker.check(&[HASH]), vec![HASH]);
        assert_eq!(tracker.fail_count(&HASH), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn reappearing_on_tenth_check_is_never_emitted() {
        let mut tracker = CancelledTransactions::new();

        for _ in 1..CANCELLED_TRANSACTION_THRESHOLD {
            assert!(tracker.check(&[HASH]).is_empty());
        }

        assert!(tracker.check(&[]).is_empty());
        assert_eq!(tracker.fail_count(&HASH), None);
    }

    #[test_case(&[HASH, HASH] ; "duplicate hashes count once")]
    #[test_case(&[HASH, OTHER] ; "independent hashes")]
    fn first_miss_starts_at_one(missing: &[TxHash]) {
        let mut tracker = CancelledTransactions::new();

        assert!(tracker.check(missing).is_empty());
        for hash in missing {
            assert_eq!(tracker.fail_count(hash), Some(1));
        }
    }

    #[test]
    fn hashes_are_tracked_independently() {
        let mut tracker = CancelledTransactions::new();

        for _ in 0..5 {
            tracker.check(&[HASH]);
        }
        for _ in 0..4 {
            assert!(tracker.check(&[HASH, OTHER]).is_empty());
        }

        assert_eq!(tracker.check(&[HASH, OTHER]), vec![HASH]);
        assert_eq!(tracker.fail_count(&OTHER), Some(5));
        assert_eq!(tracker.fail_count(&HASH), None);
    }

    proptest! {
        #[test]
        fn only_an_unbroken_run_cancels(run in 1u32..30) {
            let mut tracker = CancelledTransactions::new();
            let mut emitted = 0;
            for _ in 0..run {
                emitted += tracker.check(&[HASH]).len();
            }
            prop_assert_eq!(emitted as u32, run / CANCELLED_TRANSACTION_THRESHOLD);

            prop_assert!(tracker.check(&[]).is_empty());
            prop_assert!(tracker.is_empty());
        }
    }
}
