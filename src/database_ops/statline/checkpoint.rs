use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared offset counter the download workers claim disjoint ranges from.
///
/// Reset at the start of each run; a run that restarts after a crash claims
/// from zero again and relies on the merge pass being idempotent, not on
/// any persisted counter state.
#[derive(Debug, Clone, Default)]
pub struct OffsetCounter {
    next: Arc<AtomicU64>,
}

impl OffsetCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserve `[returned, returned + batch_size)`. Ranges are
    /// disjoint by construction, so racing claim order is irrelevant.
    pub fn claim_next_batch(&self, batch_size: u64) -> u64 {
        self.next.fetch_add(batch_size, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_claims_are_sequential() {
        let counter = OffsetCounter::new();
        assert_eq!(counter.claim_next_batch(10_000), 0);
        assert_eq!(counter.claim_next_batch(10_000), 10_000);
        assert_eq!(counter.claim_next_batch(5_000), 20_000);
        assert_eq!(counter.claim_next_batch(10_000), 25_000);
    }

    #[test]
    fn test_concurrent_claims_never_overlap_or_skip() {
        let counter = OffsetCounter::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| counter.claim_next_batch(100)).collect::<Vec<u64>>()
            }));
        }

        let mut starts = HashSet::new();
        for h in handles {
            for start in h.join().unwrap() {
                assert!(starts.insert(start), "offset {start} claimed twice");
                assert_eq!(start % 100, 0);
            }
        }
        // 8 threads x 250 claims of 100 rows: every range up to 200_000
        // must have been handed out exactly once.
        assert_eq!(starts.len(), 2_000);
        assert_eq!(counter.claim_next_batch(100), 200_000);
    }
}
