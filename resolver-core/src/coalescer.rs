//! C3 — Request Coalescer.
//!
//! Holds the in-flight marker map and is the single choke point for
//! per-key concurrency control: the claim-or-join primitive here is what
//! makes the service stampede-proof. Correctness under parallel execution
//! hinges on `try_claim` and `release` sharing one lock per map, not one
//! lock per key — striping would reopen the race the spec forbids (two
//! workers observing `Claimed` for the same key at once).

use std::collections::HashSet;

use ahash::HashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::CacheKey;

/// A per-key record that a resolution is currently running.
#[derive(Debug, Clone)]
pub struct InFlightMarker {
    /// Requester tags waiting on this resolution.
    pub waiters: HashSet<String>,
    /// When this marker was created.
    pub enqueued_at: Instant,
}

/// Outcome of [`RequestCoalescer::try_claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No marker existed; the caller is now responsible for enqueueing a
    /// [`crate::types::LookupRequest`].
    Claimed,
    /// A marker already existed; the caller's tag was added as a waiter.
    AlreadyInFlight,
}

/// Coalesces concurrent callers for the same [`CacheKey`] onto a single
/// in-flight resolution.
pub struct RequestCoalescer {
    in_flight: Mutex<HashMap<CacheKey, InFlightMarker>>,
}

impl Default for RequestCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCoalescer {
    /// Construct an empty coalescer.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::default()),
        }
    }

    /// Attempt to claim `key` for `tag`.
    ///
    /// Single critical section: if no marker exists, create one containing
    /// `{tag}` and return [`ClaimOutcome::Claimed`]; otherwise add `tag` to
    /// the existing marker's waiter set and return
    /// [`ClaimOutcome::AlreadyInFlight`].
    pub fn try_claim(&self, key: CacheKey, tag: &str) -> ClaimOutcome {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get_mut(&key) {
            Some(marker) => {
                marker.waiters.insert(tag.to_string());
                ClaimOutcome::AlreadyInFlight
            }
            None => {
                let mut waiters = HashSet::new();
                waiters.insert(tag.to_string());
                in_flight.insert(
                    key,
                    InFlightMarker {
                        waiters,
                        enqueued_at: Instant::now(),
                    },
                );
                ClaimOutcome::Claimed
            }
        }
    }

    /// Undo a claim made by [`Self::try_claim`] without a corresponding
    /// enqueue succeeding (the `Overloaded` path: §4.4's claim/enqueue
    /// ordering requires the marker be removed again).
    pub fn undo_claim(&self, key: &CacheKey) {
        self.in_flight.lock().remove(key);
    }

    /// Atomically remove the marker for `key` and return its waiter set.
    pub fn release(&self, key: &CacheKey) -> HashSet<String> {
        self.in_flight
            .lock()
            .remove(key)
            .map(|marker| marker.waiters)
            .unwrap_or_default()
    }

    /// Current waiters for `key`, without mutating state. Used by
    /// [`crate::notifier::CompletionNotifier`] callers that want to peek.
    pub fn waiters(&self, key: &CacheKey) -> HashSet<String> {
        self.in_flight
            .lock()
            .get(key)
            .map(|marker| marker.waiters.clone())
            .unwrap_or_default()
    }

    /// Whether a marker currently exists for `key`.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins_subsequent_callers_join() {
        let coalescer = RequestCoalescer::new();
        let key = CacheKey([1u8; 32]);
        assert_eq!(coalescer.try_claim(key, "ns/a"), ClaimOutcome::Claimed);
        assert_eq!(coalescer.try_claim(key, "ns/b"), ClaimOutcome::AlreadyInFlight);
        assert_eq!(coalescer.try_claim(key, "ns/c"), ClaimOutcome::AlreadyInFlight);
        let waiters = coalescer.waiters(&key);
        assert_eq!(waiters.len(), 3);
    }

    #[test]
    fn release_returns_all_waiters_and_clears_marker() {
        let coalescer = RequestCoalescer::new();
        let key = CacheKey([2u8; 32]);
        coalescer.try_claim(key, "ns/a");
        coalescer.try_claim(key, "ns/b");
        let waiters = coalescer.release(&key);
        assert_eq!(waiters.len(), 2);
        assert!(!coalescer.is_in_flight(&key));
    }

    #[test]
    fn undo_claim_after_overload_allows_reclaiming() {
        let coalescer = RequestCoalescer::new();
        let key = CacheKey([3u8; 32]);
        assert_eq!(coalescer.try_claim(key, "ns/a"), ClaimOutcome::Claimed);
        coalescer.undo_claim(&key);
        assert!(!coalescer.is_in_flight(&key));
        assert_eq!(coalescer.try_claim(key, "ns/b"), ClaimOutcome::Claimed);
    }

    #[test]
    fn release_of_unknown_key_returns_empty_set() {
        let coalescer = RequestCoalescer::new();
        let waiters = coalescer.release(&CacheKey([9u8; 32]));
        assert!(waiters.is_empty());
    }
}
