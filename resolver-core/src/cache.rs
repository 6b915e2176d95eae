//! C2 — Lookup Cache.
//!
//! A TTL-bounded map from [`CacheKey`] to either a successful
//! [`ResolveResult`] or a sticky-then-evicted failure. No hard capacity
//! limit: the cache is bounded indirectly by key cardinality, the same
//! tradeoff `kube-runtime`'s reflector store makes for watched objects.

use std::{sync::Arc, time::Duration};

use ahash::HashMap;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::{
    error::ResolveError,
    types::{CacheKey, ResolveResult},
};

/// A stored cache entry: exactly one of `result`/`err` is ever set.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// A successful resolution.
    Success(ResolveResult),
    /// A failed resolution, removed on first observation (see
    /// [`LookupCache::get`]).
    Failure(ResolveError),
}

struct StoredEntry {
    entry: CacheEntry,
    inserted_at: Instant,
}

/// TTL-bounded, concurrency-safe cache of resolution outcomes.
///
/// Reads never block writers and vice versa for long: the whole map sits
/// behind a single `parking_lot::RwLock`, which is fast enough here because
/// entries are cheap `Arc`-backed clones and critical sections are tiny.
pub struct LookupCache {
    entries: RwLock<HashMap<CacheKey, StoredEntry>>,
    ttl: Duration,
}

impl LookupCache {
    /// Construct an empty cache with the given entry TTL.
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::default()),
            ttl,
        })
    }

    /// Probe the cache for `key`.
    ///
    /// A successful entry is returned and left in place (subsequent
    /// `Get`s keep observing it until TTL eviction). A failure entry is
    /// returned and immediately removed: "sticky-once" semantics, so the
    /// *next* caller re-enters resolution instead of being stuck behind a
    /// transient error forever.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(stored) if matches!(stored.entry, CacheEntry::Failure(_)) => {
                entries.remove(key).map(|stored| stored.entry)
            }
            Some(_) => entries.get(key).map(|stored| stored.entry.clone()),
            None => None,
        }
    }

    /// Store a successful resolution, observable by any `get` issued after
    /// this call returns.
    pub fn put_success(&self, key: CacheKey, result: ResolveResult) {
        self.entries.write().insert(
            key,
            StoredEntry {
                entry: CacheEntry::Success(result),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Store a failed resolution. See [`Self::get`] for the sticky-once
    /// read-then-evict contract.
    pub fn put_failure(&self, key: CacheKey, err: ResolveError) {
        self.entries.write().insert(
            key,
            StoredEntry {
                entry: CacheEntry::Failure(err),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Idempotently remove `key`, if present.
    pub fn delete(&self, key: &CacheKey) {
        self.entries.write().remove(key);
    }

    /// Remove every entry older than the configured TTL. Intended to be
    /// driven by a periodic background task (see
    /// [`crate::service::Resolver::start`]).
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries
            .write()
            .retain(|_, stored| now.saturating_duration_since(stored.inserted_at) < ttl);
    }

    /// Current entry count, for metrics/tests.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
