//! Top-level `Resolver` service: wires C1–C6 together behind the three
//! inbound operations named in spec.md §6 — `Resolve`, `Subscribe`,
//! `Shutdown`.
//!
//! [`Resolver::resolve`] is the exact six-step control flow from spec.md §2:
//! digest the effective configuration (C1), derive the fingerprint, probe
//! the cache (C2), claim-or-join (C3), enqueue onto the worker pool (C4) with
//! the claim-then-enqueue-then-unclaim-on-overload ordering spec.md §4.4
//! requires, and let a worker perform the actual resolution (C4/C5/C6).

use std::sync::Arc;
use std::time::Duration;

use crate::{
    cache::{CacheEntry, LookupCache},
    coalescer::{ClaimOutcome, RequestCoalescer},
    collaborators::{Collaborators, ObjectReader},
    config::ResolverConfig,
    digester::ConfigDigester,
    error::ResolveError,
    metrics::{NoopMetrics, ResolverMetrics},
    notifier::{CompletionEvent, CompletionNotifier, Unsubscribe},
    types::{CacheKey, LookupRequest, ResolveOptions, ResolveResult},
    worker_pool::{EnqueueOutcome, WorkerPool},
};

/// What [`Resolver::resolve`] hands back immediately. Only
/// [`ResolveOutcome::Ready`] carries a result; every other variant tells the
/// caller how to learn the eventual outcome (wait on `Subscribe`, or retry).
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// Served straight from the cache.
    Ready(ResolveResult),
    /// No cache entry existed and this call's enqueue won the race; the
    /// caller is now the one blocking workers, and should await a
    /// [`CompletionEvent`] on its subscription for `requesterTag`.
    Enqueued,
    /// A resolution for this fingerprint was already running; this caller
    /// was registered as a waiter and will be notified on completion.
    Coalesced,
    /// The worker queue was full. The caller was *not* registered as a
    /// waiter and should retry later.
    Overloaded,
}

/// The Component-Version Resolution Service.
///
/// Construct with [`Resolver::start`], which spawns the worker pool and a
/// background cache-eviction task. Call [`Resolver::shutdown`] to drain and
/// stop both before dropping.
pub struct Resolver {
    digester: ConfigDigester,
    cache: Arc<LookupCache>,
    coalescer: Arc<RequestCoalescer>,
    notifier: Arc<CompletionNotifier>,
    worker_pool: Option<WorkerPool>,
    metrics: Arc<dyn ResolverMetrics>,
    eviction_task: Option<tokio::task::JoinHandle<()>>,
}

impl Resolver {
    /// Build and start a resolver: spawns `config.workers` worker tasks and
    /// a background eviction loop ticking every `config.eviction_interval`.
    pub fn start(
        config: ResolverConfig,
        object_reader: Arc<dyn ObjectReader>,
        collaborators: Collaborators,
        metrics: Arc<dyn ResolverMetrics>,
    ) -> Self {
        let cache = LookupCache::new(config.cache_ttl);
        let coalescer = Arc::new(RequestCoalescer::new());
        let notifier = Arc::new(CompletionNotifier::new());
        let digester = ConfigDigester::with_default_merger(object_reader);

        let worker_pool = WorkerPool::start(
            config.queue_capacity,
            config.workers,
            config.job_timeout,
            cache.clone(),
            coalescer.clone(),
            notifier.clone(),
            collaborators,
            metrics.clone(),
        );

        let eviction_task = {
            let cache = cache.clone();
            let interval = config.eviction_interval;
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    cache.evict_expired();
                }
            }))
        };

        Self {
            digester,
            cache,
            coalescer,
            notifier,
            worker_pool: Some(worker_pool),
            metrics,
            eviction_task,
        }
    }

    /// Build a resolver with [`NoopMetrics`].
    pub fn start_without_metrics(config: ResolverConfig, object_reader: Arc<dyn ObjectReader>, collaborators: Collaborators) -> Self {
        Self::start(config, object_reader, collaborators, Arc::new(NoopMetrics))
    }

    /// Resolve a single `(component, version)` under `opts`.
    ///
    /// Never blocks on backend I/O unless this call is the one that wins the
    /// claim and the queue has room: enqueueing is itself non-blocking, and
    /// this function returns as soon as the request is either served from
    /// cache, handed to a worker, coalesced onto an in-flight one, or
    /// rejected as overloaded.
    #[tracing::instrument(level = "info", skip(self, opts), fields(component = %opts.component, version = %opts.version, namespace = %opts.namespace))]
    pub async fn resolve(&self, opts: ResolveOptions) -> Result<ResolveOutcome, ResolveError> {
        if !opts.is_well_formed() {
            return Err(ResolveError::ComponentNotFound {
                component: opts.component,
                version: opts.version,
            });
        }

        let effective_config = self.digester.digest(&opts.namespace, &opts.config_refs).await?;

        let key = CacheKey::derive(effective_config.hash, &opts.repository_spec, &opts.component, &opts.version);

        if let Some(entry) = self.cache.get(&key) {
            return match entry {
                CacheEntry::Success(result) => {
                    self.metrics.cache_probe(true);
                    Ok(ResolveOutcome::Ready(result))
                }
                CacheEntry::Failure(err) => {
                    self.metrics.cache_probe(true);
                    Err(err)
                }
            };
        }
        self.metrics.cache_probe(false);

        match self.coalescer.try_claim(key, &opts.requester_tag) {
            ClaimOutcome::AlreadyInFlight => {
                self.metrics.coalesced();
                return Ok(ResolveOutcome::Coalesced);
            }
            ClaimOutcome::Claimed => {}
        }

        let Some(worker_pool) = &self.worker_pool else {
            self.coalescer.undo_claim(&key);
            return Err(ResolveError::Shutdown);
        };

        let request = LookupRequest {
            key,
            opts,
            effective_config,
        };

        match worker_pool.enqueue(request) {
            EnqueueOutcome::Enqueued => {
                self.metrics.enqueued();
                Ok(ResolveOutcome::Enqueued)
            }
            EnqueueOutcome::Overloaded => {
                self.coalescer.undo_claim(&key);
                self.metrics.overloaded();
                Err(ResolveError::Overloaded)
            }
            EnqueueOutcome::Shutdown => {
                self.coalescer.undo_claim(&key);
                Err(ResolveError::Shutdown)
            }
        }
    }

    /// Subscribe `requester_tag` to completion events. Returns a mailbox and
    /// an [`Unsubscribe`] handle; drop or call `unsubscribe` when the
    /// subscriber no longer cares.
    pub fn subscribe(&self, requester_tag: impl Into<String>) -> (async_broadcast::Receiver<CompletionEvent>, Unsubscribe) {
        self.notifier.subscribe(requester_tag)
    }

    /// Stop accepting new work and wait for every in-flight job to finish.
    /// Workers never abort a running job; they simply stop pulling new ones
    /// and exit once drained.
    pub async fn shutdown(&mut self) {
        if let Some(pool) = self.worker_pool.take() {
            pool.shutdown().await;
        }
        if let Some(task) = self.eviction_task.take() {
            task.abort();
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Some(task) = self.eviction_task.take() {
            task.abort();
        }
    }
}

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Resolver>;
};

/// Convenience re-export of the TTL default, for hosts constructing a
/// [`ResolverConfig`] by hand rather than through the builder.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
