//! Stable failure kinds crossing the service boundary.

use thiserror::Error;

use crate::types::CacheKey;

/// Failure kinds surfaced to callers of [`crate::service::Resolver::resolve`].
///
/// Reconcilers branch on the variant, never on the message; the message is
/// for logs only.
#[derive(Debug, Error, Clone)]
pub enum ResolveError {
    /// A referenced configuration object was missing, unreadable, or failed
    /// to parse. Never cached: the next call retries immediately.
    #[error("failed to resolve configuration for namespace {namespace:?}: {message}")]
    ConfigResolutionFailed {
        /// Namespace the configuration was resolved in.
        namespace: String,
        /// Human-readable detail for logs.
        message: String,
    },

    /// The repository backend could not be reached or returned an
    /// unexpected error (including a recovered worker panic).
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        /// Human-readable detail for logs.
        message: String,
    },

    /// The per-job deadline elapsed before the backend responded.
    #[error("backend call timed out after {elapsed_ms}ms")]
    BackendTimeout {
        /// Elapsed time before timeout fired.
        elapsed_ms: u64,
    },

    /// The requested `(component, version)` does not exist in the backend.
    #[error("component {component}:{version} not found")]
    ComponentNotFound {
        /// Requested component identifier.
        component: String,
        /// Requested version.
        version: String,
    },

    /// Signature verification failed for the resolved descriptor.
    #[error("signature verification failed: {message}")]
    VerificationFailed {
        /// Human-readable detail for logs.
        message: String,
    },

    /// A reference's recorded digest did not match the regenerated digest
    /// of the fetched child descriptor.
    #[error("digest mismatch for reference {reference_name:?}: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// Name of the reference whose child failed verification.
        reference_name: String,
        /// Recorded digest value.
        expected: String,
        /// Freshly regenerated digest value.
        computed: String,
    },

    /// No reference in the current descriptor's reference list matched the
    /// requested [`crate::types::ReferenceStep`].
    #[error("no reference matching step {step_name:?} found in {component}:{version}")]
    PathStepNotFound {
        /// Step name that failed to match.
        step_name: String,
        /// Component being walked when the step failed.
        component: String,
        /// Version being walked when the step failed.
        version: String,
    },

    /// A resolution for this fingerprint is already running; the caller
    /// should expect a [`crate::notifier::CompletionEvent`] rather than
    /// polling.
    #[error("resolution for {0:?} already in progress")]
    InProgress(CacheKey),

    /// The worker queue was full; the caller was not registered as
    /// in-flight and should retry later.
    #[error("worker queue is full")]
    Overloaded,

    /// The service is shutting down or has shut down; no new work is
    /// accepted.
    #[error("resolver is shutting down")]
    Shutdown,
}

impl ResolveError {
    /// Whether this error kind is cached as a sticky-once failure entry
    /// (see [`crate::cache::LookupCache::put_failure`]).
    ///
    /// `ConfigResolutionFailed` is explicitly excluded per the spec: it is
    /// transient and must never hide behind a cache entry. `InProgress`,
    /// `Overloaded` and `Shutdown` never reach the cache at all: they are
    /// synchronous rejections from the service boundary, not resolution
    /// outcomes.
    pub fn is_cacheable(&self) -> bool {
        !matches!(
            self,
            ResolveError::ConfigResolutionFailed { .. }
                | ResolveError::InProgress(_)
                | ResolveError::Overloaded
                | ResolveError::Shutdown
        )
    }
}
