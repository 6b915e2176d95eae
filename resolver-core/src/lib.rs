//! Deduplicating, cache-backed component-version resolution service.
//!
//! Given a component repository, a component/version pair and an optional
//! reference path to walk, resolves to a verified descriptor exactly once
//! per distinct `(effective configuration, repository, component, version)`
//! fingerprint at a time, coalescing concurrent callers onto the single
//! in-flight resolution and caching the outcome for a bounded TTL.
//!
//! See [`service::Resolver`] for the public entry point.

pub mod cache;
pub mod coalescer;
pub mod collaborators;
pub mod config;
pub mod digester;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod reference_path;
pub mod service;
pub mod types;
pub mod worker_pool;

pub use config::{ResolverConfig, ResolverConfigBuilder};
pub use error::ResolveError;
pub use service::{ResolveOutcome, Resolver};
pub use types::{ComponentDescriptor, ResolveOptions, ResolveResult};
