//! C5 — Reference-Path Resolver.
//!
//! Walks a chain of component references starting from a root descriptor,
//! verifying each child's digest against its parent reference before
//! continuing. An empty path returns the root descriptor unchanged.
//!
//! Per spec.md §4.5, each hop fetches its child "via a cache-backed
//! repository keyed by the parent's recorded reference-digest when
//! present" — the cache key for a hop reflects the integrity-checked
//! lineage, not just `(component, version)`, so two paths that reach the
//! same component/version through differently-verified lineages are not
//! conflated. [`ChildFetcher`] is the seam that lets
//! [`crate::worker_pool::WorkerPool`] wire this up against the shared
//! [`crate::cache::LookupCache`] without this module depending on C2/C3
//! directly.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    collaborators::{DigestRegenerator, IdentityMatcher},
    error::ResolveError,
    types::{ComponentDescriptor, DescriptorReference, ReferenceStep},
};

/// Fetches the descriptor for a single matched reference.
///
/// Implementations decide how lineage is folded into any cache key they
/// consult (e.g. hashing in `reference.digest` alongside `component` and
/// `version`); this trait only fixes the shape the resolver needs.
#[async_trait]
pub trait ChildFetcher: Send + Sync {
    /// Fetch the descriptor `reference` points at.
    async fn fetch(&self, reference: &DescriptorReference) -> Result<ComponentDescriptor, ResolveError>;
}

/// A [`ChildFetcher`] that calls straight through to a
/// [`crate::collaborators::RepositoryHandle`], with no caching. Suitable for
/// tests and for hosts that don't need lineage-keyed caching across hops.
pub struct DirectFetcher<'a>(pub &'a dyn crate::collaborators::RepositoryHandle);

#[async_trait]
impl<'a> ChildFetcher for DirectFetcher<'a> {
    async fn fetch(&self, reference: &DescriptorReference) -> Result<ComponentDescriptor, ResolveError> {
        self.0.get_component_version(&reference.component, &reference.version).await
    }
}

/// Walk `path` starting from `root`, fetching each child through `fetcher`
/// and verifying digests with `regenerator`. Returns the leaf descriptor.
///
/// Mirrors the pseudocode in spec.md §4.5 exactly: first-match wins when a
/// step matches more than one reference, and a step missing or carrying an
/// empty digest skips verification for that hop.
#[tracing::instrument(level = "debug", skip(fetcher, matcher, regenerator, root), fields(component = %root.component, version = %root.version, hops = path.len()))]
pub async fn resolve_path(
    root: Arc<ComponentDescriptor>,
    path: &[ReferenceStep],
    fetcher: &dyn ChildFetcher,
    matcher: &dyn IdentityMatcher,
    regenerator: &dyn DigestRegenerator,
) -> Result<Arc<ComponentDescriptor>, ResolveError> {
    let mut current = root;

    for step in path {
        let matched = current
            .references
            .iter()
            .find(|reference| matcher.matches(reference, step))
            .cloned()
            .ok_or_else(|| ResolveError::PathStepNotFound {
                step_name: step.name.clone(),
                component: current.component.clone(),
                version: current.version.clone(),
            })?;

        let child = fetcher.fetch(&matched).await?;

        if let Some(digest) = &matched.digest {
            let computed = regenerator.regenerate(&child, &digest.normalisation, &digest.hash_algorithm)?;
            if computed != digest.value {
                return Err(ResolveError::DigestMismatch {
                    reference_name: matched.name.clone(),
                    expected: digest.value.clone(),
                    computed,
                });
            }
        }

        current = Arc::new(child);
    }

    Ok(current)
}
