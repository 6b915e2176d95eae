//! Outbound interfaces consumed from external collaborators (§6).
//!
//! These are capability interfaces, not an inheritance hierarchy: the
//! service holds `Arc<dyn ...>` handles supplied at construction time and
//! never downcasts them. Real implementations (a Kubernetes object reader,
//! an OCI/CTF repository backend, a cosign-style verifier) live outside this
//! crate; [`resolver-k8s`](../resolver_k8s/index.html) supplies two of them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::ResolveError,
    types::{ComponentDescriptor, EffectiveConfig, RepositorySpecHandle, VerificationSpec},
};

/// Dereferences a single external configuration object.
///
/// Used by [`crate::digester::ConfigDigester`] (C1). Implementations decide
/// what `kind` values they understand; an unknown kind should be reported
/// as a [`ResolveError::ConfigResolutionFailed`].
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Fetch the raw payload of `kind`/`name` in `namespace`.
    async fn read(&self, namespace: &str, kind: &str, name: &str) -> Result<Vec<u8>, ResolveError>;
}

/// Merges an ordered sequence of fetched configuration payloads into a
/// single canonical byte blob (sorted keys, stable separators).
///
/// Used by [`crate::digester::ConfigDigester`] (C1).
pub trait ConfigMerger: Send + Sync {
    /// Merge `ordered` payloads, in the order given, into canonical bytes.
    fn merge(&self, ordered: &[Vec<u8>]) -> Result<Vec<u8>, ResolveError>;
}

/// Opens a handle to a repository described by a [`RepositorySpecHandle`].
///
/// Used by [`crate::worker_pool::WorkerPool`] (C4). This is the seam where
/// the (out-of-scope) OCI/CTF backend plugs in.
#[async_trait]
pub trait RepositoryBackendFactory: Send + Sync {
    /// Open a handle usable to fetch component versions from this
    /// repository under `config`.
    async fn open(
        &self,
        spec: &RepositorySpecHandle,
        config: &EffectiveConfig,
    ) -> Result<Arc<dyn RepositoryHandle>, ResolveError>;
}

/// A handle to an opened repository.
///
/// Outlives the cache entry it helped produce: callers may keep fetching
/// resource bytes through a handle long after the [`crate::cache`] entry
/// that returned it has expired.
#[async_trait]
pub trait RepositoryHandle: Send + Sync {
    /// Fetch the descriptor for `component`/`version`.
    async fn get_component_version(
        &self,
        component: &str,
        version: &str,
    ) -> Result<ComponentDescriptor, ResolveError>;
}

/// Verifies a descriptor against a set of required signatures.
///
/// Used by [`crate::worker_pool::WorkerPool`] (C4), after reference-path
/// resolution completes and before publication.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify `descriptor` against every entry in `verifications`.
    async fn verify(
        &self,
        descriptor: &ComponentDescriptor,
        verifications: &[VerificationSpec],
    ) -> Result<(), ResolveError>;
}

/// Regenerates a digest over a descriptor using a given normalisation and
/// hash algorithm, for comparison against a recorded
/// [`crate::types::ReferenceDigest`].
///
/// Used by [`crate::reference_path`] (C5).
pub trait DigestRegenerator: Send + Sync {
    /// Regenerate the digest of `descriptor` under `normalisation`/`hash_algorithm`.
    fn regenerate(
        &self,
        descriptor: &ComponentDescriptor,
        normalisation: &str,
        hash_algorithm: &str,
    ) -> Result<String, ResolveError>;
}

/// Decides whether a [`crate::types::DescriptorReference`] satisfies a
/// [`crate::types::ReferenceStep`].
///
/// Used by [`crate::reference_path`] (C5). The default implementation
/// applies exactly the local rule the spec pins down (an absent/empty step
/// version matches any version); everything else is delegated to the
/// supplied matcher so hosts can layer richer identity rules (extra
/// identity labels, semver ranges, ...) without this crate knowing about
/// them.
pub trait IdentityMatcher: Send + Sync {
    /// Whether `reference` satisfies `step`.
    fn matches(&self, reference: &crate::types::DescriptorReference, step: &crate::types::ReferenceStep) -> bool;
}

/// Bundles the four outbound collaborators [`crate::worker_pool::WorkerPool`]
/// needs to run a job end to end, so [`crate::service::Resolver`] takes one
/// constructor argument instead of four.
#[derive(Clone)]
pub struct Collaborators {
    /// Opens repository handles (C4).
    pub repository_backend_factory: Arc<dyn RepositoryBackendFactory>,
    /// Verifies fetched descriptors (C4, after C5).
    pub signature_verifier: Arc<dyn SignatureVerifier>,
    /// Regenerates digests while walking a reference path (C5).
    pub digest_regenerator: Arc<dyn DigestRegenerator>,
    /// Decides whether a reference satisfies a path step (C5). Defaults to
    /// [`DefaultIdentityMatcher`] when the host has no richer identity rules.
    pub identity_matcher: Arc<dyn IdentityMatcher>,
}

impl Collaborators {
    /// Construct a bundle, defaulting the identity matcher to
    /// [`DefaultIdentityMatcher`].
    pub fn new(
        repository_backend_factory: Arc<dyn RepositoryBackendFactory>,
        signature_verifier: Arc<dyn SignatureVerifier>,
        digest_regenerator: Arc<dyn DigestRegenerator>,
    ) -> Self {
        Self {
            repository_backend_factory,
            signature_verifier,
            digest_regenerator,
            identity_matcher: Arc::new(DefaultIdentityMatcher),
        }
    }

    /// Override the identity matcher.
    #[must_use]
    pub fn with_identity_matcher(mut self, identity_matcher: Arc<dyn IdentityMatcher>) -> Self {
        self.identity_matcher = identity_matcher;
        self
    }
}

/// The identity matcher used when a host does not supply one: exact name
/// match, version-agnostic when the step's version is absent or empty,
/// otherwise exact version match. Extra identity labels must be a subset of
/// the reference's labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIdentityMatcher;

impl IdentityMatcher for DefaultIdentityMatcher {
    fn matches(&self, reference: &crate::types::DescriptorReference, step: &crate::types::ReferenceStep) -> bool {
        if reference.name != step.name {
            return false;
        }
        if !step.is_version_agnostic() && reference.version != *step.version.as_ref().unwrap() {
            return false;
        }
        step.extra_identity
            .iter()
            .all(|(k, v)| reference.extra_identity.get(k) == Some(v))
    }
}
