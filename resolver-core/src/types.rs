//! Core data model: options, descriptors, cache keys and queued requests.
//!
//! Types here mirror the shapes in `open-component-model`'s resolution path,
//! but own none of the OCI/CTF wire format: a [`ComponentDescriptor`] carries
//! just enough structure (its reference list) for [`crate::reference_path`]
//! to walk it; everything else is opaque payload owned by the embedding
//! host's descriptor (de)serialisation layer.

use std::{collections::BTreeMap, fmt, sync::Arc};

use educe::Educe;
use serde::{Deserialize, Serialize};

/// A typed, serialisable description of where to look for a component.
///
/// Compared by canonical serialisation, never by `PartialEq` on the
/// concrete type, since backends are free to mutate fields (e.g. fill in a
/// canonical type tag) after construction.
pub trait RepositorySpec: fmt::Debug + Send + Sync {
    /// Canonical JSON form used both for hashing into a [`CacheKey`] and for
    /// display/debugging. Must be stable across calls for logically
    /// identical specs.
    fn canonical_json(&self) -> serde_json::Value;

    /// Produce an owned, independent copy.
    ///
    /// This is the one deep copy the service performs (see module docs on
    /// [`crate::service`]): backends may mutate fields of the spec they were
    /// handed, so a [`LookupRequest`] never shares a spec with the caller or
    /// with any other in-flight request.
    fn clone_spec(&self) -> Box<dyn RepositorySpec>;
}

/// An owned, cloneable handle around a [`RepositorySpec`] trait object.
///
/// Exists so [`ResolveOptions`] and [`LookupRequest`] can derive `Clone`
/// without forcing every `RepositorySpec` implementor to be `Clone` itself
/// (they usually aren't, since the concrete type lives in the OCI/CTF
/// backend crate and is mutated in place).
pub struct RepositorySpecHandle(pub Box<dyn RepositorySpec>);

impl RepositorySpecHandle {
    /// Wrap a concrete spec.
    pub fn new(spec: impl RepositorySpec + 'static) -> Self {
        Self(Box::new(spec))
    }

    /// Canonical JSON used for key derivation; see [`RepositorySpec::canonical_json`].
    pub fn canonical_json(&self) -> serde_json::Value {
        self.0.canonical_json()
    }
}

impl Clone for RepositorySpecHandle {
    fn clone(&self) -> Self {
        Self(self.0.clone_spec())
    }
}

impl fmt::Debug for RepositorySpecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A reference to an external configuration object (credentials, signing
/// keys, transfer options, ...) resolved by the embedding host's object
/// reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigObjectRef {
    /// Object kind, e.g. `ConfigMap` or `Secret`.
    pub kind: String,
    /// Object name.
    pub name: String,
}

/// A public key and algorithm pair that a fetched descriptor must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationSpec {
    /// PEM or raw-encoded public key material, opaque to the core.
    pub public_key: Vec<u8>,
    /// Signing algorithm name, e.g. `RSASSA-PSS` or `ecdsa-p256`.
    pub algorithm: String,
}

/// One step of a [`ReferencePath`] walk: selects a single reference inside
/// a component's reference list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceStep {
    /// Local name of the reference inside the parent's reference list.
    pub name: String,
    /// Exact version to match; `None` or an empty string makes the step
    /// version-agnostic (matches the first reference with `name`
    /// regardless of version, per [`crate::reference_path`]'s identity rule).
    pub version: Option<String>,
    /// Extra identity labels disambiguating references that share a name.
    pub extra_identity: BTreeMap<String, String>,
}

impl ReferenceStep {
    /// Whether this step's version selector is absent or empty.
    pub fn is_version_agnostic(&self) -> bool {
        match &self.version {
            None => true,
            Some(v) => v.is_empty(),
        }
    }
}

/// Input to [`crate::service::Resolver::resolve`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Where to look; opaque to the core beyond canonical serialisation.
    pub repository_spec: RepositorySpecHandle,
    /// Component identifier, e.g. `github.com/acme/foo`.
    pub component: String,
    /// Component version, e.g. `1.0.0`.
    pub version: String,
    /// Ordered references to external configuration objects.
    pub config_refs: Vec<ConfigObjectRef>,
    /// Namespace `config_refs` are resolved in.
    pub namespace: String,
    /// Opaque token identifying who to notify on completion.
    pub requester_tag: String,
    /// Reference path to walk from the root descriptor to a leaf, applying
    /// digest verification at each hop. Empty means "return the root
    /// descriptor unchanged".
    pub reference_path: Vec<ReferenceStep>,
    /// Signature verifications to enforce on the fetched (leaf) descriptor.
    pub verifications: Vec<VerificationSpec>,
}

impl ResolveOptions {
    /// `component` and `version` must be non-empty per the data model
    /// invariants; this is enforced at the service boundary, not here, so
    /// that construction itself never panics.
    pub fn is_well_formed(&self) -> bool {
        !self.component.is_empty() && !self.version.is_empty()
    }
}

/// The merged, canonicalised configuration governing a single resolution.
///
/// Computed per call; never cached across calls, since the underlying
/// configuration objects may change between calls.
#[derive(Clone)]
pub struct EffectiveConfig {
    /// Canonical byte representation of the merged configuration.
    pub blob: Arc<[u8]>,
    /// Digest of `blob`; the part of a [`CacheKey`] that captures config
    /// drift.
    pub hash: ConfigHash,
}

impl fmt::Debug for EffectiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("hash", &self.hash)
            .field("blob_len", &self.blob.len())
            .finish()
    }
}

/// Digest of an [`EffectiveConfig`]'s canonical blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigHash(pub [u8; 32]);

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Stable hash over `(configHash, canonical(repositorySpec), component,
/// version)`. Two calls with the same key are semantically identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(pub [u8; 32]);

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

impl CacheKey {
    /// Derive a key from an effective config hash, a canonical repository
    /// spec, a component and a version.
    pub fn derive(
        config_hash: ConfigHash,
        repository_spec: &RepositorySpecHandle,
        component: &str,
        version: &str,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&config_hash.0);
        hasher.update(repository_spec.canonical_json().to_string().as_bytes());
        hasher.update(b"\x1e");
        hasher.update(component.as_bytes());
        hasher.update(b"\x1e");
        hasher.update(version.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

/// Domain-separation tag distinguishing [`CacheKey::derive_lineage`] keys
/// from [`CacheKey::derive`] keys so a reference hop can never collide with
/// a top-level `(component, version)` resolution, digested or not — see
/// [`CacheKey::derive_lineage`]'s docs.
const LINEAGE_DOMAIN_TAG: &[u8] = b"\x1elineage/v1\x1e";

impl CacheKey {
    /// Derive the cache key used for a single reference-path hop (C5).
    ///
    /// Always mixes in [`LINEAGE_DOMAIN_TAG`] before anything else, so this
    /// never collides with a [`CacheKey::derive`] key for the same
    /// `(config_hash, repository_spec, component, version)` — including the
    /// fully legal case where `reference.digest` is `None` (spec.md §4.5's
    /// digest check is conditional on the reference carrying one). Without
    /// that separation an undigested reference hop would hash to exactly
    /// the same key as a caller's direct top-level `Resolve` for the same
    /// component/version/spec/config, letting a C5 child-fetch plant its
    /// lineage-only [`ResolveResult`] (whose `repository_handle` is a
    /// throwaway placeholder, see [`crate::worker_pool::CachedChildFetcher`])
    /// into a slot an unrelated caller could read back from the shared
    /// [`crate::cache::LookupCache`].
    ///
    /// Folds in the parent reference's recorded digest when present, so two
    /// hops to the same `(component, version)` under differently-verified
    /// lineages still key separately.
    pub fn derive_lineage(
        config_hash: ConfigHash,
        repository_spec: &RepositorySpecHandle,
        reference: &DescriptorReference,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(LINEAGE_DOMAIN_TAG);
        hasher.update(&config_hash.0);
        hasher.update(repository_spec.canonical_json().to_string().as_bytes());
        hasher.update(b"\x1e");
        hasher.update(reference.component.as_bytes());
        hasher.update(b"\x1e");
        hasher.update(reference.version.as_bytes());
        if let Some(digest) = &reference.digest {
            hasher.update(b"\x1e");
            hasher.update(digest.value.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

/// One reference inside a [`ComponentDescriptor`]'s reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorReference {
    /// Local name of this reference within its parent.
    pub name: String,
    /// Referenced component identifier.
    pub component: String,
    /// Referenced component version.
    pub version: String,
    /// Extra identity labels.
    #[serde(default)]
    pub extra_identity: BTreeMap<String, String>,
    /// Recorded integrity digest of the referenced component version, if
    /// any was recorded at authoring time.
    pub digest: Option<ReferenceDigest>,
}

/// A recorded digest on a [`DescriptorReference`], to be checked against a
/// freshly regenerated digest of the fetched child descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDigest {
    /// Normalisation algorithm used to produce the canonical byte form that
    /// was hashed (e.g. `jsonNormalisation/v1`).
    pub normalisation: String,
    /// Hash algorithm (e.g. `SHA-256`).
    pub hash_algorithm: String,
    /// The recorded digest value, hex-encoded.
    pub value: String,
}

/// A verified component descriptor, as handed back to callers.
///
/// Opaque beyond the reference list needed to walk [`ReferenceStep`]
/// chains; everything else (resources, sources, labels, signatures) lives
/// in `raw` and is interpreted by the embedding host's descriptor
/// (de)serialisation layer, not by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Component identifier.
    pub component: String,
    /// Component version.
    pub version: String,
    /// This descriptor's own references to other component versions.
    #[serde(default)]
    pub references: Vec<DescriptorReference>,
    /// Everything else, untouched.
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

/// A handle usable by the caller to later fetch resource bytes.
///
/// Its lifetime is independent of the cache entry that produced it: callers
/// may keep using a `RepositoryHandle` after its originating cache entry has
/// been evicted.
#[derive(Clone)]
pub struct RepositoryHandleRef(pub Arc<dyn crate::collaborators::RepositoryHandle>);

impl fmt::Debug for RepositoryHandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RepositoryHandleRef(..)")
    }
}

/// The result of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    /// The verified component descriptor.
    pub descriptor: Arc<ComponentDescriptor>,
    /// A handle usable to later fetch resource bytes.
    pub repository_handle: RepositoryHandleRef,
    /// Propagated back so callers may detect config drift.
    pub config_hash: ConfigHash,
}

/// An entry queued onto the worker pool.
///
/// Critically, `repository_spec` is a deep copy (see
/// [`RepositorySpecHandle::clone_spec`]) taken before enqueueing, so a
/// worker never races the caller (or another in-flight request) over fields
/// a backend mutates in place.
#[derive(Educe)]
#[educe(Debug)]
pub struct LookupRequest {
    /// Fingerprint this request resolves.
    pub key: CacheKey,
    /// Deep-copied options the worker will act on.
    pub opts: ResolveOptions,
    /// Effective configuration computed for this request.
    #[educe(Debug(ignore))]
    pub effective_config: EffectiveConfig,
}
