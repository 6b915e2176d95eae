//! Kubernetes-facing collaborator implementations for
//! [`resolver_core`]: a `ConfigMap`/`Secret`-backed [`ObjectReader`], an
//! in-memory [`RepositoryBackendFactory`] test double, and a bridge turning
//! completion events into a `kube_runtime` trigger stream.
//!
//! [`ObjectReader`]: resolver_core::collaborators::ObjectReader
//! [`RepositoryBackendFactory`]: resolver_core::collaborators::RepositoryBackendFactory

pub mod bridge;
pub mod object_reader;
pub mod repository;

pub use bridge::into_reconcile_trigger;
pub use object_reader::KubeObjectReader;
pub use repository::{InMemoryRepositoryBackendFactory, InMemoryRepositoryHandle};
