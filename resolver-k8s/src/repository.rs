//! An in-memory [`RepositoryBackendFactory`]/[`RepositoryHandle`] pair.
//!
//! Stands in for the (explicitly out-of-scope) real OCI/CTF repository
//! backend so the worker pool and reference-path resolver are exercisable
//! end to end without real registry I/O — used by this crate's own
//! integration tests and suitable as a runnable example for hosts wiring up
//! [`resolver_core::service::Resolver`] for the first time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use resolver_core::collaborators::{RepositoryBackendFactory, RepositoryHandle};
use resolver_core::error::ResolveError;
use resolver_core::types::{ComponentDescriptor, EffectiveConfig, RepositorySpecHandle};

/// Keys an in-memory descriptor store by `(component, version)`.
type DescriptorKey = (String, String);

/// A [`RepositoryBackendFactory`] that always opens the same shared,
/// in-memory descriptor map, regardless of the requested
/// [`RepositorySpecHandle`].
#[derive(Clone, Default)]
pub struct InMemoryRepositoryBackendFactory {
    descriptors: Arc<RwLock<HashMap<DescriptorKey, ComponentDescriptor>>>,
}

impl InMemoryRepositoryBackendFactory {
    /// Construct an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a `(component, version)` descriptor, overwriting any existing
    /// entry. Chainable for test/example setup.
    #[must_use]
    pub fn with_descriptor(self, component: impl Into<String>, version: impl Into<String>, descriptor: ComponentDescriptor) -> Self {
        self.descriptors.write().insert((component.into(), version.into()), descriptor);
        self
    }
}

#[async_trait]
impl RepositoryBackendFactory for InMemoryRepositoryBackendFactory {
    async fn open(&self, _spec: &RepositorySpecHandle, _config: &EffectiveConfig) -> Result<Arc<dyn RepositoryHandle>, ResolveError> {
        Ok(Arc::new(InMemoryRepositoryHandle {
            descriptors: self.descriptors.clone(),
        }))
    }
}

/// A handle into the shared in-memory descriptor map.
pub struct InMemoryRepositoryHandle {
    descriptors: Arc<RwLock<HashMap<DescriptorKey, ComponentDescriptor>>>,
}

#[async_trait]
impl RepositoryHandle for InMemoryRepositoryHandle {
    async fn get_component_version(&self, component: &str, version: &str) -> Result<ComponentDescriptor, ResolveError> {
        self.descriptors
            .read()
            .get(&(component.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::ComponentNotFound {
                component: component.to_string(),
                version: version.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(component: &str, version: &str) -> ComponentDescriptor {
        ComponentDescriptor {
            component: component.to_string(),
            version: version.to_string(),
            references: vec![],
            raw: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn a_seeded_descriptor_is_returned_by_handle() {
        let factory = InMemoryRepositoryBackendFactory::new().with_descriptor("acme/foo", "1.0.0", descriptor("acme/foo", "1.0.0"));
        let handle = factory
            .open(
                &RepositorySpecHandle::new(TestSpec),
                &EffectiveConfig {
                    blob: Arc::from(Vec::new().into_boxed_slice()),
                    hash: resolver_core::types::ConfigHash([0u8; 32]),
                },
            )
            .await
            .unwrap();
        let found = handle.get_component_version("acme/foo", "1.0.0").await.unwrap();
        assert_eq!(found.component, "acme/foo");
    }

    #[tokio::test]
    async fn an_unseeded_lookup_is_component_not_found() {
        let factory = InMemoryRepositoryBackendFactory::new();
        let handle = factory
            .open(
                &RepositorySpecHandle::new(TestSpec),
                &EffectiveConfig {
                    blob: Arc::from(Vec::new().into_boxed_slice()),
                    hash: resolver_core::types::ConfigHash([0u8; 32]),
                },
            )
            .await
            .unwrap();
        let err = handle.get_component_version("acme/missing", "1.0.0").await.unwrap_err();
        assert!(matches!(err, ResolveError::ComponentNotFound { .. }));
    }

    #[derive(Debug)]
    struct TestSpec;

    impl resolver_core::types::RepositorySpec for TestSpec {
        fn canonical_json(&self) -> serde_json::Value {
            serde_json::json!({"type": "in-memory-test"})
        }
        fn clone_spec(&self) -> Box<dyn resolver_core::types::RepositorySpec> {
            Box::new(TestSpec)
        }
    }
}
