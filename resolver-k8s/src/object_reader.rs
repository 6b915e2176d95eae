//! An [`ObjectReader`] reading `configRefs` from a real Kubernetes API
//! server, mirroring the original system's own resolution of `configRefs`
//! against `ConfigMap`/`Secret` objects specifically (see SPEC_FULL.md §6).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use resolver_core::collaborators::ObjectReader;
use resolver_core::error::ResolveError;

/// Reads `ConfigMap` and `Secret` objects by name, returning their `data`
/// (or `stringData`/binary `data` for secrets) as a canonical JSON blob.
///
/// Any other `kind` is rejected: the original system never resolves
/// `configRefs` against arbitrary kinds, so a generic dynamic client would
/// only hide misconfiguration instead of catching it.
pub struct KubeObjectReader {
    client: Client,
}

impl KubeObjectReader {
    /// Wrap a [`Client`] already pointed at the right cluster/context.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectReader for KubeObjectReader {
    #[tracing::instrument(level = "debug", skip(self), fields(namespace, kind, name))]
    async fn read(&self, namespace: &str, kind: &str, name: &str) -> Result<Vec<u8>, ResolveError> {
        match kind {
            "ConfigMap" => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                let config_map = api.get(name).await.map_err(|source| read_failed(kind, name, &source))?;
                serde_json::to_vec(&config_map.data).map_err(|source| serialize_failed(kind, name, &source))
            }
            "Secret" => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                let secret = api.get(name).await.map_err(|source| read_failed(kind, name, &source))?;
                serde_json::to_vec(&secret.data).map_err(|source| serialize_failed(kind, name, &source))
            }
            other => Err(ResolveError::BackendUnavailable {
                message: format!("unsupported config object kind {other:?} (only ConfigMap and Secret are resolvable)"),
            }),
        }
    }
}

fn read_failed(kind: &str, name: &str, source: &kube::Error) -> ResolveError {
    ResolveError::BackendUnavailable {
        message: format!("fetching {kind}/{name}: {source}"),
    }
}

fn serialize_failed(kind: &str, name: &str, source: &serde_json::Error) -> ResolveError {
    ResolveError::BackendUnavailable {
        message: format!("serialising {kind}/{name}: {source}"),
    }
}
