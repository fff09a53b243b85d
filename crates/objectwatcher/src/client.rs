//! Collaborators the watcher reaches member clusters through.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DeleteParams;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};

use flotilla_core::FederatedKey;

/// Wire addressing for a kind, plus whether its objects live in namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

#[async_trait]
pub trait TypeResolver: Send + Sync {
    async fn resolve(&self, gvk: &GroupVersionKind) -> anyhow::Result<ResourceMapping>;
}

/// Write access to one member cluster. `namespace` is `None` for cluster-scoped kinds.
#[async_trait]
pub trait DynamicClient: Send + Sync {
    async fn create(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error>;

    async fn replace(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error>;

    async fn delete(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        params: &DeleteParams,
    ) -> Result<(), kube::Error>;
}

#[derive(Clone)]
pub struct MemberClusterClient {
    /// Name the factory resolved the request to; versions are recorded under it.
    pub cluster_name: String,
    pub client: Arc<dyn DynamicClient>,
}

#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    async fn client_for(&self, cluster: &str) -> anyhow::Result<MemberClusterClient>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("{0} not found")]
    NotFound(FederatedKey),
    #[error("cache lookup failed: {0}")]
    Other(String),
}

/// Locally cached view of member cluster objects.
pub trait ObjectCache: Send + Sync {
    fn get(&self, key: &FederatedKey) -> Result<DynamicObject, CacheError>;
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}
