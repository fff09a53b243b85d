use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::core::DynamicObject;
use kube::Client;

use flotilla_objectwatcher::{DynamicClient, ResourceMapping};

/// [`DynamicClient`] over a live cluster connection.
#[derive(Clone)]
pub struct KubeDynamicClient {
    client: Client,
}

impl KubeDynamicClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        match (mapping.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &mapping.api_resource),
            // Namespaced kind without a namespace: let the server apply its default.
            (true, None) => Api::default_namespaced_with(self.client.clone(), &mapping.api_resource),
            (false, _) => Api::all_with(self.client.clone(), &mapping.api_resource),
        }
    }
}

#[async_trait]
impl DynamicClient for KubeDynamicClient {
    async fn create(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error> {
        self.api(mapping, namespace).create(&PostParams::default(), obj).await
    }

    async fn replace(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error> {
        self.api(mapping, namespace).replace(name, &PostParams::default(), obj).await
    }

    async fn delete(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        params: &DeleteParams,
    ) -> Result<(), kube::Error> {
        self.api(mapping, namespace).delete(name, params).await.map(|_| ())
    }
}
