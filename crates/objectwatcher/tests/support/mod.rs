//! In-memory member clusters for watcher tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flotilla_core::{FederatedKey, MANAGED_BY_LABEL};
use flotilla_interpreter::{ConfigurableInterpreter, ScriptEngine, ScriptError};
use flotilla_objectwatcher::{
    CacheError, ClusterClientFactory, DynamicClient, MemberClusterClient, ObjectCache, ObjectWatcher, ResourceMapping,
    TypeResolver,
};
use kube::api::DeleteParams;
use kube::core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind};
use serde_json::{json, Value};

fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse { status: "Failure".into(), message: reason.into(), reason: reason.into(), code })
}

/// Every member cluster at once. The cache view and the remote view are separate maps so tests
/// can make them disagree; writes update both.
#[derive(Default)]
pub struct Fleet {
    pub cached: Mutex<BTreeMap<FederatedKey, DynamicObject>>,
    pub remote: Mutex<BTreeMap<FederatedKey, DynamicObject>>,
    pub calls: Mutex<Vec<String>>,
    pub delete_policies: Mutex<Vec<String>>,
    pub failing_clusters: Mutex<BTreeSet<String>>,
    pub cache_broken: AtomicBool,
    /// Replace returns the existing resource version instead of bumping it.
    pub sticky_versions: AtomicBool,
    rv: AtomicU64,
}

impl Fleet {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Seed an object into both views as if it already existed in `cluster`.
    pub fn seed(&self, cluster: &str, mut obj: DynamicObject) -> DynamicObject {
        obj.metadata.resource_version = Some(self.next_rv());
        let key = FederatedKey::for_object(cluster, &obj).unwrap();
        self.cached.lock().unwrap().insert(key.clone(), obj.clone());
        self.remote.lock().unwrap().insert(key, obj.clone());
        obj
    }

    pub fn remote_get(&self, cluster: &str, obj: &DynamicObject) -> Option<DynamicObject> {
        let key = FederatedKey::for_object(cluster, obj).unwrap();
        self.remote.lock().unwrap().get(&key).cloned()
    }

    fn next_rv(&self) -> String {
        (self.rv.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn store(&self, key: FederatedKey, obj: &DynamicObject) {
        self.cached.lock().unwrap().insert(key.clone(), obj.clone());
        self.remote.lock().unwrap().insert(key, obj.clone());
    }

    fn check(&self, cluster: &str, verb: &str, name: &str) -> Result<(), kube::Error> {
        self.calls.lock().unwrap().push(format!("{verb} {cluster}/{name}"));
        if self.failing_clusters.lock().unwrap().contains(cluster) {
            return Err(api_error(503, "ServiceUnavailable"));
        }
        Ok(())
    }
}

impl ObjectCache for Fleet {
    fn get(&self, key: &FederatedKey) -> Result<DynamicObject, CacheError> {
        if self.cache_broken.load(Ordering::SeqCst) {
            return Err(CacheError::Other("informer not synced".into()));
        }
        self.cached.lock().unwrap().get(key).cloned().ok_or_else(|| CacheError::NotFound(key.clone()))
    }
}

struct FakeClient {
    cluster: String,
    fleet: Arc<Fleet>,
}

#[async_trait]
impl DynamicClient for FakeClient {
    async fn create(&self, _m: &ResourceMapping, _ns: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.fleet.check(&self.cluster, "create", obj.metadata.name.as_deref().unwrap_or(""))?;
        let key = FederatedKey::for_object(&self.cluster, obj).unwrap();
        if self.fleet.remote.lock().unwrap().contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut written = obj.clone();
        written.metadata.resource_version = Some(self.fleet.next_rv());
        self.fleet.store(key, &written);
        Ok(written)
    }

    async fn replace(&self, _m: &ResourceMapping, _ns: Option<&str>, name: &str, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.fleet.check(&self.cluster, "replace", name)?;
        let key = FederatedKey::for_object(&self.cluster, obj).unwrap();
        let current = self.fleet.remote.lock().unwrap().get(&key).cloned().ok_or_else(|| api_error(404, "NotFound"))?;
        if obj.metadata.resource_version != current.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        let mut written = obj.clone();
        if !self.fleet.sticky_versions.load(Ordering::SeqCst) {
            written.metadata.resource_version = Some(self.fleet.next_rv());
        }
        self.fleet.store(key, &written);
        Ok(written)
    }

    async fn delete(&self, m: &ResourceMapping, ns: Option<&str>, name: &str, params: &DeleteParams) -> Result<(), kube::Error> {
        self.fleet.check(&self.cluster, "delete", name)?;
        self.fleet.delete_policies.lock().unwrap().push(format!("{:?}", params.propagation_policy));
        let mut remote = self.fleet.remote.lock().unwrap();
        let before = remote.len();
        remote.retain(|k, _| {
            !(k.cluster == self.cluster && k.key.kind == m.api_resource.kind && k.key.name == name && k.key.namespace() == ns)
        });
        if remote.len() == before {
            return Err(api_error(404, "NotFound"));
        }
        self.fleet.cached.lock().unwrap().retain(|k, _| !(k.cluster == self.cluster && k.key.name == name));
        Ok(())
    }
}

pub struct FakeFactory(pub Arc<Fleet>);

#[async_trait]
impl ClusterClientFactory for FakeFactory {
    async fn client_for(&self, cluster: &str) -> anyhow::Result<MemberClusterClient> {
        if cluster == "unknown" {
            anyhow::bail!("cluster {cluster} is not registered");
        }
        Ok(MemberClusterClient {
            cluster_name: cluster.to_string(),
            client: Arc::new(FakeClient { cluster: cluster.to_string(), fleet: self.0.clone() }),
        })
    }
}

pub struct FakeResolver;

#[async_trait]
impl TypeResolver for FakeResolver {
    async fn resolve(&self, gvk: &GroupVersionKind) -> anyhow::Result<ResourceMapping> {
        Ok(ResourceMapping { api_resource: ApiResource::from_gvk(gvk), namespaced: true })
    }
}

/// Script engine whose hooks stamp a label, or set replicas, so tests can see they ran.
pub struct StampEngine;

impl ScriptEngine for StampEngine {
    fn call(&self, _script: &str, function: &str, args: &[Value], _n: usize) -> Result<Vec<Value>, ScriptError> {
        let mut obj = args[0].clone();
        match function {
            "Retain" => {
                obj["metadata"]["labels"]["retained-by"] = json!("hook");
                Ok(vec![obj])
            }
            "ReviseReplica" => {
                obj["spec"]["size"] = args[1].clone();
                Ok(vec![obj])
            }
            "GetReplicas" => Ok(vec![obj["spec"]["size"].clone(), Value::Null]),
            other => Err(ScriptError::MissingFunction(other.to_string())),
        }
    }
}

pub struct Harness {
    pub fleet: Arc<Fleet>,
    pub interpreter: Arc<ConfigurableInterpreter>,
    pub watcher: ObjectWatcher,
}

pub fn harness() -> Harness {
    let fleet = Arc::new(Fleet::default());
    let interpreter = Arc::new(ConfigurableInterpreter::new(Arc::new(StampEngine)));
    let watcher = ObjectWatcher::new(
        Arc::new(FakeFactory(fleet.clone())),
        Arc::new(FakeResolver),
        fleet.clone(),
        interpreter.clone(),
    );
    Harness { fleet, interpreter, watcher }
}

pub fn deployment(name: &str, replicas: i64) -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": "default", "labels": { "app": name } },
        "spec": { "replicas": replicas }
    }))
    .unwrap()
}

pub fn managed(mut obj: DynamicObject) -> DynamicObject {
    obj.metadata.labels.get_or_insert_with(Default::default).insert(MANAGED_BY_LABEL.into(), "true".into());
    obj
}
