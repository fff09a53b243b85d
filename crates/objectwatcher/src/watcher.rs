//! Create, update and delete of one object in one member cluster.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use kube::api::{DeleteParams, PropagationPolicy};
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use flotilla_core::{
    conflict_resolution, gvk_of, is_managed, object_needs_update, object_version, retain_annotations, retain_labels,
    FederatedKey, ObjectKey, CONFLICT_RESOLUTION_OVERWRITE,
};
use flotilla_interpreter::{InterpreterOperation, ResourceInterpreter};

use crate::client::{is_not_found, CacheError, ClusterClientFactory, MemberClusterClient, ObjectCache, ResourceMapping, TypeResolver};
use crate::error::{Verb, WatchError};
use crate::ledger::VersionLedger;

/// Outcome of [`ObjectWatcher::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationResult {
    /// Written, but the cluster kept the same resource version.
    Unchanged,
    Updated,
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationResult::Unchanged => "unchanged",
            OperationResult::Updated => "updated",
        })
    }
}

/// Applies desired objects to member clusters.
///
/// Callers may drive many (cluster, object) pairs concurrently but must not run two operations
/// for the same pair at once; the ownership and version checks assume a single writer per object.
pub struct ObjectWatcher {
    clients: Arc<dyn ClusterClientFactory>,
    resolver: Arc<dyn TypeResolver>,
    cache: Arc<dyn ObjectCache>,
    interpreter: Arc<dyn ResourceInterpreter>,
    ledger: VersionLedger,
}

fn observe(verb: Verb, outcome: &'static str, started: Instant) {
    histogram!("objectwatcher_remote_ms", started.elapsed().as_secs_f64() * 1000.0, "verb" => verb.as_str());
    counter!("objectwatcher_operations_total", 1u64, "verb" => verb.as_str(), "outcome" => outcome);
}

fn namespace_for<'a>(mapping: &ResourceMapping, key: &'a ObjectKey) -> Option<&'a str> {
    if mapping.namespaced { key.namespace() } else { None }
}

impl ObjectWatcher {
    pub fn new(
        clients: Arc<dyn ClusterClientFactory>,
        resolver: Arc<dyn TypeResolver>,
        cache: Arc<dyn ObjectCache>,
        interpreter: Arc<dyn ResourceInterpreter>,
    ) -> Self {
        Self { clients, resolver, cache, interpreter, ledger: VersionLedger::new() }
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Cached copy of `obj` in `cluster`, `None` when the cache has never seen it.
    pub fn cached(&self, cluster: &str, obj: &DynamicObject) -> Result<Option<DynamicObject>, WatchError> {
        let fed = FederatedKey::for_object(cluster, obj)?;
        match self.cache.get(&fed) {
            Ok(found) => Ok(Some(found)),
            Err(CacheError::NotFound(_)) => Ok(None),
            Err(source) => Err(WatchError::Cache { key: fed, source }),
        }
    }

    async fn client(&self, cluster: &str) -> Result<MemberClusterClient, WatchError> {
        self.clients.client_for(cluster).await.map_err(|source| {
            error!(cluster = %cluster, error = %source, "objectwatcher: build cluster client failed");
            WatchError::ClientFactory { cluster: cluster.to_string(), source }
        })
    }

    async fn mapping(&self, obj: &DynamicObject) -> Result<ResourceMapping, WatchError> {
        let gvk = gvk_of(obj)?;
        self.resolver.resolve(&gvk).await.map_err(|source| WatchError::TypeResolution {
            gvk: format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind),
            source,
        })
    }

    fn record_version(&self, cluster: &str, written: &DynamicObject) -> Result<(), WatchError> {
        let key = ObjectKey::from_object(written)?;
        self.ledger.record(cluster, key, object_version(written));
        Ok(())
    }

    /// Create `desired` in `cluster` unless the cache already knows the object.
    ///
    /// Any cache failure other than not-found aborts without writing.
    pub async fn create(&self, cluster: &str, desired: &DynamicObject) -> Result<(), WatchError> {
        let fed = FederatedKey::for_object(cluster, desired)?;
        match self.cache.get(&fed) {
            Ok(_) => return Ok(()),
            Err(CacheError::NotFound(_)) => {}
            Err(source) => {
                error!(cluster = %cluster, key = %fed.key, error = %source, "objectwatcher: cache lookup before create failed");
                return Err(WatchError::Cache { key: fed, source });
            }
        }

        let member = self.client(cluster).await?;
        let mapping = self.mapping(desired).await?;
        let key = fed.key;
        let started = Instant::now();
        let created = match member.client.create(&mapping, namespace_for(&mapping, &key), desired).await {
            Ok(obj) => obj,
            Err(source) => {
                observe(Verb::Create, "error", started);
                error!(cluster = %cluster, kind = %key.kind, ns = %key.namespace, name = %key.name, error = %source, "objectwatcher: create failed");
                return Err(WatchError::Remote { cluster: cluster.to_string(), key, verb: Verb::Create, source });
            }
        };
        observe(Verb::Create, "ok", started);
        info!(cluster = %member.cluster_name, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: created");
        self.record_version(&member.cluster_name, &created)
    }

    /// Managed objects may always be updated; unmanaged ones only when the desired object asks
    /// for an overwrite.
    fn allow_update(&self, cluster: &str, key: &ObjectKey, desired: &DynamicObject, cluster_obj: &DynamicObject) -> bool {
        if is_managed(cluster_obj) {
            return true;
        }
        warn!(cluster = %cluster, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: existing object is not managed by flotilla");
        if conflict_resolution(desired) == Some(CONFLICT_RESOLUTION_OVERWRITE) {
            info!(cluster = %cluster, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: overwriting unmanaged object");
            return true;
        }
        false
    }

    /// Copy fields the member cluster owns from `observed` onto `desired`. An enabled retention
    /// hook gets the final say.
    fn retain_cluster_fields(&self, mut desired: DynamicObject, observed: &DynamicObject) -> Result<DynamicObject, WatchError> {
        desired.metadata.resource_version = observed.metadata.resource_version.clone();
        desired.metadata.finalizers = observed.metadata.finalizers.clone();
        desired.metadata.owner_references = observed.metadata.owner_references.clone();
        retain_annotations(&mut desired, observed);
        retain_labels(&mut desired, observed);

        if self.interpreter.hook_enabled_for(&desired, InterpreterOperation::Retain) {
            if let Some(retained) = self.interpreter.retain(&desired, observed)? {
                return Ok(retained);
            }
        }
        Ok(desired)
    }

    /// Write `desired` over `cluster_obj`, the object currently in `cluster`.
    pub async fn update(
        &self,
        cluster: &str,
        desired: &DynamicObject,
        cluster_obj: &DynamicObject,
    ) -> Result<OperationResult, WatchError> {
        let key = ObjectKey::from_object(desired)?;
        if !self.allow_update(cluster, &key, desired, cluster_obj) {
            counter!("objectwatcher_conflicts_total", 1u64);
            return Err(WatchError::Conflict { cluster: cluster.to_string(), key });
        }

        let member = self.client(cluster).await?;
        let mapping = self.mapping(desired).await?;
        let desired = self
            .retain_cluster_fields(desired.clone(), cluster_obj)
            .map_err(|e| match e {
                WatchError::Interpret(source) => WatchError::Retain { cluster: cluster.to_string(), key: key.clone(), source },
                other => other,
            })?;

        let started = Instant::now();
        let written = match member.client.replace(&mapping, namespace_for(&mapping, &key), &key.name, &desired).await {
            Ok(obj) => obj,
            Err(source) => {
                observe(Verb::Update, "error", started);
                error!(cluster = %cluster, kind = %key.kind, ns = %key.namespace, name = %key.name, error = %source, "objectwatcher: update failed");
                return Err(WatchError::Remote { cluster: cluster.to_string(), key, verb: Verb::Update, source });
            }
        };
        observe(Verb::Update, "ok", started);
        self.record_version(&member.cluster_name, &written)?;

        if written.metadata.resource_version == cluster_obj.metadata.resource_version {
            info!(cluster = %member.cluster_name, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: updated, object unchanged");
            return Ok(OperationResult::Unchanged);
        }
        info!(cluster = %member.cluster_name, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: updated");
        Ok(OperationResult::Updated)
    }

    /// Delete the object from `cluster`.
    ///
    /// Objects missing from the cache and objects flotilla does not manage are left alone and
    /// reported as success; a cache miss also drops the recorded version.
    pub async fn delete(&self, cluster: &str, desired: &DynamicObject) -> Result<(), WatchError> {
        let fed = FederatedKey::for_object(cluster, desired)?;
        let cluster_obj = match self.cache.get(&fed) {
            Ok(obj) => obj,
            Err(CacheError::NotFound(_)) => {
                // Gone out of band; drop whatever version was recorded for it.
                self.ledger.remove(cluster, &fed.key);
                return Ok(());
            }
            Err(source) => {
                error!(cluster = %cluster, key = %fed.key, error = %source, "objectwatcher: cache lookup before delete failed");
                return Err(WatchError::Cache { key: fed, source });
            }
        };
        let key = fed.key;
        if !is_managed(&cluster_obj) {
            info!(cluster = %cluster, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: not deleting object flotilla does not manage");
            return Ok(());
        }

        let member = self.client(cluster).await?;
        let mapping = self.mapping(desired).await?;
        // Background explicitly: some kinds default to orphaning their dependents.
        let params = DeleteParams { propagation_policy: Some(PropagationPolicy::Background), ..DeleteParams::default() };
        let started = Instant::now();
        match member.client.delete(&mapping, namespace_for(&mapping, &key), &key.name, &params).await {
            Ok(()) => observe(Verb::Delete, "ok", started),
            Err(source) if is_not_found(&source) => observe(Verb::Delete, "gone", started),
            Err(source) => {
                observe(Verb::Delete, "error", started);
                error!(cluster = %cluster, kind = %key.kind, ns = %key.namespace, name = %key.name, error = %source, "objectwatcher: delete failed");
                return Err(WatchError::Remote { cluster: cluster.to_string(), key, verb: Verb::Delete, source });
            }
        }
        info!(cluster = %member.cluster_name, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: deleted");
        self.ledger.remove(&member.cluster_name, &key);
        Ok(())
    }

    /// Whether `cluster_obj` must be rewritten, judged only from the recorded version.
    ///
    /// Fails when nothing was ever recorded for the pair; callers should treat that as "write".
    pub fn needs_update(&self, cluster: &str, desired: &DynamicObject, cluster_obj: &DynamicObject) -> Result<bool, WatchError> {
        let key = ObjectKey::from_object(desired)?;
        let Some(version) = self.ledger.get(cluster, &key) else {
            error!(cluster = %cluster, kind = %key.kind, ns = %key.namespace, name = %key.name, "objectwatcher: no version record");
            return Err(WatchError::MissingVersion { cluster: cluster.to_string(), key });
        };
        Ok(object_needs_update(desired, cluster_obj, &version))
    }
}
