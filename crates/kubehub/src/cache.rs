//! Watch-fed, in-memory cache of member cluster objects.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use futures::TryStreamExt;
use kube::api::Api;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::runtime::watcher::{self, Event};
use kube::Client;
use metrics::{counter, gauge};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flotilla_core::{FederatedKey, ObjectKey};
use flotilla_objectwatcher::{CacheError, ObjectCache, ResourceMapping};

type SyncKey = (String, String, String, String);

fn sync_key(cluster: &str, gvk: &GroupVersionKind) -> SyncKey {
    (cluster.to_string(), gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())
}

/// Objects by federated key. A lookup reports `NotFound` only once the (cluster, kind) stream
/// has delivered its initial list; before that the answer is unknown.
#[derive(Default)]
pub struct MemoryCache {
    objects: RwLock<FxHashMap<FederatedKey, DynamicObject>>,
    synced: RwLock<FxHashSet<SyncKey>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_synced(&self, cluster: &str, gvk: &GroupVersionKind) -> bool {
        self.synced.read().unwrap_or_else(PoisonError::into_inner).contains(&sync_key(cluster, gvk))
    }

    /// Poll until the initial list for (`cluster`, `gvk`) has landed, up to `timeout`.
    pub async fn wait_synced(&self, cluster: &str, gvk: &GroupVersionKind, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_synced(cluster, gvk) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Fold one watch event for `cluster` into the cache.
    pub fn apply_event(&self, cluster: &str, gvk: &GroupVersionKind, event: Event<DynamicObject>) {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            Event::Applied(obj) => match key_for(cluster, gvk, &obj) {
                Some(k) => {
                    objects.insert(k, obj);
                }
                None => warn!(cluster, "kubehub: dropping unnamed object"),
            },
            Event::Deleted(obj) => {
                if let Some(k) = key_for(cluster, gvk, &obj) {
                    objects.remove(&k);
                }
            }
            Event::Restarted(list) => {
                objects.retain(|k, _| !(k.cluster == cluster && k.key.gvk() == *gvk));
                for obj in list {
                    if let Some(k) = key_for(cluster, gvk, &obj) {
                        objects.insert(k, obj);
                    }
                }
                self.synced.write().unwrap_or_else(PoisonError::into_inner).insert(sync_key(cluster, gvk));
                debug!(cluster, kind = %gvk.kind, "kubehub: cache resynced");
            }
        }
        gauge!("kubehub_cache_objects", objects.len() as f64);
    }

    /// List+watch one kind on one member cluster until the stream ends or fails. Either way the
    /// pair is marked unsynced on return, so lookups stop answering `NotFound` from a frozen view.
    pub async fn run_watch(&self, cluster: &str, client: Client, mapping: &ResourceMapping) -> Result<()> {
        let api: Api<DynamicObject> = Api::all_with(client, &mapping.api_resource);
        let gvk = GroupVersionKind::gvk(&mapping.api_resource.group, &mapping.api_resource.version, &mapping.api_resource.kind);
        let stream = watcher::watcher(api, watcher::Config::default());
        futures::pin_mut!(stream);
        info!(cluster, kind = %gvk.kind, "kubehub: watch started");
        let res = async {
            while let Some(ev) = stream.try_next().await? {
                counter!("kubehub_watch_events_total", 1u64, "cluster" => cluster.to_string());
                self.apply_event(cluster, &gvk, ev);
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;
        self.mark_unsynced(cluster, &gvk);
        warn!(cluster, kind = %gvk.kind, "kubehub: watch stream ended");
        res
    }

    /// Forget that the initial list for (`cluster`, `gvk`) arrived. Cached objects stay readable
    /// but a miss is reported as unknown.
    pub fn mark_unsynced(&self, cluster: &str, gvk: &GroupVersionKind) {
        self.synced.write().unwrap_or_else(PoisonError::into_inner).remove(&sync_key(cluster, gvk));
    }

    pub fn spawn_watch(
        self: &std::sync::Arc<Self>,
        cluster: String,
        client: Client,
        mapping: ResourceMapping,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.run_watch(&cluster, client, &mapping).await {
                warn!(cluster = %cluster, error = %e, "kubehub: watch failed");
            }
        })
    }
}

fn key_for(cluster: &str, gvk: &GroupVersionKind, obj: &DynamicObject) -> Option<FederatedKey> {
    let name = obj.metadata.name.clone().filter(|n| !n.is_empty())?;
    Some(FederatedKey::new(
        cluster,
        ObjectKey {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name,
        },
    ))
}

impl ObjectCache for MemoryCache {
    fn get(&self, key: &FederatedKey) -> Result<DynamicObject, CacheError> {
        if let Some(obj) = self.objects.read().unwrap_or_else(PoisonError::into_inner).get(key) {
            return Ok(obj.clone());
        }
        if self.is_synced(&key.cluster, &key.key.gvk()) {
            Err(CacheError::NotFound(key.clone()))
        } else {
            Err(CacheError::Other(format!("{} on cluster {} not synced", key.key.kind, key.cluster)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ApiResource;

    fn gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("apps", "v1", "Deployment")
    }

    fn deploy(name: &str) -> DynamicObject {
        DynamicObject::new(name, &ApiResource::from_gvk(&gvk())).within("default")
    }

    fn key(cluster: &str, name: &str) -> FederatedKey {
        FederatedKey::for_object(cluster, &deploy(name)).unwrap()
    }

    #[test]
    fn unsynced_miss_is_not_not_found() {
        let cache = MemoryCache::new();
        assert!(matches!(cache.get(&key("a", "web")), Err(CacheError::Other(_))));
        cache.apply_event("a", &gvk(), Event::Restarted(vec![]));
        assert!(matches!(cache.get(&key("a", "web")), Err(CacheError::NotFound(_))));
        // Other clusters stay unsynced.
        assert!(matches!(cache.get(&key("b", "web")), Err(CacheError::Other(_))));
    }

    #[tokio::test]
    async fn wait_synced_times_out_then_succeeds() {
        let cache = MemoryCache::new();
        assert!(!cache.wait_synced("a", &gvk(), Duration::from_millis(60)).await);
        cache.apply_event("a", &gvk(), Event::Restarted(vec![]));
        assert!(cache.wait_synced("a", &gvk(), Duration::from_millis(60)).await);
    }

    #[test]
    fn unsynced_after_watch_ends() {
        let cache = MemoryCache::new();
        cache.apply_event("a", &gvk(), Event::Restarted(vec![deploy("web")]));
        assert!(matches!(cache.get(&key("a", "api")), Err(CacheError::NotFound(_))));
        cache.mark_unsynced("a", &gvk());
        assert!(matches!(cache.get(&key("a", "api")), Err(CacheError::Other(_))));
        assert!(cache.get(&key("a", "web")).is_ok());
        cache.apply_event("a", &gvk(), Event::Restarted(vec![]));
        assert!(matches!(cache.get(&key("a", "api")), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn applied_and_deleted() {
        let cache = MemoryCache::new();
        cache.apply_event("a", &gvk(), Event::Restarted(vec![deploy("web")]));
        assert_eq!(cache.get(&key("a", "web")).unwrap().metadata.name.as_deref(), Some("web"));
        cache.apply_event("a", &gvk(), Event::Applied(deploy("api")));
        assert_eq!(cache.len(), 2);
        cache.apply_event("a", &gvk(), Event::Deleted(deploy("web")));
        assert!(matches!(cache.get(&key("a", "web")), Err(CacheError::NotFound(_))));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn restart_replaces_only_its_cluster() {
        let cache = MemoryCache::new();
        cache.apply_event("a", &gvk(), Event::Restarted(vec![deploy("web"), deploy("api")]));
        cache.apply_event("b", &gvk(), Event::Restarted(vec![deploy("web")]));
        cache.apply_event("a", &gvk(), Event::Restarted(vec![deploy("db")]));
        assert!(cache.get(&key("a", "web")).is_err());
        assert!(cache.get(&key("a", "db")).is_ok());
        assert!(cache.get(&key("b", "web")).is_ok());
        assert_eq!(cache.len(), 2);
    }
}
