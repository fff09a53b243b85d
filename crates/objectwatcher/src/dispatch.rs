//! Carrying a placement decision out across member clusters.

use futures::future::join_all;
use kube::core::DynamicObject;
use tracing::{debug, warn};

use flotilla_core::set_managed;
use flotilla_interpreter::{InterpretError, InterpreterOperation, ResourceInterpreter};
use flotilla_scheduler::PlacementDecision;

use crate::error::WatchError;
use crate::watcher::{ObjectWatcher, OperationResult};

/// What happened to one target cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Updated(OperationResult),
    /// The recorded version says the cluster copy is current; nothing was written.
    UpToDate,
    Deleted,
}

#[derive(Debug)]
pub struct ClusterOutcome {
    pub cluster: String,
    pub result: Result<SyncAction, WatchError>,
}

/// Replica count a template asks for: the replica hook when enabled, else `spec.replicas`,
/// else 0.
pub fn desired_replicas(interpreter: &dyn ResourceInterpreter, template: &DynamicObject) -> Result<i64, InterpretError> {
    if interpreter.hook_enabled_for(template, InterpreterOperation::InterpretReplica) {
        if let Some((replica, _)) = interpreter.get_replicas(template)? {
            return Ok(replica);
        }
    }
    Ok(template.data.pointer("/spec/replicas").and_then(serde_json::Value::as_i64).unwrap_or(0))
}

/// The object `cluster` should hold for `template` when it receives `replicas`.
fn desired_for_cluster(
    interpreter: &dyn ResourceInterpreter,
    template: &DynamicObject,
    replicas: i32,
) -> Result<DynamicObject, InterpretError> {
    let mut obj = template.clone();
    obj.metadata.resource_version = None;
    obj.metadata.uid = None;
    set_managed(&mut obj);
    if interpreter.hook_enabled_for(&obj, InterpreterOperation::ReviseReplica) {
        if let Some(revised) = interpreter.revise_replica(&obj, i64::from(replicas))? {
            return Ok(revised);
        }
    }
    if let Some(slot) = obj.data.pointer_mut("/spec/replicas") {
        if slot.is_number() {
            *slot = serde_json::Value::from(replicas);
        }
    }
    Ok(obj)
}

async fn sync_one(
    watcher: &ObjectWatcher,
    interpreter: &dyn ResourceInterpreter,
    template: &DynamicObject,
    cluster: &str,
    replicas: i32,
) -> Result<SyncAction, WatchError> {
    let desired = desired_for_cluster(interpreter, template, replicas)?;
    let Some(cluster_obj) = watcher.cached(cluster, &desired)? else {
        watcher.create(cluster, &desired).await?;
        return Ok(SyncAction::Created);
    };
    match watcher.needs_update(cluster, &desired, &cluster_obj) {
        Ok(false) => return Ok(SyncAction::UpToDate),
        Ok(true) => {}
        // No baseline since this process started: write to establish one.
        Err(WatchError::MissingVersion { .. }) => debug!(cluster = %cluster, "dispatch: no version baseline, writing"),
        Err(e) => return Err(e),
    }
    watcher.update(cluster, &desired, &cluster_obj).await.map(SyncAction::Updated)
}

/// Apply `template` to every cluster in `decision`, concurrently. Outcomes come back in
/// cluster name order; a failure in one cluster does not stop the others.
pub async fn sync_to_clusters(
    watcher: &ObjectWatcher,
    interpreter: &dyn ResourceInterpreter,
    template: &DynamicObject,
    decision: &PlacementDecision,
) -> Vec<ClusterOutcome> {
    let tasks = decision.targets().map(|(cluster, replicas)| async move {
        let result = sync_one(watcher, interpreter, template, cluster, replicas).await;
        if let Err(e) = &result {
            warn!(cluster = %cluster, error = %e, "dispatch: cluster sync failed");
        }
        ClusterOutcome { cluster: cluster.to_string(), result }
    });
    join_all(tasks).await
}

/// Remove `template` from clusters a new decision no longer targets.
pub async fn prune_clusters<'a>(
    watcher: &ObjectWatcher,
    template: &DynamicObject,
    decision: &PlacementDecision,
    previous: impl IntoIterator<Item = &'a str>,
) -> Vec<ClusterOutcome> {
    let stale: Vec<&str> = previous.into_iter().filter(|c| decision.replicas(c).is_none()).collect();
    let tasks = stale.into_iter().map(|cluster| async move {
        let result = watcher.delete(cluster, template).await.map(|()| SyncAction::Deleted);
        ClusterOutcome { cluster: cluster.to_string(), result }
    });
    join_all(tasks).await
}
