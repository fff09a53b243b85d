//! Flotilla object watcher.
//!
//! The only component that writes to member clusters. It creates, updates and deletes objects
//! on behalf of the control plane, keeps cluster-populated fields intact across updates,
//! refuses to touch objects it does not own, and remembers the last version it wrote so later
//! reconcile passes can skip redundant writes.

#![forbid(unsafe_code)]

pub mod client;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod watcher;

pub use client::{
    is_not_found, CacheError, ClusterClientFactory, DynamicClient, MemberClusterClient, ObjectCache, ResourceMapping,
    TypeResolver,
};
pub use dispatch::{desired_replicas, prune_clusters, sync_to_clusters, ClusterOutcome, SyncAction};
pub use error::{Verb, WatchError};
pub use ledger::VersionLedger;
pub use watcher::{ObjectWatcher, OperationResult};
