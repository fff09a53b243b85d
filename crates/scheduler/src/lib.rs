//! Flotilla scheduler: turns a placement policy and a snapshot of scored member clusters into a
//! concrete placement decision.
//!
//! Scheduling passes are pure functions of their inputs. Identical inputs always produce the
//! same decision, which makes re-scheduling an unchanged resource a no-op.

#![forbid(unsafe_code)]

pub mod affinity;
pub mod assign;
pub mod catalog;
pub mod cluster;
pub mod error;
pub mod group;
pub mod policy;
pub mod schedule;
pub mod validation;

pub use assign::distribute_replicas;
pub use catalog::{CatalogError, ClusterCatalog, StaticCatalog};
pub use cluster::{sort_clusters, ClusterDetailInfo, ClusterMeta, INVALID_REPLICAS};
pub use error::ScheduleError;
pub use group::{SpreadGroup, SpreadGroupBuilder, SpreadKey};
pub use policy::{
    ClusterAffinity, ClusterAffinityTerm, FieldSelector, PlacementPolicy, SpreadConstraint, SpreadField,
};
pub use schedule::{PlacementDecision, Scheduler};
pub use validation::{validate_placement, FieldError};
