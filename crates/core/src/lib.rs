//! Flotilla core types shared by the scheduler, the resource interpreter and the object watcher.

#![forbid(unsafe_code)]

pub mod config;
pub mod meta;

pub use config::{ConfigError, FlotillaConfig, GroupScoreReduction};
pub use meta::{
    annotation, conflict_resolution, gvk_of, is_managed, object_needs_update, object_version,
    retain_annotations, retain_labels, set_managed, FederatedKey, MetaError, ObjectKey,
};

/// Label asserting that Flotilla owns the lifecycle of an object in a member cluster.
pub const MANAGED_BY_LABEL: &str = "flotilla.io/managed";
pub const MANAGED_BY_LABEL_VALUE: &str = "true";

/// Annotation on a desired object that decides what happens when the member cluster already
/// holds an object Flotilla does not manage.
pub const CONFLICT_RESOLUTION_ANNOTATION: &str = "work.flotilla.io/conflict-resolution";
/// Take over the existing object (promotion of a pre-existing workload).
pub const CONFLICT_RESOLUTION_OVERWRITE: &str = "overwrite";
/// Leave the existing object alone and report a conflict. Same as no annotation.
pub const CONFLICT_RESOLUTION_ABORT: &str = "abort";

pub mod prelude {
    pub use super::{
        FederatedKey, FlotillaConfig, ObjectKey, CONFLICT_RESOLUTION_ANNOTATION,
        CONFLICT_RESOLUTION_OVERWRITE, MANAGED_BY_LABEL, MANAGED_BY_LABEL_VALUE,
    };
}
