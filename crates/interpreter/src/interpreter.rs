use kube::core::DynamicObject;

use flotilla_core::MetaError;

use crate::engine::ScriptError;
use crate::types::{AggregatedStatusItem, DependentObjectReference, InterpreterOperation, ReplicaRequirements};

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error(transparent)]
    Meta(#[from] MetaError),
    #[error("{operation} script for {target}: {source}")]
    Script {
        operation: InterpreterOperation,
        target: String,
        #[source]
        source: ScriptError,
    },
    #[error("{operation} script for {target} returned an unexpected value: {source}")]
    Decode {
        operation: InterpreterOperation,
        target: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode {operation} arguments: {source}")]
    Encode {
        operation: InterpreterOperation,
        #[source]
        source: serde_json::Error,
    },
    #[error("customizations {first} and {second} both target {target}")]
    DuplicateTarget { target: String, first: String, second: String },
}

/// Per-type customization hooks.
///
/// Every hook returns `Ok(None)` when no customization is enabled for the object's type, so
/// callers can tell "ran and produced nothing" apart from "did not run".
pub trait ResourceInterpreter: Send + Sync {
    fn hook_enabled(&self, api_version: &str, kind: &str, operation: InterpreterOperation) -> bool;

    fn retain(&self, desired: &DynamicObject, observed: &DynamicObject) -> Result<Option<DynamicObject>, InterpretError>;

    fn get_replicas(&self, object: &DynamicObject) -> Result<Option<(i64, Option<ReplicaRequirements>)>, InterpretError>;

    fn revise_replica(&self, object: &DynamicObject, replica: i64) -> Result<Option<DynamicObject>, InterpretError>;

    fn reflect_status(&self, object: &DynamicObject) -> Result<Option<serde_json::Value>, InterpretError>;

    fn aggregate_status(
        &self,
        object: &DynamicObject,
        items: &[AggregatedStatusItem],
    ) -> Result<Option<DynamicObject>, InterpretError>;

    fn interpret_health(&self, object: &DynamicObject) -> Result<Option<bool>, InterpretError>;

    fn get_dependencies(&self, object: &DynamicObject) -> Result<Option<Vec<DependentObjectReference>>, InterpretError>;

    /// Convenience over [`hook_enabled`](Self::hook_enabled) reading the type from `object`.
    fn hook_enabled_for(&self, object: &DynamicObject, operation: InterpreterOperation) -> bool {
        object
            .types
            .as_ref()
            .is_some_and(|t| self.hook_enabled(&t.api_version, &t.kind, operation))
    }
}
