//! Script-backed interpreter driven by customization documents.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::customization::{CustomizationDocument, CustomizationTarget};
use crate::engine::ScriptEngine;
use crate::interpreter::{InterpretError, ResourceInterpreter};
use crate::rule::RuleKind;
use crate::types::{AggregatedStatusItem, DependentObjectReference, InterpreterOperation, ReplicaRequirements};

type DocIndex = FxHashMap<CustomizationTarget, Arc<CustomizationDocument>>;

/// Runs customization scripts through a [`ScriptEngine`].
///
/// The document set is swapped atomically on [`load`](Self::load); concurrent calls see either
/// the old or the new set, never a mix.
pub struct ConfigurableInterpreter {
    engine: Arc<dyn ScriptEngine>,
    docs: ArcSwap<DocIndex>,
}

fn target_of(object: &DynamicObject) -> Option<CustomizationTarget> {
    object.types.as_ref().map(|t| CustomizationTarget::new(t.api_version.clone(), t.kind.clone()))
}

fn target_label(t: &CustomizationTarget) -> String {
    format!("{}/{}", t.api_version, t.kind)
}

impl ConfigurableInterpreter {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self { engine, docs: ArcSwap::from_pointee(DocIndex::default()) }
    }

    /// Replace the active document set. Two documents targeting the same type are rejected and
    /// the previous set stays active.
    pub fn load(&self, docs: impl IntoIterator<Item = CustomizationDocument>) -> Result<(), InterpretError> {
        let mut index = DocIndex::default();
        for doc in docs {
            let target = doc.target().clone();
            if let Some(prev) = index.get(&target) {
                return Err(InterpretError::DuplicateTarget {
                    target: target_label(&target),
                    first: prev.name().to_string(),
                    second: doc.name().to_string(),
                });
            }
            index.insert(target, Arc::new(doc));
        }
        info!(customizations = index.len(), "interpreter: customizations loaded");
        self.docs.store(Arc::new(index));
        Ok(())
    }

    pub fn customization(&self, target: &CustomizationTarget) -> Option<Arc<CustomizationDocument>> {
        self.docs.load().get(target).cloned()
    }

    fn script(&self, target: &CustomizationTarget, operation: InterpreterOperation) -> Option<String> {
        let doc = self.customization(target)?;
        RuleKind::for_operation(operation).script(&doc).map(str::to_string)
    }

    /// Call the hook's function with `args`; `None` when no script is enabled for the type.
    fn call(
        &self,
        object: &DynamicObject,
        operation: InterpreterOperation,
        args: Vec<Value>,
        nresults: usize,
    ) -> Result<Option<(String, Vec<Value>)>, InterpretError> {
        let Some(target) = target_of(object) else {
            return Ok(None);
        };
        let Some(script) = self.script(&target, operation) else {
            return Ok(None);
        };
        let label = target_label(&target);
        let started = Instant::now();
        let res = self.engine.call(&script, operation.script_function(), &args, nresults);
        histogram!("interpreter_call_ms", started.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(values) => {
                counter!("interpreter_calls_total", 1u64, "operation" => operation.as_str(), "outcome" => "ok");
                debug!(resource = %label, op = %operation, "interpreter: hook ran");
                Ok(Some((label, values)))
            }
            Err(source) => {
                counter!("interpreter_calls_total", 1u64, "operation" => operation.as_str(), "outcome" => "error");
                warn!(resource = %label, op = %operation, error = %source, "interpreter: hook failed");
                Err(InterpretError::Script { operation, target: label, source })
            }
        }
    }
}

fn encode<T: serde::Serialize>(operation: InterpreterOperation, v: &T) -> Result<Value, InterpretError> {
    serde_json::to_value(v).map_err(|source| InterpretError::Encode { operation, source })
}

fn decode<T: DeserializeOwned>(operation: InterpreterOperation, target: &str, v: Value) -> Result<T, InterpretError> {
    serde_json::from_value(v).map_err(|source| InterpretError::Decode { operation, target: target.to_string(), source })
}

/// First returned value, or null when the engine handed back fewer than asked for.
fn take(values: &mut Vec<Value>) -> Value {
    if values.is_empty() { Value::Null } else { values.remove(0) }
}

impl ResourceInterpreter for ConfigurableInterpreter {
    fn hook_enabled(&self, api_version: &str, kind: &str, operation: InterpreterOperation) -> bool {
        self.script(&CustomizationTarget::new(api_version, kind), operation).is_some()
    }

    fn retain(&self, desired: &DynamicObject, observed: &DynamicObject) -> Result<Option<DynamicObject>, InterpretError> {
        let op = InterpreterOperation::Retain;
        let args = vec![encode(op, desired)?, encode(op, observed)?];
        let Some((target, mut out)) = self.call(desired, op, args, 1)? else {
            return Ok(None);
        };
        decode(op, &target, take(&mut out)).map(Some)
    }

    fn get_replicas(&self, object: &DynamicObject) -> Result<Option<(i64, Option<ReplicaRequirements>)>, InterpretError> {
        let op = InterpreterOperation::InterpretReplica;
        let Some((target, mut out)) = self.call(object, op, vec![encode(op, object)?], 2)? else {
            return Ok(None);
        };
        let replica: i64 = decode(op, &target, take(&mut out))?;
        let requires: Option<ReplicaRequirements> = decode(op, &target, take(&mut out))?;
        Ok(Some((replica, requires)))
    }

    fn revise_replica(&self, object: &DynamicObject, replica: i64) -> Result<Option<DynamicObject>, InterpretError> {
        let op = InterpreterOperation::ReviseReplica;
        let args = vec![encode(op, object)?, Value::from(replica)];
        let Some((target, mut out)) = self.call(object, op, args, 1)? else {
            return Ok(None);
        };
        decode(op, &target, take(&mut out)).map(Some)
    }

    fn reflect_status(&self, object: &DynamicObject) -> Result<Option<Value>, InterpretError> {
        let op = InterpreterOperation::InterpretStatus;
        Ok(self.call(object, op, vec![encode(op, object)?], 1)?.map(|(_, mut out)| take(&mut out)))
    }

    fn aggregate_status(
        &self,
        object: &DynamicObject,
        items: &[AggregatedStatusItem],
    ) -> Result<Option<DynamicObject>, InterpretError> {
        let op = InterpreterOperation::AggregateStatus;
        let args = vec![encode(op, object)?, encode(op, &items)?];
        let Some((target, mut out)) = self.call(object, op, args, 1)? else {
            return Ok(None);
        };
        decode(op, &target, take(&mut out)).map(Some)
    }

    fn interpret_health(&self, object: &DynamicObject) -> Result<Option<bool>, InterpretError> {
        let op = InterpreterOperation::InterpretHealth;
        let Some((target, mut out)) = self.call(object, op, vec![encode(op, object)?], 1)? else {
            return Ok(None);
        };
        decode(op, &target, take(&mut out)).map(Some)
    }

    fn get_dependencies(&self, object: &DynamicObject) -> Result<Option<Vec<DependentObjectReference>>, InterpretError> {
        let op = InterpreterOperation::InterpretDependency;
        let Some((target, mut out)) = self.call(object, op, vec![encode(op, object)?], 1)? else {
            return Ok(None);
        };
        let deps: Option<Vec<DependentObjectReference>> = decode(op, &target, take(&mut out))?;
        Ok(Some(deps.unwrap_or_default()))
    }
}
