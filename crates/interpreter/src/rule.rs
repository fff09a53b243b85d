//! The fixed, ordered registry of interpreter rules.
//!
//! Each rule names one hook, knows where its script lives inside a [`CustomizationDocument`],
//! and can run that hook against a [`RuleArgs`] bag. Arguments are checked strictly: a rule
//! fails when something it needs is missing and also when it is handed something it does not
//! use.

use std::fmt;

use kube::core::DynamicObject;
use serde_json::Value;

use crate::customization::{CustomizationDocument, CustomizationRules, ScriptSlot};
use crate::interpreter::{InterpretError, ResourceInterpreter};
use crate::types::{AggregatedStatusItem, DependentObjectReference, InterpreterOperation, ReplicaRequirements};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Retention,
    ReplicaInterpretation,
    ReplicaRevision,
    StatusReflection,
    StatusAggregation,
    HealthInterpretation,
    DependencyInterpretation,
}

/// Every rule, in listing order.
pub const RULES: [RuleKind; 7] = [
    RuleKind::Retention,
    RuleKind::ReplicaInterpretation,
    RuleKind::ReplicaRevision,
    RuleKind::StatusReflection,
    RuleKind::StatusAggregation,
    RuleKind::HealthInterpretation,
    RuleKind::DependencyInterpretation,
];

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule {rule} is not enabled")]
    NotEnabled { rule: &'static str },
    #[error("rule {rule}: {argument} is not set")]
    MissingArgument { rule: &'static str, argument: &'static str },
    #[error("rule {rule} does not take {argument}")]
    UnexpectedArgument { rule: &'static str, argument: &'static str },
    #[error("rule {rule}: neither desired nor observed object is set")]
    MissingObject { rule: &'static str },
    #[error("rule {rule}: only one of desired or observed object may be set")]
    AmbiguousObject { rule: &'static str },
    #[error(transparent)]
    Interpret(#[from] InterpretError),
}

/// Inputs for one rule run. Which fields must be set depends on the rule.
#[derive(Debug, Clone, Default)]
pub struct RuleArgs {
    pub desired: Option<DynamicObject>,
    pub observed: Option<DynamicObject>,
    pub status: Option<Vec<AggregatedStatusItem>>,
    pub replica: Option<i64>,
}

impl RuleArgs {
    pub fn desired(obj: DynamicObject) -> Self {
        Self { desired: Some(obj), ..Default::default() }
    }

    pub fn observed(obj: DynamicObject) -> Self {
        Self { observed: Some(obj), ..Default::default() }
    }

    pub fn with_observed(mut self, obj: DynamicObject) -> Self {
        self.observed = Some(obj);
        self
    }

    pub fn with_status(mut self, items: Vec<AggregatedStatusItem>) -> Self {
        self.status = Some(items);
        self
    }

    pub fn with_replica(mut self, replica: i64) -> Self {
        self.replica = Some(replica);
        self
    }

    fn single_object(&self, rule: &'static str) -> Result<&DynamicObject, RuleError> {
        match (&self.desired, &self.observed) {
            (Some(_), Some(_)) => Err(RuleError::AmbiguousObject { rule }),
            (None, None) => Err(RuleError::MissingObject { rule }),
            (Some(o), None) | (None, Some(o)) => Ok(o),
        }
    }

    fn reject_status(&self, rule: &'static str) -> Result<(), RuleError> {
        match self.status {
            Some(_) => Err(RuleError::UnexpectedArgument { rule, argument: "status" }),
            None => Ok(()),
        }
    }

    fn reject_replica(&self, rule: &'static str) -> Result<(), RuleError> {
        match self.replica {
            Some(_) => Err(RuleError::UnexpectedArgument { rule, argument: "replica" }),
            None => Ok(()),
        }
    }
}

/// Successful result of a rule run.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutput {
    Retained(DynamicObject),
    Replicas { replica: i64, requires: Option<ReplicaRequirements> },
    Revised(DynamicObject),
    Status(Value),
    AggregatedStatus(DynamicObject),
    Healthy(bool),
    Dependencies(Vec<DependentObjectReference>),
}

impl RuleOutput {
    /// Flatten into ordered `(name, value)` pairs for display.
    pub fn into_named_values(self) -> Result<Vec<(&'static str, Value)>, serde_json::Error> {
        Ok(match self {
            RuleOutput::Retained(o) => vec![("retained", serde_json::to_value(o)?)],
            RuleOutput::Replicas { replica, requires } => {
                vec![("replica", Value::from(replica)), ("requires", serde_json::to_value(requires)?)]
            }
            RuleOutput::Revised(o) => vec![("revised", serde_json::to_value(o)?)],
            RuleOutput::Status(v) => vec![("status", v)],
            RuleOutput::AggregatedStatus(o) => vec![("aggregateStatus", serde_json::to_value(o)?)],
            RuleOutput::Healthy(b) => vec![("healthy", Value::Bool(b))],
            RuleOutput::Dependencies(d) => vec![("dependencies", serde_json::to_value(d)?)],
        })
    }
}

/// All or nothing: an error means no part of the output may be trusted.
pub type RuleResult = Result<RuleOutput, RuleError>;

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Retention => "retention",
            RuleKind::ReplicaInterpretation => "replica-interpretation",
            RuleKind::ReplicaRevision => "replica-revision",
            RuleKind::StatusReflection => "status-reflection",
            RuleKind::StatusAggregation => "status-aggregation",
            RuleKind::HealthInterpretation => "health-interpretation",
            RuleKind::DependencyInterpretation => "dependency-interpretation",
        }
    }

    pub fn operation(&self) -> InterpreterOperation {
        match self {
            RuleKind::Retention => InterpreterOperation::Retain,
            RuleKind::ReplicaInterpretation => InterpreterOperation::InterpretReplica,
            RuleKind::ReplicaRevision => InterpreterOperation::ReviseReplica,
            RuleKind::StatusReflection => InterpreterOperation::InterpretStatus,
            RuleKind::StatusAggregation => InterpreterOperation::AggregateStatus,
            RuleKind::HealthInterpretation => InterpreterOperation::InterpretHealth,
            RuleKind::DependencyInterpretation => InterpreterOperation::InterpretDependency,
        }
    }

    pub fn for_operation(op: InterpreterOperation) -> Self {
        match op {
            InterpreterOperation::Retain => RuleKind::Retention,
            InterpreterOperation::InterpretReplica => RuleKind::ReplicaInterpretation,
            InterpreterOperation::ReviseReplica => RuleKind::ReplicaRevision,
            InterpreterOperation::InterpretStatus => RuleKind::StatusReflection,
            InterpreterOperation::AggregateStatus => RuleKind::StatusAggregation,
            InterpreterOperation::InterpretHealth => RuleKind::HealthInterpretation,
            InterpreterOperation::InterpretDependency => RuleKind::DependencyInterpretation,
        }
    }

    /// Look a rule up by name.
    pub fn get(name: &str) -> Option<Self> {
        RULES.iter().copied().find(|r| r.name() == name)
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        RULES.iter().map(RuleKind::name)
    }

    fn slot<'a>(&self, c: &'a CustomizationRules) -> &'a Option<ScriptSlot> {
        match self {
            RuleKind::Retention => &c.retention,
            RuleKind::ReplicaInterpretation => &c.replica_resource,
            RuleKind::ReplicaRevision => &c.replica_revision,
            RuleKind::StatusReflection => &c.status_reflection,
            RuleKind::StatusAggregation => &c.status_aggregation,
            RuleKind::HealthInterpretation => &c.health_interpretation,
            RuleKind::DependencyInterpretation => &c.dependency_interpretation,
        }
    }

    fn slot_mut<'a>(&self, c: &'a mut CustomizationRules) -> &'a mut Option<ScriptSlot> {
        match self {
            RuleKind::Retention => &mut c.retention,
            RuleKind::ReplicaInterpretation => &mut c.replica_resource,
            RuleKind::ReplicaRevision => &mut c.replica_revision,
            RuleKind::StatusReflection => &mut c.status_reflection,
            RuleKind::StatusAggregation => &mut c.status_aggregation,
            RuleKind::HealthInterpretation => &mut c.health_interpretation,
            RuleKind::DependencyInterpretation => &mut c.dependency_interpretation,
        }
    }

    /// The rule's script, or `None` when the rule is disabled in `doc`.
    pub fn script<'a>(&self, doc: &'a CustomizationDocument) -> Option<&'a str> {
        self.slot(&doc.spec.customizations)
            .as_ref()
            .map(|s| s.lua_script.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Install `script`; an empty script disables the rule and drops its sub-document.
    pub fn set_script(&self, doc: &mut CustomizationDocument, script: &str) {
        let slot = self.slot_mut(&mut doc.spec.customizations);
        if script.is_empty() {
            *slot = None;
        } else {
            slot.get_or_insert_with(ScriptSlot::default).lua_script = script.to_string();
        }
    }

    pub fn run(&self, interpreter: &dyn ResourceInterpreter, args: &RuleArgs) -> RuleResult {
        let rule = self.name();
        let not_enabled = || RuleError::NotEnabled { rule };
        match self {
            RuleKind::Retention => {
                let desired = args.desired.as_ref().ok_or(RuleError::MissingArgument { rule, argument: "desired" })?;
                let observed = args.observed.as_ref().ok_or(RuleError::MissingArgument { rule, argument: "observed" })?;
                args.reject_status(rule)?;
                args.reject_replica(rule)?;
                let retained = interpreter.retain(desired, observed)?.ok_or_else(not_enabled)?;
                Ok(RuleOutput::Retained(retained))
            }
            RuleKind::ReplicaInterpretation => {
                let obj = args.single_object(rule)?;
                args.reject_status(rule)?;
                args.reject_replica(rule)?;
                let (replica, requires) = interpreter.get_replicas(obj)?.ok_or_else(not_enabled)?;
                Ok(RuleOutput::Replicas { replica, requires })
            }
            RuleKind::ReplicaRevision => {
                let obj = args.single_object(rule)?;
                let replica = args.replica.ok_or(RuleError::MissingArgument { rule, argument: "replica" })?;
                args.reject_status(rule)?;
                let revised = interpreter.revise_replica(obj, replica)?.ok_or_else(not_enabled)?;
                Ok(RuleOutput::Revised(revised))
            }
            RuleKind::StatusReflection => {
                let obj = args.single_object(rule)?;
                args.reject_status(rule)?;
                args.reject_replica(rule)?;
                Ok(RuleOutput::Status(interpreter.reflect_status(obj)?.ok_or_else(not_enabled)?))
            }
            RuleKind::StatusAggregation => {
                let obj = args.single_object(rule)?;
                let items = args.status.as_deref().ok_or(RuleError::MissingArgument { rule, argument: "status" })?;
                args.reject_replica(rule)?;
                let aggregated = interpreter.aggregate_status(obj, items)?.ok_or_else(not_enabled)?;
                Ok(RuleOutput::AggregatedStatus(aggregated))
            }
            RuleKind::HealthInterpretation => {
                let obj = args.single_object(rule)?;
                args.reject_status(rule)?;
                args.reject_replica(rule)?;
                Ok(RuleOutput::Healthy(interpreter.interpret_health(obj)?.ok_or_else(not_enabled)?))
            }
            RuleKind::DependencyInterpretation => {
                let obj = args.single_object(rule)?;
                args.reject_status(rule)?;
                args.reject_replica(rule)?;
                Ok(RuleOutput::Dependencies(interpreter.get_dependencies(obj)?.ok_or_else(not_enabled)?))
            }
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
