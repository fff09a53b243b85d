//! Flotilla resource interpreter.
//!
//! Operators customize how Flotilla treats a resource type (field retention, replica
//! interpretation and revision, status reflection and aggregation, health, dependencies) by
//! attaching scripts to a [`CustomizationDocument`]. The [`ConfigurableInterpreter`] runs those
//! scripts through an external [`ScriptEngine`]; the [`rule`] registry exposes every hook by a
//! stable name for tooling.

#![forbid(unsafe_code)]

pub mod configurable;
pub mod customization;
pub mod engine;
pub mod interpreter;
pub mod rule;
pub mod types;

pub use configurable::ConfigurableInterpreter;
pub use customization::{CustomizationDocument, CustomizationRules, CustomizationSpec, CustomizationTarget, ScriptSlot};
pub use engine::{ScriptEngine, ScriptError};
pub use interpreter::{InterpretError, ResourceInterpreter};
pub use rule::{RuleArgs, RuleError, RuleKind, RuleOutput, RuleResult, RULES};
pub use types::{AggregatedStatusItem, DependentObjectReference, InterpreterOperation, ReplicaRequirements};
