#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use flotilla_interpreter::{
    AggregatedStatusItem, ConfigurableInterpreter, CustomizationDocument, CustomizationTarget, RuleArgs, RuleError,
    RuleKind, RuleOutput, ScriptEngine, ScriptError,
};
use kube::core::DynamicObject;
use serde_json::{json, Value};

/// Understands just enough of each hook to exercise argument plumbing: it echoes objects back
/// with a marker and records which function was called with how many arguments.
#[derive(Default)]
struct EchoEngine {
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptEngine for EchoEngine {
    fn call(&self, _script: &str, function: &str, args: &[Value], _n: usize) -> Result<Vec<Value>, ScriptError> {
        self.calls.lock().unwrap().push((function.to_string(), args.len()));
        let mut first = args.first().cloned().unwrap_or(Value::Null);
        match function {
            "Retain" => {
                first["metadata"]["labels"]["retained"] = json!("yes");
                Ok(vec![first])
            }
            "ReviseReplica" => {
                first["spec"]["replicas"] = args[1].clone();
                Ok(vec![first])
            }
            "GetReplicas" => Ok(vec![first["spec"]["replicas"].clone(), Value::Null]),
            "AggregateStatus" => {
                let n = args[1].as_array().map_or(0, Vec::len);
                first["status"] = json!({ "clusters": n });
                Ok(vec![first])
            }
            "InterpretHealth" => Ok(vec![json!(first["status"]["ready"] == json!(true))]),
            "GetDependencies" => Ok(vec![json!([{ "apiVersion": "v1", "kind": "ConfigMap", "namespace": "default", "name": "cfg" }])]),
            "ReflectStatus" => Ok(vec![first["status"].clone()]),
            other => Err(ScriptError::MissingFunction(other.to_string())),
        }
    }
}

fn workload() -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "web", "namespace": "default" },
        "spec": { "replicas": 3 },
        "status": { "ready": true }
    }))
    .unwrap()
}

fn interpreter_with_all_rules() -> (Arc<EchoEngine>, ConfigurableInterpreter) {
    let engine = Arc::new(EchoEngine::default());
    let interp = ConfigurableInterpreter::new(engine.clone());
    let mut doc = CustomizationDocument::new("deploy", CustomizationTarget::new("apps/v1", "Deployment"));
    for rule in RuleKind::names().filter_map(RuleKind::get) {
        rule.set_script(&mut doc, "-- script");
    }
    interp.load([doc]).unwrap();
    (engine, interp)
}

#[test]
fn every_rule_runs_with_its_arguments() {
    let (engine, interp) = interpreter_with_all_rules();
    let obj = workload();

    let out = RuleKind::Retention.run(&interp, &RuleArgs::desired(obj.clone()).with_observed(obj.clone())).unwrap();
    let RuleOutput::Retained(retained) = out else { panic!("unexpected rule output") };
    assert_eq!(retained.metadata.labels.unwrap()["retained"], "yes");

    let out = RuleKind::ReplicaInterpretation.run(&interp, &RuleArgs::observed(obj.clone())).unwrap();
    assert_eq!(out, RuleOutput::Replicas { replica: 3, requires: None });

    let out = RuleKind::ReplicaRevision.run(&interp, &RuleArgs::desired(obj.clone()).with_replica(7)).unwrap();
    let RuleOutput::Revised(revised) = out else { panic!("unexpected rule output") };
    assert_eq!(revised.data["spec"]["replicas"], json!(7));

    let items = vec![AggregatedStatusItem { cluster_name: "a".into(), applied: true, ..Default::default() }; 2];
    let out = RuleKind::StatusAggregation.run(&interp, &RuleArgs::desired(obj.clone()).with_status(items)).unwrap();
    let RuleOutput::AggregatedStatus(agg) = out else { panic!("unexpected rule output") };
    assert_eq!(agg.data["status"]["clusters"], json!(2));

    assert_eq!(RuleKind::HealthInterpretation.run(&interp, &RuleArgs::observed(obj.clone())).unwrap(), RuleOutput::Healthy(true));

    let out = RuleKind::DependencyInterpretation.run(&interp, &RuleArgs::desired(obj.clone())).unwrap();
    let RuleOutput::Dependencies(deps) = out else { panic!("unexpected rule output") };
    assert_eq!(deps[0].name, "cfg");

    let out = RuleKind::StatusReflection.run(&interp, &RuleArgs::observed(obj)).unwrap();
    assert_eq!(out.into_named_values().unwrap(), vec![("status", json!({ "ready": true }))]);

    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls[0], ("Retain".to_string(), 2));
    assert_eq!(calls[2], ("ReviseReplica".to_string(), 2));
    assert_eq!(calls.len(), 7);
}

#[test]
fn disabled_rule_is_reported_not_defaulted() {
    let engine = Arc::new(EchoEngine::default());
    let interp = ConfigurableInterpreter::new(engine.clone());
    let err = RuleKind::HealthInterpretation.run(&interp, &RuleArgs::observed(workload())).unwrap_err();
    assert!(matches!(err, RuleError::NotEnabled { rule: "health-interpretation" }));
    assert_eq!(err.to_string(), "rule health-interpretation is not enabled");
    assert!(engine.calls.lock().unwrap().is_empty());
}

#[test]
fn one_object_rules_distinguish_both_from_neither() {
    let (engine, interp) = interpreter_with_all_rules();
    let both = RuleArgs::desired(workload()).with_observed(workload());
    for rule in [RuleKind::ReplicaInterpretation, RuleKind::StatusReflection, RuleKind::HealthInterpretation, RuleKind::DependencyInterpretation] {
        assert!(matches!(rule.run(&interp, &both), Err(RuleError::AmbiguousObject { .. })), "{rule}");
        assert!(matches!(rule.run(&interp, &RuleArgs::default()), Err(RuleError::MissingObject { .. })), "{rule}");
    }
    assert!(engine.calls.lock().unwrap().is_empty());
}

#[test]
fn unrequired_and_missing_arguments_are_errors() {
    let (_, interp) = interpreter_with_all_rules();

    let err = RuleKind::HealthInterpretation.run(&interp, &RuleArgs::observed(workload()).with_replica(2)).unwrap_err();
    assert!(matches!(err, RuleError::UnexpectedArgument { argument: "replica", .. }));

    let err = RuleKind::ReplicaRevision.run(&interp, &RuleArgs::observed(workload())).unwrap_err();
    assert!(matches!(err, RuleError::MissingArgument { argument: "replica", .. }));

    let err = RuleKind::StatusAggregation.run(&interp, &RuleArgs::observed(workload())).unwrap_err();
    assert!(matches!(err, RuleError::MissingArgument { argument: "status", .. }));

    let err = RuleKind::Retention.run(&interp, &RuleArgs::desired(workload())).unwrap_err();
    assert!(matches!(err, RuleError::MissingArgument { argument: "observed", .. }));

    let err = RuleKind::Retention.run(&interp, &RuleArgs::observed(workload())).unwrap_err();
    assert!(matches!(err, RuleError::MissingArgument { argument: "desired", .. }));
}
