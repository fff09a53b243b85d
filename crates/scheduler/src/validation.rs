//! Placement policy validation. Every violation is collected, not just the first.

use std::collections::BTreeSet;
use std::fmt;

use crate::policy::{ClusterAffinity, ClusterAffinityTerm, FieldSelector, PlacementPolicy, SpreadConstraint, SpreadField};

/// Keys a field selector may match on.
pub const SUPPORTED_SELECTOR_KEYS: [&str; 3] = ["provider", "region", "zone"];
/// Operators a field selector may use.
pub const SUPPORTED_SELECTOR_OPERATORS: [&str; 2] = ["In", "NotIn"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate the placement section of a propagation policy.
pub fn validate_placement(placement: &PlacementPolicy) -> Vec<FieldError> {
    let path = "spec.placement";
    let mut errs = Vec::new();

    if placement.cluster_affinity.is_some() && placement.cluster_affinities.is_some() {
        errs.push(FieldError::new(path, "clusterAffinities can not co-exist with clusterAffinity"));
    }
    if let Some(affinity) = &placement.cluster_affinity {
        errs.extend(validate_cluster_affinity(affinity, &format!("{path}.clusterAffinity")));
    }
    if let Some(terms) = &placement.cluster_affinities {
        errs.extend(validate_cluster_affinities(terms, &format!("{path}.clusterAffinities")));
    }
    errs.extend(validate_spread_constraints(&placement.spread_constraints, &format!("{path}.spreadConstraints")));
    errs
}

fn validate_cluster_affinity(affinity: &ClusterAffinity, path: &str) -> Vec<FieldError> {
    match affinity.field_selector.as_ref().map(validate_field_selector) {
        Some(Err(msg)) => vec![FieldError::new(format!("{path}.fieldSelector"), msg)],
        _ => Vec::new(),
    }
}

fn validate_cluster_affinities(terms: &[ClusterAffinityTerm], path: &str) -> Vec<FieldError> {
    let mut errs = Vec::new();
    let mut names = BTreeSet::new();
    for (i, term) in terms.iter().enumerate() {
        if !names.insert(term.affinity_name.as_str()) {
            errs.push(FieldError::new(path, "each affinity term in a policy must have a unique name"));
        }
        errs.extend(validate_cluster_affinity(&term.affinity, &format!("{path}[{i}]")));
    }
    errs
}

/// Only provider/region/zone keys with In/NotIn operators are accepted.
pub fn validate_field_selector(selector: &FieldSelector) -> Result<(), String> {
    for expr in &selector.match_expressions {
        if !SUPPORTED_SELECTOR_KEYS.contains(&expr.key.as_str()) {
            return Err(format!("unsupported key {:?}, must be provider, region, or zone", expr.key));
        }
        if !SUPPORTED_SELECTOR_OPERATORS.contains(&expr.operator.as_str()) {
            return Err(format!("unsupported operator {:?}, must be In or NotIn", expr.operator));
        }
    }
    Ok(())
}

fn validate_spread_constraints(constraints: &[SpreadConstraint], path: &str) -> Vec<FieldError> {
    let mut errs = Vec::new();
    let mut by_field = BTreeSet::new();
    for (i, c) in constraints.iter().enumerate() {
        let at = format!("{path}[{i}]");
        let has_label = c.spread_by_label.as_deref().is_some_and(|l| !l.is_empty());
        match (c.spread_by_field, has_label) {
            (Some(_), true) => errs.push(FieldError::new(&at, "spreadByLabel should not co-exist with spreadByField")),
            (None, false) => errs.push(FieldError::new(&at, "one of spreadByField or spreadByLabel must be set")),
            _ => {}
        }
        if c.min_groups < 0 || c.max_groups < 0 {
            errs.push(FieldError::new(&at, "minGroups and maxGroups must not be negative"));
        }
        if c.max_groups > 0 && c.max_groups < c.min_groups {
            errs.push(FieldError::new(&at, "maxGroups lower than minGroups is not allowed"));
        }
        if let Some(field) = c.spread_by_field {
            if !by_field.insert(field) {
                errs.push(FieldError::new(&at, format!("duplicate spread constraint for field {field}")));
            }
        }
    }
    // The cluster constraint bounds the total number of clusters picked across groups.
    if !by_field.is_empty() && !by_field.contains(&SpreadField::Cluster) {
        errs.push(FieldError::new(
            path,
            "the cluster spread constraint must be enabled in one of the constraints in case of SpreadByField is enabled",
        ));
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::NodeSelectorRequirement;

    fn expr(key: &str, op: &str) -> NodeSelectorRequirement {
        NodeSelectorRequirement { key: key.into(), operator: op.into(), values: Some(vec!["x".into()]) }
    }

    fn field_affinity(key: &str, op: &str) -> ClusterAffinity {
        ClusterAffinity { field_selector: Some(FieldSelector { match_expressions: vec![expr(key, op)] }), ..Default::default() }
    }

    #[test]
    fn empty_policy_is_valid() {
        assert!(validate_placement(&PlacementPolicy::default()).is_empty());
    }

    #[test]
    fn affinity_and_affinities_are_exclusive() {
        let p = PlacementPolicy {
            cluster_affinity: Some(ClusterAffinity::default()),
            cluster_affinities: Some(vec![]),
            ..Default::default()
        };
        let errs = validate_placement(&p);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "spec.placement");
    }

    #[test]
    fn duplicate_affinity_names_rejected() {
        let term = |n: &str| ClusterAffinityTerm { affinity_name: n.into(), affinity: ClusterAffinity::default() };
        let p = PlacementPolicy { cluster_affinities: Some(vec![term("a"), term("b"), term("a")]), ..Default::default() };
        let errs = validate_placement(&p);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("unique name"));
    }

    #[test]
    fn selector_key_and_operator_restricted() {
        for (key, op, ok) in [("region", "In", true), ("zone", "NotIn", true), ("provider", "In", true), ("name", "In", false), ("region", "Exists", false)] {
            let p = PlacementPolicy { cluster_affinity: Some(field_affinity(key, op)), ..Default::default() };
            assert_eq!(validate_placement(&p).is_empty(), ok, "{key} {op}");
        }
        let p = PlacementPolicy {
            cluster_affinities: Some(vec![ClusterAffinityTerm { affinity_name: "t".into(), affinity: field_affinity("rack", "In") }]),
            ..Default::default()
        };
        assert_eq!(validate_placement(&p)[0].path, "spec.placement.clusterAffinities[0].fieldSelector");
    }

    #[test]
    fn max_below_min_rejected() {
        let p = PlacementPolicy {
            spread_constraints: vec![SpreadConstraint::by_field(SpreadField::Cluster, 3, 2)],
            ..Default::default()
        };
        let errs = validate_placement(&p);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "spec.placement.spreadConstraints[0]");
    }

    #[test]
    fn field_spread_requires_cluster_constraint() {
        let p = PlacementPolicy {
            spread_constraints: vec![SpreadConstraint::by_field(SpreadField::Region, 2, 0)],
            ..Default::default()
        };
        let errs = validate_placement(&p);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("cluster spread constraint"));

        // Label-only spreading does not need it.
        let p = PlacementPolicy { spread_constraints: vec![SpreadConstraint::by_label("tier", 1, 0)], ..Default::default() };
        assert!(validate_placement(&p).is_empty());
    }

    #[test]
    fn field_and_label_are_exclusive() {
        let mut c = SpreadConstraint::by_field(SpreadField::Cluster, 1, 0);
        c.spread_by_label = Some("tier".into());
        let p = PlacementPolicy { spread_constraints: vec![c], ..Default::default() };
        assert!(validate_placement(&p)[0].message.contains("should not co-exist"));
    }
}
