//! Cluster affinity filtering.

use k8s_openapi::api::core::v1::NodeSelectorRequirement;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::cluster::ClusterDetailInfo;
use crate::policy::{ClusterAffinity, FieldSelector, PlacementPolicy, SpreadField};

fn values(v: &Option<Vec<String>>) -> &[String] {
    v.as_deref().unwrap_or_default()
}

fn label_requirement_matches(req: &LabelSelectorRequirement, cluster: &ClusterDetailInfo) -> bool {
    let value = cluster.label(&req.key);
    match req.operator.as_str() {
        "In" => value.is_some_and(|v| values(&req.values).iter().any(|x| x == v)),
        "NotIn" => value.map_or(true, |v| !values(&req.values).iter().any(|x| x == v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        _ => false,
    }
}

pub fn label_selector_matches(selector: &LabelSelector, cluster: &ClusterDetailInfo) -> bool {
    let labels_ok = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(k, v)| cluster.label(k) == Some(v.as_str()));
    labels_ok
        && selector
            .match_expressions
            .iter()
            .flatten()
            .all(|req| label_requirement_matches(req, cluster))
}

fn field_requirement_matches(req: &NodeSelectorRequirement, cluster: &ClusterDetailInfo) -> bool {
    let field = match req.key.as_str() {
        "provider" => SpreadField::Provider,
        "region" => SpreadField::Region,
        "zone" => SpreadField::Zone,
        _ => return false,
    };
    let value = cluster.field(field);
    match req.operator.as_str() {
        "In" => value.is_some_and(|v| values(&req.values).iter().any(|x| x == v)),
        "NotIn" => value.map_or(true, |v| !values(&req.values).iter().any(|x| x == v)),
        _ => false,
    }
}

pub fn field_selector_matches(selector: &FieldSelector, cluster: &ClusterDetailInfo) -> bool {
    selector.match_expressions.iter().all(|req| field_requirement_matches(req, cluster))
}

impl ClusterAffinity {
    /// All configured conditions must hold; unset conditions match everything.
    pub fn matches(&self, cluster: &ClusterDetailInfo) -> bool {
        if self.exclude.iter().any(|n| n == &cluster.name) {
            return false;
        }
        if !self.cluster_names.is_empty() && !self.cluster_names.iter().any(|n| n == &cluster.name) {
            return false;
        }
        if let Some(sel) = &self.label_selector {
            if !label_selector_matches(sel, cluster) {
                return false;
            }
        }
        self.field_selector.as_ref().map_or(true, |sel| field_selector_matches(sel, cluster))
    }

    pub fn filter(&self, clusters: &[ClusterDetailInfo]) -> Vec<ClusterDetailInfo> {
        clusters.iter().filter(|c| self.matches(c)).cloned().collect()
    }
}

/// Candidates left after affinity, plus the name of the affinity term that produced them.
///
/// Affinity terms are tried in declaration order and the first one with a non-empty result
/// wins. When every term comes up empty the result is empty.
pub fn filter_by_affinity(policy: &PlacementPolicy, clusters: &[ClusterDetailInfo]) -> (Vec<ClusterDetailInfo>, Option<String>) {
    if let Some(terms) = &policy.cluster_affinities {
        for term in terms {
            let picked = term.affinity.filter(clusters);
            if !picked.is_empty() {
                return (picked, Some(term.affinity_name.clone()));
            }
            tracing::debug!(affinity = %term.affinity_name, "scheduler: affinity term matched nothing, falling back");
        }
        return (Vec::new(), None);
    }
    match &policy.cluster_affinity {
        Some(affinity) => (affinity.filter(clusters), None),
        None => (clusters.to_vec(), None),
    }
}
