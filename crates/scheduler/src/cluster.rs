//! Scored member clusters as seen by one scheduling pass.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::policy::SpreadField;

/// Available replicas are unknown or irrelevant; never a real count.
pub const INVALID_REPLICAS: i64 = -1;

fn unbounded() -> i64 {
    INVALID_REPLICAS
}

/// Topology and labels of a member cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A candidate cluster with its score and free capacity for the resource being scheduled.
///
/// Recomputed on every pass from live cluster state; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetailInfo {
    pub name: String,
    #[serde(default)]
    pub score: i64,
    /// Replicas the cluster can still take, or [`INVALID_REPLICAS`] for unbounded.
    #[serde(default = "unbounded")]
    pub available_replicas: i64,
    #[serde(flatten)]
    pub cluster: ClusterMeta,
}

impl ClusterDetailInfo {
    pub fn new(name: impl Into<String>, score: i64, available_replicas: i64) -> Self {
        Self { name: name.into(), score, available_replicas, cluster: ClusterMeta::default() }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.cluster.region = Some(region.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.cluster.zone = Some(zone.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.cluster.provider = Some(provider.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cluster.labels.insert(key.into(), value.into());
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.available_replicas < 0
    }

    /// Value of a spread field; `cluster` resolves to the cluster name.
    pub fn field(&self, field: SpreadField) -> Option<&str> {
        match field {
            SpreadField::Cluster => Some(self.name.as_str()),
            SpreadField::Region => self.cluster.region.as_deref(),
            SpreadField::Zone => self.cluster.zone.as_deref(),
            SpreadField::Provider => self.cluster.provider.as_deref(),
        }
        .filter(|v| !v.is_empty())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.cluster.labels.get(key).map(String::as_str)
    }
}

/// Descending score, ties broken by ascending name.
pub fn cluster_order(a: &ClusterDetailInfo, b: &ClusterDetailInfo) -> Ordering {
    b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name))
}

pub fn sort_clusters(infos: &mut [ClusterDetailInfo]) {
    infos.sort_by(cluster_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_scores_order_by_name() {
        let mut v = vec![
            ClusterDetailInfo::new("b", 5, 0),
            ClusterDetailInfo::new("c", 9, 0),
            ClusterDetailInfo::new("a", 5, 0),
        ];
        sort_clusters(&mut v);
        let names: Vec<_> = v.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn available_defaults_to_unbounded() {
        let c: ClusterDetailInfo = serde_json::from_value(serde_json::json!({"name": "x", "region": "eu"})).unwrap();
        assert!(c.is_unbounded());
        assert_eq!(c.field(SpreadField::Region), Some("eu"));
        assert_eq!(c.field(SpreadField::Zone), None);
        assert_eq!(c.field(SpreadField::Cluster), Some("x"));
    }
}
