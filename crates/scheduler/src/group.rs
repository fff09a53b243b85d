//! Partitioning of candidate clusters into spread groups.

use std::collections::BTreeMap;
use std::fmt;

use flotilla_core::GroupScoreReduction;

use crate::cluster::{cluster_order, ClusterDetailInfo};
use crate::policy::{SpreadConstraint, SpreadField};

/// What a spread constraint groups clusters by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpreadKey {
    Field(SpreadField),
    Label(String),
}

impl SpreadKey {
    pub fn of(constraint: &SpreadConstraint) -> Option<Self> {
        match (&constraint.spread_by_field, &constraint.spread_by_label) {
            (Some(f), _) => Some(SpreadKey::Field(*f)),
            (None, Some(l)) if !l.is_empty() => Some(SpreadKey::Label(l.clone())),
            _ => None,
        }
    }

    pub fn value_of<'a>(&self, cluster: &'a ClusterDetailInfo) -> Option<&'a str> {
        match self {
            SpreadKey::Field(f) => cluster.field(*f),
            SpreadKey::Label(l) => cluster.label(l).filter(|v| !v.is_empty()),
        }
    }
}

impl fmt::Display for SpreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpreadKey::Field(field) => write!(f, "field {field}"),
            SpreadKey::Label(label) => write!(f, "label {label}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadGroup {
    pub value: String,
    pub score: i64,
    /// Members in scheduling order.
    pub clusters: Vec<ClusterDetailInfo>,
}

impl SpreadGroup {
    pub fn best(&self) -> Option<&ClusterDetailInfo> {
        self.clusters.first()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadGroupBuilder {
    reduction: GroupScoreReduction,
}

impl SpreadGroupBuilder {
    pub fn new(reduction: GroupScoreReduction) -> Self {
        Self { reduction }
    }

    /// Group clusters by `key`. Clusters without a value for the key belong to no group.
    /// Groups come back by descending score, then ascending value.
    pub fn build(&self, key: &SpreadKey, clusters: &[ClusterDetailInfo]) -> Vec<SpreadGroup> {
        let mut by_value: BTreeMap<&str, Vec<ClusterDetailInfo>> = BTreeMap::new();
        for c in clusters {
            if let Some(v) = key.value_of(c) {
                by_value.entry(v).or_default().push(c.clone());
            }
        }
        let mut groups: Vec<SpreadGroup> = by_value
            .into_iter()
            .map(|(value, mut members)| {
                members.sort_by(cluster_order);
                SpreadGroup { value: value.to_string(), score: self.score(&members), clusters: members }
            })
            .collect();
        groups.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.value.cmp(&b.value)));
        groups
    }

    fn score(&self, members: &[ClusterDetailInfo]) -> i64 {
        match self.reduction {
            GroupScoreReduction::Sum => members.iter().fold(0i64, |acc, c| acc.saturating_add(c.score)),
            GroupScoreReduction::Max => members.iter().map(|c| c.score).max().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters() -> Vec<ClusterDetailInfo> {
        vec![
            ClusterDetailInfo::new("a", 10, -1).with_region("us"),
            ClusterDetailInfo::new("b", 5, -1).with_region("us"),
            ClusterDetailInfo::new("c", 12, -1).with_region("eu"),
            ClusterDetailInfo::new("d", 9, -1),
        ]
    }

    #[test]
    fn sum_reduction_orders_groups() {
        let groups = SpreadGroupBuilder::default().build(&SpreadKey::Field(SpreadField::Region), &clusters());
        let summary: Vec<_> = groups.iter().map(|g| (g.value.as_str(), g.score)).collect();
        assert_eq!(summary, [("us", 15), ("eu", 12)]);
        assert_eq!(groups[0].best().map(|c| c.name.as_str()), Some("a"));
    }

    #[test]
    fn max_reduction_changes_winner() {
        let groups = SpreadGroupBuilder::new(GroupScoreReduction::Max).build(&SpreadKey::Field(SpreadField::Region), &clusters());
        assert_eq!(groups[0].value, "eu");
    }

    #[test]
    fn label_groups_and_equal_scores_tie_break_on_value() {
        let cs = vec![
            ClusterDetailInfo::new("x", 1, -1).with_label("tier", "gold"),
            ClusterDetailInfo::new("y", 1, -1).with_label("tier", "bronze"),
        ];
        let groups = SpreadGroupBuilder::default().build(&SpreadKey::Label("tier".into()), &cs);
        assert_eq!(groups.iter().map(|g| g.value.as_str()).collect::<Vec<_>>(), ["bronze", "gold"]);
    }
}
