//! One scheduling pass: affinity, spread grouping, selection and replica distribution.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use flotilla_core::GroupScoreReduction;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::affinity::filter_by_affinity;
use crate::assign::distribute_replicas;
use crate::cluster::{sort_clusters, ClusterDetailInfo};
use crate::error::ScheduleError;
use crate::group::{SpreadGroupBuilder, SpreadKey};
use crate::policy::{PlacementPolicy, SpreadConstraint, SpreadField};
use crate::validation::validate_placement;

/// Target clusters and the replicas each receives. Replaces any earlier decision for the same
/// resource wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub clusters: BTreeMap<String, i32>,
}

impl PlacementDecision {
    pub fn replicas(&self, cluster: &str) -> Option<i32> {
        self.clusters.get(cluster).copied()
    }

    pub fn total(&self) -> i32 {
        self.clusters.values().sum()
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, i32)> {
        self.clusters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Stateless scheduler. Cheap to copy and safe to share between threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    groups: SpreadGroupBuilder,
}

// Priority when several group constraints are present; the first one drives selection and
// the rest are checked afterwards.
fn primary_rank(c: &SpreadConstraint) -> u8 {
    match c.spread_by_field {
        Some(SpreadField::Region) => 0,
        Some(SpreadField::Zone) => 1,
        Some(SpreadField::Provider) => 2,
        _ => 3,
    }
}

fn bound(max: i32, n: usize) -> usize {
    if max > 0 { (max as usize).min(n) } else { n }
}

impl Scheduler {
    pub fn new(reduction: GroupScoreReduction) -> Self {
        Self { groups: SpreadGroupBuilder::new(reduction) }
    }

    pub fn schedule(
        &self,
        policy: &PlacementPolicy,
        candidates: &[ClusterDetailInfo],
        desired_replicas: i32,
    ) -> Result<PlacementDecision, ScheduleError> {
        let started = Instant::now();
        let res = self.schedule_inner(policy, candidates, desired_replicas);
        histogram!("scheduler_schedule_ms", started.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(d) => {
                counter!("scheduler_schedule_total", 1u64, "outcome" => "ok");
                info!(clusters = d.clusters.len(), replicas = d.total(), "scheduler: placed");
            }
            Err(e) => {
                let outcome = if e.is_validation() { "invalid" } else { "unschedulable" };
                counter!("scheduler_schedule_total", 1u64, "outcome" => outcome);
                debug!(error = %e, "scheduler: failed");
            }
        }
        res
    }

    fn schedule_inner(
        &self,
        policy: &PlacementPolicy,
        candidates: &[ClusterDetailInfo],
        desired_replicas: i32,
    ) -> Result<PlacementDecision, ScheduleError> {
        let errs = validate_placement(policy);
        if !errs.is_empty() {
            return Err(ScheduleError::Validation(errs));
        }
        if desired_replicas < 0 {
            return Err(ScheduleError::InvalidReplicas(desired_replicas));
        }
        let mut names = BTreeSet::new();
        if let Some(dup) = candidates.iter().find(|c| !names.insert(c.name.as_str())) {
            return Err(ScheduleError::DuplicateCluster(dup.name.clone()));
        }

        let (mut feasible, term) = filter_by_affinity(policy, candidates);
        if feasible.is_empty() {
            return Err(ScheduleError::NoFeasibleCluster(format!(
                "none of {} candidate clusters matches the cluster affinity",
                candidates.len()
            )));
        }
        sort_clusters(&mut feasible);
        debug!(candidates = candidates.len(), feasible = feasible.len(), affinity = ?term, "scheduler: affinity applied");

        let selected = self.select(policy, &feasible)?;
        let clusters = distribute_replicas(&selected, desired_replicas);
        Ok(PlacementDecision { clusters })
    }

    /// Pick target clusters from `feasible`, which is already in scheduling order.
    fn select(&self, policy: &PlacementPolicy, feasible: &[ClusterDetailInfo]) -> Result<Vec<ClusterDetailInfo>, ScheduleError> {
        let cluster_constraint = policy
            .spread_constraints
            .iter()
            .find(|c| c.spread_by_field == Some(SpreadField::Cluster));
        let (min_c, max_c) = cluster_constraint.map_or((0, 0), |c| (c.min_groups, c.max_groups));

        let mut group_constraints: Vec<&SpreadConstraint> = policy
            .spread_constraints
            .iter()
            .filter(|c| c.spread_by_field != Some(SpreadField::Cluster))
            .collect();
        group_constraints.sort_by_key(|c| primary_rank(c));

        let selected = match group_constraints.split_first() {
            None => feasible[..bound(max_c, feasible.len())].to_vec(),
            Some((primary, rest)) => {
                let picked = self.select_by_groups(primary, max_c, feasible)?;
                for c in rest {
                    check_group_bounds(c, &picked)?;
                }
                picked
            }
        };

        if (selected.len() as i64) < i64::from(min_c) {
            return Err(ScheduleError::MinGroupsUnmet {
                key: SpreadKey::Field(SpreadField::Cluster).to_string(),
                required: min_c,
                available: selected.len(),
            });
        }
        Ok(selected)
    }

    fn select_by_groups(
        &self,
        primary: &SpreadConstraint,
        max_clusters: i32,
        feasible: &[ClusterDetailInfo],
    ) -> Result<Vec<ClusterDetailInfo>, ScheduleError> {
        let Some(key) = SpreadKey::of(primary) else {
            return Ok(feasible.to_vec());
        };
        let groups = self.groups.build(&key, feasible);
        let mut take = bound(primary.max_groups, groups.len());
        if max_clusters > 0 {
            take = take.min(max_clusters as usize);
        }
        if (take as i64) < i64::from(primary.min_groups) {
            return Err(ScheduleError::MinGroupsUnmet { key: key.to_string(), required: primary.min_groups, available: take });
        }
        if take == 0 {
            return Err(ScheduleError::NoFeasibleCluster(format!("no cluster carries a value for {key}")));
        }
        let chosen = &groups[..take];
        debug!(
            key = %key,
            groups = ?chosen.iter().map(|g| (g.value.as_str(), g.score)).collect::<Vec<_>>(),
            "scheduler: groups chosen"
        );

        // One cluster from every chosen group first, then the best of what remains in them.
        let mut names: BTreeSet<&str> = chosen.iter().filter_map(|g| g.best()).map(|c| c.name.as_str()).collect();
        let pool = chosen.iter().flat_map(|g| g.clusters.iter()).count();
        let limit = bound(max_clusters, pool);
        for c in feasible {
            if names.len() >= limit {
                break;
            }
            if chosen.iter().any(|g| key.value_of(c) == Some(g.value.as_str())) {
                names.insert(c.name.as_str());
            }
        }
        Ok(feasible.iter().filter(|c| names.contains(c.name.as_str())).cloned().collect())
    }
}

fn check_group_bounds(constraint: &SpreadConstraint, selected: &[ClusterDetailInfo]) -> Result<(), ScheduleError> {
    let Some(key) = SpreadKey::of(constraint) else {
        return Ok(());
    };
    let distinct: BTreeSet<&str> = selected.iter().filter_map(|c| key.value_of(c)).collect();
    let n = distinct.len();
    if (n as i64) < i64::from(constraint.min_groups) || (constraint.max_groups > 0 && n > constraint.max_groups as usize) {
        return Err(ScheduleError::GroupBoundViolated {
            key: key.to_string(),
            selected: n,
            min: constraint.min_groups,
            max: constraint.max_groups,
        });
    }
    Ok(())
}
