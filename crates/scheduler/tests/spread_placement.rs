#![forbid(unsafe_code)]

use flotilla_core::GroupScoreReduction;
use flotilla_scheduler::{ClusterDetailInfo, PlacementPolicy, ScheduleError, Scheduler, SpreadConstraint, SpreadField};

fn region_policy() -> PlacementPolicy {
    PlacementPolicy {
        spread_constraints: vec![
            SpreadConstraint::by_field(SpreadField::Region, 2, 0),
            SpreadConstraint::by_field(SpreadField::Cluster, 2, 2),
        ],
        ..Default::default()
    }
}

fn fleet() -> Vec<ClusterDetailInfo> {
    vec![
        ClusterDetailInfo::new("A", 10, 3).with_region("us"),
        ClusterDetailInfo::new("B", 5, 8).with_region("us"),
        ClusterDetailInfo::new("C", 8, 1).with_region("eu"),
        ClusterDetailInfo::new("D", 3, 8).with_region("eu"),
    ]
}

#[test]
fn one_cluster_per_region_weighted_by_availability() {
    let d = Scheduler::default().schedule(&region_policy(), &fleet(), 4).unwrap();
    let picked: Vec<_> = d.targets().collect();
    assert_eq!(picked, [("A", 3), ("C", 1)]);
    assert_eq!(d.total(), 4);
}

#[test]
fn input_order_does_not_matter() {
    let s = Scheduler::new(GroupScoreReduction::Sum);
    let first = s.schedule(&region_policy(), &fleet(), 4).unwrap();
    let mut reversed = fleet();
    reversed.reverse();
    for _ in 0..3 {
        assert_eq!(s.schedule(&region_policy(), &reversed, 4).unwrap(), first);
    }
    reversed.rotate_left(1);
    assert_eq!(s.schedule(&region_policy(), &reversed, 4).unwrap(), first);
}

#[test]
fn region_spread_needs_cluster_constraint() {
    let policy = PlacementPolicy {
        spread_constraints: vec![SpreadConstraint::by_field(SpreadField::Region, 2, 0)],
        ..Default::default()
    };
    let err = Scheduler::default().schedule(&policy, &fleet(), 4).unwrap_err();
    assert!(matches!(err, ScheduleError::Validation(ref errs) if errs.len() == 1), "{err}");
}

#[test]
fn max_groups_below_min_groups_is_rejected_before_scheduling() {
    let policy = PlacementPolicy {
        spread_constraints: vec![
            SpreadConstraint::by_field(SpreadField::Region, 3, 1),
            SpreadConstraint::by_field(SpreadField::Cluster, 1, 0),
        ],
        ..Default::default()
    };
    // No clusters at all: validation must fire before feasibility is considered.
    let err = Scheduler::default().schedule(&policy, &[], 1).unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("spec.placement.spreadConstraints[0]"));
}

#[test]
fn too_few_regions() {
    let policy = PlacementPolicy {
        spread_constraints: vec![
            SpreadConstraint::by_field(SpreadField::Region, 3, 0),
            SpreadConstraint::by_field(SpreadField::Cluster, 1, 0),
        ],
        ..Default::default()
    };
    let err = Scheduler::default().schedule(&policy, &fleet(), 4).unwrap_err();
    assert_eq!(err, ScheduleError::MinGroupsUnmet { key: "field region".into(), required: 3, available: 2 });
}

#[test]
fn replica_sum_is_exact() {
    let policy = PlacementPolicy {
        spread_constraints: vec![
            SpreadConstraint::by_field(SpreadField::Region, 1, 0),
            SpreadConstraint::by_field(SpreadField::Cluster, 1, 0),
        ],
        ..Default::default()
    };
    let mut mixed = fleet();
    mixed.push(ClusterDetailInfo::new("E", 4, -1).with_region("ap"));
    mixed.push(ClusterDetailInfo::new("F", 4, 0).with_region("ap"));
    for desired in [0, 1, 3, 7, 10, 33, 1000] {
        let d = Scheduler::default().schedule(&policy, &mixed, desired).unwrap();
        assert_eq!(d.clusters.len(), 6);
        assert_eq!(d.total(), desired);
        assert!(d.clusters.values().all(|r| *r >= 0));
    }
}
