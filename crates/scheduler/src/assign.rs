//! Replica distribution over the selected clusters.

use std::collections::BTreeMap;

use crate::cluster::ClusterDetailInfo;

/// Even split; the first `desired % n` clusters get one extra.
fn split_evenly<'a>(clusters: impl ExactSizeIterator<Item = &'a ClusterDetailInfo>, desired: i64, out: &mut BTreeMap<String, i32>) {
    let n = clusters.len() as i64;
    if n == 0 {
        return;
    }
    let (base, rem) = (desired / n, desired % n);
    for (i, c) in clusters.enumerate() {
        let extra = i64::from((i as i64) < rem);
        *out.entry(c.name.clone()).or_insert(0) += (base + extra) as i32;
    }
}

/// Distribute `desired` replicas over `clusters`, which must already be in scheduling order.
///
/// * all clusters bounded: proportional to available replicas, flooring, then handing the
///   remainder one by one to clusters with non-zero weight in order;
/// * all bounded with no capacity anywhere: even split;
/// * some unbounded: bounded clusters take at most their even share (capped by what they have
///   free) and the unbounded ones absorb the rest.
///
/// The result always sums to `desired` and contains every input cluster.
pub fn distribute_replicas(clusters: &[ClusterDetailInfo], desired: i32) -> BTreeMap<String, i32> {
    let mut out: BTreeMap<String, i32> = clusters.iter().map(|c| (c.name.clone(), 0)).collect();
    if clusters.is_empty() || desired <= 0 {
        return out;
    }
    let desired = i64::from(desired);
    let (bounded, unbounded): (Vec<&ClusterDetailInfo>, Vec<&ClusterDetailInfo>) =
        clusters.iter().partition(|c| !c.is_unbounded());

    if unbounded.is_empty() {
        let total: i128 = bounded.iter().map(|c| i128::from(c.available_replicas)).sum();
        if total == 0 {
            split_evenly(clusters.iter(), desired, &mut out);
            return out;
        }
        let mut assigned = 0i64;
        for c in &bounded {
            let share = (i128::from(desired) * i128::from(c.available_replicas) / total) as i64;
            assigned += share;
            out.insert(c.name.clone(), share as i32);
        }
        let weighted: Vec<&&ClusterDetailInfo> = bounded.iter().filter(|c| c.available_replicas > 0).collect();
        for c in weighted.iter().cycle().take((desired - assigned) as usize) {
            if let Some(v) = out.get_mut(&c.name) {
                *v += 1;
            }
        }
        return out;
    }

    let fair = desired / clusters.len() as i64;
    let mut left = desired;
    for c in &bounded {
        let take = c.available_replicas.min(fair);
        left -= take;
        out.insert(c.name.clone(), take as i32);
    }
    split_evenly(unbounded.into_iter(), left, &mut out);
    out
}
