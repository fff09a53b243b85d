//! Last written version of every object, per member cluster.

use std::sync::{PoisonError, RwLock};

use metrics::gauge;
use rustc_hash::FxHashMap;

use flotilla_core::ObjectKey;

/// `cluster -> object -> version`, in memory only. Lost on restart and re-derived by the
/// next write to each object.
#[derive(Debug, Default)]
pub struct VersionLedger {
    records: RwLock<FxHashMap<String, FxHashMap<ObjectKey, String>>>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, cluster: &str, key: ObjectKey, version: String) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.entry(cluster.to_string()).or_default().insert(key, version);
        gauge!("objectwatcher_ledger_entries", records.values().map(FxHashMap::len).sum::<usize>() as f64);
    }

    pub fn get(&self, cluster: &str, key: &ObjectKey) -> Option<String> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(cluster).and_then(|m| m.get(key)).cloned()
    }

    pub fn remove(&self, cluster: &str, key: &ObjectKey) -> Option<String> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let removed = records.get_mut(cluster).and_then(|m| m.remove(key));
        if records.get(cluster).is_some_and(FxHashMap::is_empty) {
            records.remove(cluster);
        }
        removed
    }

    pub fn len(&self) -> usize {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
