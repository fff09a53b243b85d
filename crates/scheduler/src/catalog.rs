//! Sources of the cluster snapshot a scheduling pass runs over.

use std::path::Path;

use crate::cluster::ClusterDetailInfo;

/// Read-only view over the known member clusters. Implementations own their own concurrency;
/// the scheduler only ever asks for a point-in-time copy.
pub trait ClusterCatalog: Send + Sync {
    fn snapshot(&self) -> Vec<ClusterDetailInfo>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parse cluster list: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("duplicate cluster name {0}")]
    DuplicateName(String),
}

/// A fixed cluster list, typically loaded from a YAML or JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    clusters: Vec<ClusterDetailInfo>,
}

impl StaticCatalog {
    pub fn new(clusters: Vec<ClusterDetailInfo>) -> Self {
        Self { clusters }
    }

    /// Parse a list of clusters. JSON is accepted too since it is valid YAML.
    pub fn from_yaml(text: &str) -> Result<Self, CatalogError> {
        let clusters: Vec<ClusterDetailInfo> = serde_yaml::from_str(text)?;
        let mut seen = std::collections::BTreeSet::new();
        for c in &clusters {
            if !seen.insert(c.name.as_str()) {
                return Err(CatalogError::DuplicateName(c.name.clone()));
            }
        }
        Ok(Self { clusters })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| CatalogError::Io { path: path.display().to_string(), source })?;
        Self::from_yaml(&text)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl ClusterCatalog for StaticCatalog {
    fn snapshot(&self) -> Vec<ClusterDetailInfo> {
        self.clusters.clone()
    }
}
