//! Object identity and metadata helpers over `kube::core::DynamicObject`.

use std::collections::BTreeMap;
use std::fmt;

use kube::core::{DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};

use crate::{CONFLICT_RESOLUTION_ANNOTATION, MANAGED_BY_LABEL, MANAGED_BY_LABEL_VALUE};

const GENERATION_PREFIX: &str = "gen:";
const RESOURCE_VERSION_PREFIX: &str = "rv:";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetaError {
    #[error("object {0} has no apiVersion/kind")]
    MissingTypeMeta(String),
    #[error("object {0} has no metadata.name")]
    MissingName(String),
    #[error("invalid apiVersion {0:?}")]
    InvalidApiVersion(String),
}

/// Parse the group/version/kind out of an object's type meta.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, MetaError> {
    let display = obj.metadata.name.clone().unwrap_or_default();
    let types = obj.types.as_ref().ok_or_else(|| MetaError::MissingTypeMeta(display.clone()))?;
    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(MetaError::MissingTypeMeta(display));
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) if !g.is_empty() && !v.is_empty() && !v.contains('/') => (g.to_string(), v.to_string()),
        Some(_) => return Err(MetaError::InvalidApiVersion(types.api_version.clone())),
        None => (String::new(), types.api_version.clone()),
    };
    Ok(GroupVersionKind::gvk(&group, &version, &types.kind))
}

/// Identity of an object independent of the cluster it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn from_object(obj: &DynamicObject) -> Result<Self, MetaError> {
        let gvk = gvk_of(obj)?;
        let name = obj
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MetaError::MissingName(format!("{}/{}", gvk.api_version(), gvk.kind)))?;
        Ok(Self {
            group: gvk.group,
            version: gvk.version,
            kind: gvk.kind,
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name,
        })
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// Namespace as an option; cluster-scoped objects carry an empty namespace.
    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() { None } else { Some(&self.namespace) }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Kind={}/{}/{}", self.group, self.version, self.kind, self.namespace, self.name)
    }
}

/// Object identity qualified with the member cluster that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FederatedKey {
    pub cluster: String,
    pub key: ObjectKey,
}

impl FederatedKey {
    pub fn new(cluster: impl Into<String>, key: ObjectKey) -> Self {
        Self { cluster: cluster.into(), key }
    }

    pub fn for_object(cluster: impl Into<String>, obj: &DynamicObject) -> Result<Self, MetaError> {
        Ok(Self::new(cluster, ObjectKey::from_object(obj)?))
    }
}

impl fmt::Display for FederatedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster={}, {}", self.cluster, self.key)
    }
}

fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata.labels.as_ref().and_then(|m| m.get(key)).map(String::as_str)
}

pub fn annotation<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata.annotations.as_ref().and_then(|m| m.get(key)).map(String::as_str)
}

/// Whether the object carries Flotilla's managed-by marker.
pub fn is_managed(obj: &DynamicObject) -> bool {
    label(obj, MANAGED_BY_LABEL) == Some(MANAGED_BY_LABEL_VALUE)
}

pub fn set_managed(obj: &mut DynamicObject) {
    obj.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_LABEL_VALUE.to_string());
}

/// Conflict-resolution strategy requested by the desired object, if any.
pub fn conflict_resolution(obj: &DynamicObject) -> Option<&str> {
    annotation(obj, CONFLICT_RESOLUTION_ANNOTATION)
}

fn retain_map(desired: &mut Option<BTreeMap<String, String>>, observed: &Option<BTreeMap<String, String>>) {
    let Some(observed) = observed.as_ref().filter(|m| !m.is_empty()) else { return };
    let target = desired.get_or_insert_with(BTreeMap::new);
    for (k, v) in observed {
        target.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

/// Keep labels set in the member cluster; keys present on the desired object win.
pub fn retain_labels(desired: &mut DynamicObject, observed: &DynamicObject) {
    retain_map(&mut desired.metadata.labels, &observed.metadata.labels);
}

/// Keep annotations set in the member cluster; keys present on the desired object win.
pub fn retain_annotations(desired: &mut DynamicObject, observed: &DynamicObject) {
    retain_map(&mut desired.metadata.annotations, &observed.metadata.annotations);
}

/// Version token used to detect real changes of a cluster object.
///
/// The generation is preferred since it only moves on spec changes; objects without one fall
/// back to the resource version.
pub fn object_version(obj: &DynamicObject) -> String {
    match obj.metadata.generation {
        Some(g) if g != 0 => format!("{GENERATION_PREFIX}{g}"),
        _ => format!("{RESOURCE_VERSION_PREFIX}{}", obj.metadata.resource_version.as_deref().unwrap_or("")),
    }
}

fn maps_equivalent(a: &Option<BTreeMap<String, String>>, b: &Option<BTreeMap<String, String>>) -> bool {
    let a_len = a.as_ref().map_or(0, BTreeMap::len);
    let b_len = b.as_ref().map_or(0, BTreeMap::len);
    if a_len == 0 && b_len == 0 {
        return true;
    }
    a == b
}

/// Compare the user-provided, cluster-independent parts of two objects' metadata.
fn object_meta_equivalent(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.metadata.name == b.metadata.name
        && a.metadata.namespace.as_deref().unwrap_or("") == b.metadata.namespace.as_deref().unwrap_or("")
        && maps_equivalent(&a.metadata.labels, &b.metadata.labels)
        && maps_equivalent(&a.metadata.annotations, &b.metadata.annotations)
}

/// Decide whether `cluster_obj` has to be rewritten given the version recorded at the last write.
pub fn object_needs_update(desired: &DynamicObject, cluster_obj: &DynamicObject, recorded_version: &str) -> bool {
    let current = object_version(cluster_obj);
    if recorded_version != current {
        return true;
    }
    // Generation does not move on metadata-only changes.
    current.starts_with(GENERATION_PREFIX) && !object_meta_equivalent(desired, cluster_obj)
}
