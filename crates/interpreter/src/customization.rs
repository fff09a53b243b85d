//! `ResourceInterpreterCustomization` documents: one per resource type, one script slot per hook.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub const CUSTOMIZATION_API_VERSION: &str = "config.flotilla.io/v1alpha1";
pub const CUSTOMIZATION_KIND: &str = "ResourceInterpreterCustomization";

/// Resource type a customization applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationTarget {
    pub api_version: String,
    pub kind: String,
}

impl CustomizationTarget {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { api_version: api_version.into(), kind: kind.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSlot {
    #[serde(default)]
    pub lua_script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<ScriptSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_resource: Option<ScriptSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_revision: Option<ScriptSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reflection: Option<ScriptSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_aggregation: Option<ScriptSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_interpretation: Option<ScriptSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_interpretation: Option<ScriptSlot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationSpec {
    pub target: CustomizationTarget,
    #[serde(default)]
    pub customizations: CustomizationRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationDocument {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CustomizationSpec,
}

impl CustomizationDocument {
    pub fn new(name: impl Into<String>, target: CustomizationTarget) -> Self {
        Self {
            api_version: CUSTOMIZATION_API_VERSION.to_string(),
            kind: CUSTOMIZATION_KIND.to_string(),
            metadata: ObjectMeta { name: Some(name.into()), ..Default::default() },
            spec: CustomizationSpec { target, customizations: CustomizationRules::default() },
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn target(&self) -> &CustomizationTarget {
        &self.spec.target
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Parse a multi-document YAML stream.
    pub fn all_from_yaml(text: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        let mut docs = Vec::new();
        for de in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(de)?;
            if value.is_null() {
                continue;
            }
            docs.push(serde_yaml::from_value(value)?);
        }
        Ok(docs)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
apiVersion: config.flotilla.io/v1alpha1
kind: ResourceInterpreterCustomization
metadata:
  name: workload
spec:
  target:
    apiVersion: apps.example.io/v1
    kind: Workload
  customizations:
    healthInterpretation:
      luaScript: |
        function InterpretHealth(observedObj)
          return observedObj.status.ready
        end
"#;

    #[test]
    fn parses_single_document() {
        let doc = CustomizationDocument::from_yaml(DOC).unwrap();
        assert_eq!(doc.name(), "workload");
        assert_eq!(doc.target(), &CustomizationTarget::new("apps.example.io/v1", "Workload"));
        assert!(doc.spec.customizations.health_interpretation.is_some());
        assert!(doc.spec.customizations.retention.is_none());
    }

    #[test]
    fn parses_stream_and_skips_empty_documents() {
        let stream = format!("---\n{DOC}\n---\n{}", DOC.replace("name: workload", "name: other"));
        let docs = CustomizationDocument::all_from_yaml(&stream).unwrap();
        assert_eq!(docs.iter().map(|d| d.name()).collect::<Vec<_>>(), ["workload", "other"]);
    }

    #[test]
    fn empty_slots_are_not_written() {
        let doc = CustomizationDocument::new("x", CustomizationTarget::new("v1", "ConfigMap"));
        let out = doc.to_yaml().unwrap();
        assert!(!out.contains("retention"));
        assert!(out.contains("kind: ConfigMap"));
    }
}
