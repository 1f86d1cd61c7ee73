//! Kubernetes-style objects as they flow through phase planning and probing.
//!
//! Only the fields this engine reasons about are typed; everything else is
//! kept verbatim in `body` so objects round-trip untouched.

use crate::annotations::{CONDITION_MAP_ANNOTATION, EXTERNAL_OBJECT_ANNOTATION, PHASE_ANNOTATION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Identity of an object within the cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gk = if self.group.is_empty() {
            self.kind.clone()
        } else {
            format!("{}.{}", self.kind, self.group)
        };
        match &self.namespace {
            Some(ns) => write!(f, "{gk} {ns}/{}", self.name),
            None => write!(f, "{gk} {}", self.name),
        }
    }
}

impl PackageObject {
    /// API group, the part of `apiVersion` before `/`; empty for the core group.
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or("", |(group, _)| group)
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            group: self.group().to_owned(),
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    pub fn phase_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(PHASE_ANNOTATION)
            .map(String::as_str)
    }

    /// Objects annotated external are observed during their phase, never applied.
    pub fn is_external(&self) -> bool {
        self.metadata
            .annotations
            .get(EXTERNAL_OBJECT_ANNOTATION)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn condition_map(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(CONDITION_MAP_ANNOTATION)
            .map(String::as_str)
    }

    /// Resolve a dotted JSON path such as `.status.replicas` or `.spec.x`
    /// against the object.
    pub fn field(&self, path: &str) -> Option<serde_json::Value> {
        let mut segments = path.trim_start_matches('.').split('.');
        let first = segments.next()?;
        let mut current = match first {
            "metadata" => serde_json::to_value(&self.metadata).ok()?,
            "kind" => return Some(serde_json::Value::String(self.kind.clone())),
            "apiVersion" => return Some(serde_json::Value::String(self.api_version.clone())),
            other => self.body.get(other)?.clone(),
        };
        for segment in segments {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }

    /// Find a `.status.conditions[]` entry by type.
    pub fn condition(&self, condition_type: &str) -> Option<&serde_json::Value> {
        self.body
            .get("status")?
            .get("conditions")?
            .as_array()?
            .iter()
            .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(condition_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> PackageObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "api",
                "namespace": "shop",
                "generation": 3,
                "annotations": {
                    "package-operator.run/phase": "deploy",
                    "package-operator.run/external": "True"
                }
            },
            "spec": {"replicas": 2},
            "status": {
                "replicas": 2,
                "conditions": [{"type": "Available", "status": "True", "observedGeneration": 3}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn group_and_key() {
        let obj = deployment();
        assert_eq!(obj.group(), "apps");
        assert_eq!(obj.key().to_string(), "Deployment.apps shop/api");
    }

    #[test]
    fn core_group_is_empty() {
        let mut obj = deployment();
        obj.api_version = "v1".to_owned();
        assert_eq!(obj.group(), "");
    }

    #[test]
    fn annotations_are_read() {
        let obj = deployment();
        assert_eq!(obj.phase_annotation(), Some("deploy"));
        assert!(obj.is_external());
    }

    #[test]
    fn field_paths_resolve() {
        let obj = deployment();
        assert_eq!(obj.field(".spec.replicas"), Some(serde_json::json!(2)));
        assert_eq!(obj.field(".metadata.name"), Some(serde_json::json!("api")));
        assert_eq!(obj.field(".status.missing"), None);
    }

    #[test]
    fn condition_lookup() {
        let obj = deployment();
        let cond = obj.condition("Available").unwrap();
        assert_eq!(cond["status"], "True");
        assert!(obj.condition("Progressing").is_none());
    }
}
