use pallet_schema::annotations::parse_condition_map;
use pallet_schema::{AvailabilityProbe, ObjectSelector, PackageObject, Phase};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan has no phases")]
    NoPhases,
    #[error("object {0} has no phase annotation")]
    MissingPhase(String),
    #[error("object {object} references unknown phase '{phase}'")]
    UnknownPhase { object: String, phase: String },
    #[error("object {object} has an invalid condition map: {reason}")]
    InvalidConditionMap { object: String, reason: String },
    #[error("object {object}: {reason}")]
    InvalidObject { object: String, reason: String },
    #[error("failed to read objects from '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse objects: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A phase together with the desired objects assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPhase {
    pub phase: Phase,
    pub objects: Vec<PackageObject>,
}

/// Desired objects grouped by phase, in manifest phase order.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    pub phases: Vec<PlannedPhase>,
}

impl PhasePlan {
    /// Group `objects` by their phase annotation. Objects keep their input
    /// order within a phase.
    pub fn assemble(phases: &[Phase], objects: Vec<PackageObject>) -> Result<Self, PlanError> {
        let mut planned: Vec<PlannedPhase> = phases
            .iter()
            .map(|phase| PlannedPhase {
                phase: phase.clone(),
                objects: Vec::new(),
            })
            .collect();

        for object in objects {
            let key = object.key().to_string();
            if object.metadata.name.is_empty() || object.kind.is_empty() {
                return Err(PlanError::InvalidObject {
                    object: key,
                    reason: "kind and metadata.name must be set".to_owned(),
                });
            }
            if let Some(map) = object.condition_map() {
                parse_condition_map(map).map_err(|reason| PlanError::InvalidConditionMap {
                    object: key.clone(),
                    reason,
                })?;
            }
            let Some(phase) = object.phase_annotation() else {
                return Err(PlanError::MissingPhase(key));
            };
            let Some(slot) = planned.iter_mut().find(|p| p.phase.name == phase) else {
                return Err(PlanError::UnknownPhase {
                    object: key,
                    phase: phase.to_owned(),
                });
            };
            slot.objects.push(object);
        }

        Ok(Self { phases: planned })
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Desired objects in phases `0..=upto` matched by `selector`.
    pub fn desired_matching(&self, upto: usize, selector: &ObjectSelector) -> Vec<&PackageObject> {
        self.phases
            .iter()
            .take(upto + 1)
            .flat_map(|p| p.objects.iter())
            .filter(|o| selector.matches(o))
            .collect()
    }

    /// Probes gating phase `upto`: every probe that selects no desired object
    /// in a later phase. A probe that selects nothing at all gates every phase
    /// and keeps failing.
    pub fn applicable_probes<'p>(
        &self,
        upto: usize,
        probes: &'p [AvailabilityProbe],
    ) -> Vec<&'p AvailabilityProbe> {
        probes
            .iter()
            .filter(|p| !self.selects_after(upto, &p.selector))
            .collect()
    }

    fn selects_after(&self, upto: usize, selector: &ObjectSelector) -> bool {
        self.phases
            .iter()
            .skip(upto + 1)
            .flat_map(|p| p.objects.iter())
            .any(|o| selector.matches(o))
    }
}

/// Parse a multi-document YAML stream of objects. Empty documents are skipped.
pub fn parse_objects_str(input: &str) -> Result<Vec<PackageObject>, PlanError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value)?);
    }
    Ok(objects)
}

/// Load objects from a YAML file, or from every `.yaml`/`.yml` file of a
/// directory in file-name order.
pub fn load_objects(path: &Path) -> Result<Vec<PackageObject>, PlanError> {
    let io_err = |source: std::io::Error| PlanError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    if path.is_dir() {
        for entry in fs::read_dir(path).map_err(io_err)? {
            let file = entry.map_err(io_err)?.path();
            let is_yaml = file
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if is_yaml {
                files.push(file);
            }
        }
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    let mut objects = Vec::new();
    for file in files {
        let content = fs::read_to_string(&file).map_err(|source| PlanError::Io {
            path: file.clone(),
            source,
        })?;
        objects.extend(parse_objects_str(&content)?);
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pallet_schema::{GroupKind, ProbeCheck};
    use std::collections::BTreeMap;

    const OBJECTS: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: carts.shop.io
  annotations: {package-operator.run/phase: crds}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
  namespace: shop
  annotations: {package-operator.run/phase: deploy}
spec: {replicas: 2}
---
"#;

    fn phases() -> Vec<Phase> {
        vec![Phase::new("crds"), Phase::new("deploy")]
    }

    #[test]
    fn groups_objects_in_phase_order() {
        let plan = PhasePlan::assemble(&phases(), parse_objects_str(OBJECTS).unwrap()).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.phases[0].objects[0].kind, "CustomResourceDefinition");
        assert_eq!(plan.phases[1].objects[0].metadata.name, "api");
    }

    #[test]
    fn missing_annotation_is_an_error() {
        let objects =
            parse_objects_str("apiVersion: v1\nkind: ConfigMap\nmetadata: {name: c}\n").unwrap();
        assert!(matches!(
            PhasePlan::assemble(&phases(), objects),
            Err(PlanError::MissingPhase(_))
        ));
    }

    #[test]
    fn unknown_phase_is_an_error() {
        let objects = parse_objects_str(
            "apiVersion: v1\nkind: ConfigMap\nmetadata: {name: c, annotations: {package-operator.run/phase: late}}\n",
        )
        .unwrap();
        assert!(matches!(
            PhasePlan::assemble(&phases(), objects),
            Err(PlanError::UnknownPhase { ref phase, .. }) if phase == "late"
        ));
    }

    #[test]
    fn bad_condition_map_is_an_error() {
        let objects = parse_objects_str(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c\n  annotations:\n    package-operator.run/phase: crds\n    package-operator.run/condition-map: Available\n",
        )
        .unwrap();
        assert!(matches!(
            PhasePlan::assemble(&phases(), objects),
            Err(PlanError::InvalidConditionMap { .. })
        ));
    }

    #[test]
    fn probe_applicability_follows_phases() {
        let plan = PhasePlan::assemble(&phases(), parse_objects_str(OBJECTS).unwrap()).unwrap();
        let probes = vec![AvailabilityProbe {
            selector: ObjectSelector {
                kind: GroupKind {
                    group: "apps".to_owned(),
                    kind: "Deployment".to_owned(),
                },
                match_labels: BTreeMap::new(),
            },
            checks: vec![ProbeCheck::Condition {
                condition_type: "Available".to_owned(),
                status: "True".to_owned(),
            }],
        }];
        assert!(plan.applicable_probes(0, &probes).is_empty());
        assert_eq!(plan.applicable_probes(1, &probes).len(), 1);
        assert_eq!(plan.desired_matching(1, &probes[0].selector).len(), 1);
    }

    #[test]
    fn probe_selecting_nothing_gates_every_phase() {
        let plan = PhasePlan::assemble(&phases(), parse_objects_str(OBJECTS).unwrap()).unwrap();
        let probes = vec![AvailabilityProbe {
            selector: ObjectSelector {
                kind: GroupKind {
                    group: "apps".to_owned(),
                    kind: "StatefulSet".to_owned(),
                },
                match_labels: BTreeMap::new(),
            },
            checks: Vec::new(),
        }];
        assert_eq!(plan.applicable_probes(0, &probes).len(), 1);
        assert_eq!(plan.applicable_probes(1, &probes).len(), 1);
        assert!(plan.desired_matching(1, &probes[0].selector).is_empty());
    }

    #[test]
    fn loads_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata: {name: second}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("a.yml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata: {name: first}\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let objects = load_objects(dir.path()).unwrap();
        let names: Vec<&str> = objects.iter().map(|o| o.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
