//! Availability probe evaluation against live objects.
//!
//! Probes fail closed: a probe that selects no observed object fails.

use pallet_schema::{AvailabilityProbe, ObjectKey, PackageObject, ProbeCheck};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub selector: String,
    pub passed: bool,
    pub failures: Vec<String>,
}

/// Evaluate one probe. `observed` pairs each selected desired object with its
/// live counterpart, `None` when the object is not present in the cluster.
pub fn evaluate_probe(
    probe: &AvailabilityProbe,
    observed: &[(ObjectKey, Option<PackageObject>)],
) -> ProbeReport {
    let mut failures = Vec::new();

    if observed.is_empty() {
        failures.push("no object matches the selector".to_owned());
    }

    for (key, live) in observed {
        let Some(object) = live else {
            failures.push(format!("{key}: not found"));
            continue;
        };
        for check in &probe.checks {
            if let Err(reason) = evaluate_check(check, object) {
                failures.push(format!("{key}: {reason}"));
            }
        }
    }

    ProbeReport {
        selector: probe.selector.to_string(),
        passed: failures.is_empty(),
        failures,
    }
}

pub fn evaluate_check(check: &ProbeCheck, object: &PackageObject) -> Result<(), String> {
    match check {
        ProbeCheck::Condition {
            condition_type,
            status,
        } => check_condition(object, condition_type, status),
        ProbeCheck::FieldsEqual { field_a, field_b } => {
            let a = object
                .field(field_a)
                .ok_or_else(|| format!("field {field_a} is not set"))?;
            let b = object
                .field(field_b)
                .ok_or_else(|| format!("field {field_b} is not set"))?;
            if a == b {
                Ok(())
            } else {
                Err(format!("{field_a} ({a}) != {field_b} ({b})"))
            }
        }
    }
}

fn check_condition(object: &PackageObject, condition_type: &str, want: &str) -> Result<(), String> {
    let condition = object
        .condition(condition_type)
        .ok_or_else(|| format!("condition {condition_type} is not reported"))?;

    let got = condition
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or_default();
    if got != want {
        return Err(format!("condition {condition_type} is '{got}', want '{want}'"));
    }

    if let Some(generation) = object.metadata.generation {
        let observed = condition
            .get("observedGeneration")
            .and_then(serde_json::Value::as_i64);
        if observed != Some(generation) {
            return Err(format!(
                "condition {condition_type} is stale (observedGeneration {}, generation {generation})",
                observed.map_or_else(|| "unset".to_owned(), |g| g.to_string())
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pallet_schema::{GroupKind, ObjectSelector};
    use std::collections::BTreeMap;

    fn deployment(status: serde_json::Value, generation: Option<i64>) -> PackageObject {
        let mut obj: PackageObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "api", "namespace": "shop"},
            "spec": {"replicas": 2},
            "status": status
        }))
        .unwrap();
        obj.metadata.generation = generation;
        obj
    }

    fn probe(checks: Vec<ProbeCheck>) -> AvailabilityProbe {
        AvailabilityProbe {
            selector: ObjectSelector {
                kind: GroupKind {
                    group: "apps".to_owned(),
                    kind: "Deployment".to_owned(),
                },
                match_labels: BTreeMap::new(),
            },
            checks,
        }
    }

    fn available() -> ProbeCheck {
        ProbeCheck::Condition {
            condition_type: "Available".to_owned(),
            status: "True".to_owned(),
        }
    }

    #[test]
    fn condition_probe_passes() {
        let obj = deployment(
            serde_json::json!({"conditions": [{"type": "Available", "status": "True", "observedGeneration": 4}]}),
            Some(4),
        );
        assert!(evaluate_check(&available(), &obj).is_ok());
    }

    #[test]
    fn condition_probe_checks_generation() {
        let obj = deployment(
            serde_json::json!({"conditions": [{"type": "Available", "status": "True", "observedGeneration": 3}]}),
            Some(4),
        );
        let err = evaluate_check(&available(), &obj).unwrap_err();
        assert!(err.contains("stale"));
    }

    #[test]
    fn condition_probe_without_generation_ignores_observed() {
        let obj = deployment(
            serde_json::json!({"conditions": [{"type": "Available", "status": "True"}]}),
            None,
        );
        assert!(evaluate_check(&available(), &obj).is_ok());
    }

    #[test]
    fn condition_probe_fails_on_status() {
        let obj = deployment(
            serde_json::json!({"conditions": [{"type": "Available", "status": "False"}]}),
            None,
        );
        assert!(evaluate_check(&available(), &obj).is_err());
        let missing = deployment(serde_json::json!({}), None);
        assert!(evaluate_check(&available(), &missing).is_err());
    }

    #[test]
    fn fields_equal_probe() {
        let check = ProbeCheck::FieldsEqual {
            field_a: ".spec.replicas".to_owned(),
            field_b: ".status.updatedReplicas".to_owned(),
        };
        let ready = deployment(serde_json::json!({"updatedReplicas": 2}), None);
        assert!(evaluate_check(&check, &ready).is_ok());
        let rolling = deployment(serde_json::json!({"updatedReplicas": 1}), None);
        assert!(evaluate_check(&check, &rolling).is_err());
        let unset = deployment(serde_json::json!({}), None);
        assert!(evaluate_check(&check, &unset).is_err());
    }

    #[test]
    fn probe_fails_closed_without_observed_objects() {
        let report = evaluate_probe(&probe(vec![available()]), &[]);
        assert!(!report.passed);
        assert_eq!(report.selector, "Deployment.apps");
    }

    #[test]
    fn probe_fails_when_live_object_missing() {
        let obj = deployment(serde_json::json!({}), None);
        let report = evaluate_probe(&probe(vec![available()]), &[(obj.key(), None)]);
        assert!(!report.passed);
        assert!(report.failures[0].ends_with("not found"));
    }

    #[test]
    fn probe_collects_every_failing_check() {
        let obj = deployment(serde_json::json!({}), None);
        let checks = vec![
            available(),
            ProbeCheck::FieldsEqual {
                field_a: ".spec.replicas".to_owned(),
                field_b: ".status.replicas".to_owned(),
            },
        ];
        let report = evaluate_probe(&probe(checks), &[(obj.key(), Some(obj.clone()))]);
        assert_eq!(report.failures.len(), 2);
    }
}
