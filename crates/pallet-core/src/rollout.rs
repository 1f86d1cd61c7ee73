//! Phase-by-phase rollout with availability gating.
//!
//! Every pass starts again from `Pending` and walks the phases in order, so
//! probes of earlier phases are re-checked each time. The pass stops at the
//! first phase that is not available; nothing is rolled back.

use crate::concurrency::CancelToken;
use crate::handler::{ClusterClient, HandlerRegistry, PhaseStatus};
use crate::lifecycle::{validate_transition, RolloutState};
use crate::plan::{PhasePlan, PlanError, PlannedPhase};
use crate::probe::{evaluate_probe, ProbeReport};
use crate::CoreError;
use pallet_schema::annotations::parse_condition_map;
use pallet_schema::{AvailabilityProbe, ObjectKey, PackageObject};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reasons")]
pub enum PhaseOutcome {
    NotReached,
    Available,
    /// Waiting on probes, handler status, or a transient apply error.
    Stalled(Vec<String>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub name: String,
    pub class: String,
    pub delegated: bool,
    pub outcome: PhaseOutcome,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PhaseStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub probes: Vec<ProbeReport>,
}

impl PhaseReport {
    fn not_reached(planned: &PlannedPhase) -> Self {
        Self {
            name: planned.phase.name.to_string(),
            class: planned.phase.class.clone(),
            delegated: planned.phase.is_delegated(),
            outcome: PhaseOutcome::NotReached,
            applied: false,
            status: None,
            probes: Vec::new(),
        }
    }
}

/// An object condition surfaced under a package-level name through the
/// condition-map annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedCondition {
    pub object: String,
    pub source: String,
    pub target: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolloutReport {
    pub state: RolloutState,
    pub transitions: Vec<RolloutState>,
    pub phases: Vec<PhaseReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MappedCondition>,
}

impl RolloutReport {
    pub fn is_available(&self) -> bool {
        self.state == RolloutState::AllPhasesAvailable
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, RolloutState::Failed(_))
    }
}

/// Records the validated state path of one pass.
struct StateTrail {
    state: RolloutState,
    transitions: Vec<RolloutState>,
}

impl StateTrail {
    fn new() -> Self {
        Self {
            state: RolloutState::Pending,
            transitions: vec![RolloutState::Pending],
        }
    }

    fn advance(&mut self, to: RolloutState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!("rollout {} -> {to}", self.state);
        self.state = to;
        self.transitions.push(to);
        Ok(())
    }
}

pub struct PhaseExecutor<'a> {
    plan: &'a PhasePlan,
    registry: &'a HandlerRegistry,
    cluster: &'a dyn ClusterClient,
    probes: &'a [AvailabilityProbe],
}

impl<'a> PhaseExecutor<'a> {
    /// Fails when the plan is empty or a phase class has no registered handler.
    pub fn new(
        plan: &'a PhasePlan,
        registry: &'a HandlerRegistry,
        cluster: &'a dyn ClusterClient,
        probes: &'a [AvailabilityProbe],
    ) -> Result<Self, CoreError> {
        if plan.is_empty() {
            return Err(PlanError::NoPhases.into());
        }
        for planned in &plan.phases {
            registry.select(&planned.phase.class)?;
        }
        Ok(Self {
            plan,
            registry,
            cluster,
            probes,
        })
    }

    /// Run one reconciliation pass over all phases.
    pub fn run_pass(&self, cancel: &CancelToken) -> Result<RolloutReport, CoreError> {
        let mut trail = StateTrail::new();
        let mut phases: Vec<PhaseReport> =
            self.plan.phases.iter().map(PhaseReport::not_reached).collect();

        for (index, planned) in self.plan.phases.iter().enumerate() {
            cancel.check()?;
            trail.advance(RolloutState::Applying(index))?;
            let report = &mut phases[index];
            if !self.step(index, planned, report, &mut trail)? {
                break;
            }
        }

        if let RolloutState::Available(last) = trail.state {
            if last + 1 == self.plan.len() {
                trail.advance(RolloutState::AllPhasesAvailable)?;
                info!("all {} phases available", self.plan.len());
            }
        }

        Ok(RolloutReport {
            state: trail.state,
            transitions: trail.transitions,
            conditions: self.mapped_conditions(&phases),
            phases,
        })
    }

    /// Apply and probe one phase. Returns whether the pass may continue.
    fn step(
        &self,
        index: usize,
        planned: &PlannedPhase,
        report: &mut PhaseReport,
        trail: &mut StateTrail,
    ) -> Result<bool, CoreError> {
        let handler = self.registry.select(&planned.phase.class)?;
        let name = &planned.phase.name;

        if let Err(e) = handler.apply(planned, self.cluster) {
            if e.permanent {
                warn!("phase {name}: permanent apply failure: {e}");
                report.outcome = PhaseOutcome::Failed(e.to_string());
                trail.advance(RolloutState::Failed(index))?;
            } else {
                warn!("phase {name}: apply will be retried: {e}");
                report.outcome = PhaseOutcome::Stalled(vec![e.to_string()]);
            }
            return Ok(false);
        }
        report.applied = true;
        trail.advance(RolloutState::Probing(index))?;

        let status = handler.observe_status(planned, self.cluster);
        report.status = Some(status.clone());
        let mut waiting = Vec::new();
        match status {
            PhaseStatus::Available => {}
            PhaseStatus::Pending(reason) => waiting.push(reason),
            PhaseStatus::Failed(reason) => {
                warn!("phase {name} reported failure: {reason}");
                waiting.push(reason);
            }
        }

        if planned.phase.is_delegated() {
            debug!("phase {name} delegated to class '{}'", planned.phase.class);
        } else {
            for probe in self.plan.applicable_probes(index, self.probes) {
                let observed: Vec<(ObjectKey, Option<PackageObject>)> = self
                    .plan
                    .desired_matching(index, &probe.selector)
                    .into_iter()
                    .map(|object| {
                        let key = object.key();
                        let live = self.cluster.observe(&key);
                        (key, live)
                    })
                    .collect();
                let result = evaluate_probe(probe, &observed);
                waiting.extend(result.failures.iter().cloned());
                report.probes.push(result);
            }
        }

        if !waiting.is_empty() {
            debug!("phase {name} not available: {}", waiting.join("; "));
            report.outcome = PhaseOutcome::Stalled(waiting);
            return Ok(false);
        }

        report.outcome = PhaseOutcome::Available;
        trail.advance(RolloutState::Available(index))?;
        info!("phase {name} available");
        Ok(true)
    }

    fn mapped_conditions(&self, phases: &[PhaseReport]) -> Vec<MappedCondition> {
        let mut conditions = Vec::new();
        let reached = self
            .plan
            .phases
            .iter()
            .zip(phases)
            .filter(|(_, report)| report.applied);

        for (planned, _) in reached {
            for object in &planned.objects {
                let mappings = match object.condition_map().map(parse_condition_map) {
                    Some(Ok(mappings)) => mappings,
                    _ => continue,
                };
                let key = object.key();
                let Some(live) = self.cluster.observe(&key) else {
                    continue;
                };
                for mapping in mappings {
                    let status = live
                        .condition(&mapping.source)
                        .and_then(|c| c.get("status"))
                        .and_then(|s| s.as_str());
                    if let Some(status) = status {
                        conditions.push(MappedCondition {
                            object: key.to_string(),
                            source: mapping.source,
                            target: mapping.target,
                            status: status.to_owned(),
                        });
                    }
                }
            }
        }
        conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ApplyError, PhaseHandler};
    use crate::mock::{MockCluster, MockPhaseHandler};
    use crate::plan::parse_objects_str;
    use pallet_schema::{GroupKind, ObjectSelector, Phase, ProbeCheck};
    use std::collections::BTreeMap;

    const OBJECTS: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: shop
  annotations: {package-operator.run/phase: config}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
  namespace: shop
  annotations:
    package-operator.run/phase: deploy
    package-operator.run/condition-map: "Available => shop.io/ApiAvailable"
spec: {replicas: 2}
"#;

    fn plan() -> PhasePlan {
        PhasePlan::assemble(
            &[Phase::new("config"), Phase::new("deploy")],
            parse_objects_str(OBJECTS).unwrap(),
        )
        .unwrap()
    }

    fn probe(group: &str, kind: &str, check: ProbeCheck) -> AvailabilityProbe {
        AvailabilityProbe {
            selector: ObjectSelector {
                kind: GroupKind {
                    group: group.to_owned(),
                    kind: kind.to_owned(),
                },
                match_labels: BTreeMap::new(),
            },
            checks: vec![check],
        }
    }

    fn deployment_available() -> AvailabilityProbe {
        probe(
            "apps",
            "Deployment",
            ProbeCheck::Condition {
                condition_type: "Available".to_owned(),
                status: "True".to_owned(),
            },
        )
    }

    #[test]
    fn ready_cluster_reaches_all_phases_available() {
        let plan = plan();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::ready();
        let probes = [deployment_available()];
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &probes).unwrap();

        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert!(report.is_available());
        assert_eq!(
            report.transitions,
            vec![
                RolloutState::Pending,
                RolloutState::Applying(0),
                RolloutState::Probing(0),
                RolloutState::Available(0),
                RolloutState::Applying(1),
                RolloutState::Probing(1),
                RolloutState::Available(1),
                RolloutState::AllPhasesAvailable,
            ]
        );
        assert_eq!(report.phases[1].probes.len(), 1);
        assert_eq!(
            report.conditions,
            vec![MappedCondition {
                object: "Deployment.apps shop/api".to_owned(),
                source: "Available".to_owned(),
                target: "shop.io/ApiAvailable".to_owned(),
                status: "True".to_owned(),
            }]
        );
    }

    #[test]
    fn failing_probe_holds_phase_in_probing() {
        let plan = plan();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::ready();
        let never = probe(
            "",
            "ConfigMap",
            ProbeCheck::FieldsEqual {
                field_a: ".data.ready".to_owned(),
                field_b: ".data.missing".to_owned(),
            },
        );
        let probes = [never];
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &probes).unwrap();

        for _ in 0..20 {
            let report = executor.run_pass(&CancelToken::new()).unwrap();
            assert_eq!(report.state, RolloutState::Probing(0));
            assert_eq!(report.phases[1].outcome, PhaseOutcome::NotReached);
        }
        assert!(cluster
            .applied()
            .iter()
            .all(|key| key.kind == "ConfigMap"));
    }

    #[test]
    fn probe_selecting_no_object_never_passes() {
        let plan = PhasePlan::assemble(
            &[Phase::new("config")],
            parse_objects_str(OBJECTS)
                .unwrap()
                .into_iter()
                .filter(|o| o.kind == "ConfigMap")
                .collect(),
        )
        .unwrap();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::ready();
        let probes = [probe(
            "apps",
            "StatefulSet",
            ProbeCheck::Condition {
                condition_type: "Available".to_owned(),
                status: "True".to_owned(),
            },
        )];
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &probes).unwrap();

        for _ in 0..5 {
            let report = executor.run_pass(&CancelToken::new()).unwrap();
            assert_eq!(report.state, RolloutState::Probing(0));
            assert_eq!(report.phases[0].probes.len(), 1);
            assert!(!report.phases[0].probes[0].passed);
            assert_eq!(
                report.phases[0].probes[0].failures,
                vec!["no object matches the selector".to_owned()]
            );
        }
    }

    #[test]
    fn regression_in_earlier_phase_halts_progress() {
        let plan = plan();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::new();
        let settings = plan.phases[0].objects[0].key();
        let probes = [probe(
            "",
            "ConfigMap",
            ProbeCheck::Condition {
                condition_type: "Ready".to_owned(),
                status: "True".to_owned(),
            },
        )];
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &probes).unwrap();

        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert_eq!(report.state, RolloutState::Probing(0));

        cluster.set_status(
            &settings,
            serde_json::json!({"conditions": [{"type": "Ready", "status": "True"}]}),
        );
        assert!(executor.run_pass(&CancelToken::new()).unwrap().is_available());

        cluster.set_status(
            &settings,
            serde_json::json!({"conditions": [{"type": "Ready", "status": "False"}]}),
        );
        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert_eq!(report.state, RolloutState::Probing(0));
        assert_eq!(report.phases[1].outcome, PhaseOutcome::NotReached);
    }

    #[test]
    fn transient_apply_error_stalls_in_applying() {
        let plan = plan();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::ready();
        let key = plan.phases[1].objects[0].key();
        cluster.fail_apply(key.clone(), ApplyError::transient("api", "conflict"));
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &[]).unwrap();

        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert_eq!(report.state, RolloutState::Applying(1));
        assert!(matches!(report.phases[1].outcome, PhaseOutcome::Stalled(_)));

        cluster.clear_failure(&key);
        assert!(executor.run_pass(&CancelToken::new()).unwrap().is_available());
    }

    #[test]
    fn permanent_apply_error_fails() {
        let plan = plan();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::ready();
        cluster.fail_apply(
            plan.phases[0].objects[0].key(),
            ApplyError::permanent("settings", "forbidden"),
        );
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &[]).unwrap();
        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert_eq!(report.state, RolloutState::Failed(0));
        assert!(report.is_failed());
    }

    #[test]
    fn delegated_phase_uses_handler_status() {
        let plan = PhasePlan::assemble(
            &[
                Phase::new("config"),
                Phase::new("deploy").with_class("hosted-cluster"),
            ],
            parse_objects_str(OBJECTS).unwrap(),
        )
        .unwrap();
        let handler = MockPhaseHandler::new(PhaseStatus::Pending("provisioning".to_owned()));
        let registry =
            HandlerRegistry::new().with_handler("hosted-cluster", Box::new(handler.clone()));
        let cluster = MockCluster::ready();
        // Would fail if delegated phases were probed: the deployment is never applied.
        let probes = [deployment_available()];
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &probes).unwrap();

        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert_eq!(report.state, RolloutState::Probing(1));
        assert!(report.phases[1].delegated);
        assert_eq!(handler.applied_phases(), vec!["deploy"]);

        handler.set_status(PhaseStatus::Available);
        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert!(report.is_available());

        handler.set_status(PhaseStatus::Failed("quota exceeded".to_owned()));
        let report = executor.run_pass(&CancelToken::new()).unwrap();
        assert_eq!(report.state, RolloutState::Probing(1));
        assert_eq!(
            report.phases[1].outcome,
            PhaseOutcome::Stalled(vec!["quota exceeded".to_owned()])
        );

        handler.set_status(PhaseStatus::Available);
        assert!(executor.run_pass(&CancelToken::new()).unwrap().is_available());
    }

    #[test]
    fn unknown_class_is_rejected_at_construction() {
        let plan = PhasePlan::assemble(&[Phase::new("x").with_class("nope")], Vec::new()).unwrap();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::ready();
        assert!(matches!(
            PhaseExecutor::new(&plan, &registry, &cluster, &[]),
            Err(CoreError::UnknownPhaseClass(_))
        ));
        let empty = PhasePlan::assemble(&[], Vec::new()).unwrap();
        assert!(matches!(
            PhaseExecutor::new(&empty, &registry, &cluster, &[]),
            Err(CoreError::Plan(PlanError::NoPhases))
        ));
    }

    #[test]
    fn cancelled_pass_returns_error() {
        let plan = plan();
        let registry = HandlerRegistry::new();
        let cluster = MockCluster::ready();
        let executor = PhaseExecutor::new(&plan, &registry, &cluster, &[]).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(executor.run_pass(&token), Err(CoreError::Cancelled)));
        assert!(cluster.applied().is_empty());
    }

    #[test]
    fn default_handler_waits_for_unapplied_objects() {
        let registry = HandlerRegistry::new();
        let handler: &dyn PhaseHandler = registry.select("default").unwrap();
        let cluster = MockCluster::new();
        let plan = plan();
        let planned = &plan.phases[0];
        assert!(matches!(
            handler.observe_status(planned, &cluster),
            PhaseStatus::Pending(_)
        ));
    }
}
