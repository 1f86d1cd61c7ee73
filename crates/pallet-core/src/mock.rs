use crate::constraints::{InstanceRef, Scope, ScopeMember, ScopeMembership};
use crate::handler::{ApplyError, ClusterClient, PhaseHandler, PhaseStatus};
use crate::plan::PlannedPhase;
use pallet_schema::{ObjectKey, PackageObject};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory cluster used by tests and dry-run rollouts.
///
/// A `ready` cluster marks every applied object as available straight away;
/// otherwise objects are stored as applied and their status is left to
/// [`MockCluster::set_status`].
#[derive(Default)]
pub struct MockCluster {
    objects: Mutex<BTreeMap<ObjectKey, PackageObject>>,
    failures: Mutex<BTreeMap<ObjectKey, ApplyError>>,
    /// Package name to its instances and whether each one is active.
    instances: Mutex<BTreeMap<String, BTreeMap<InstanceRef, bool>>>,
    applied: Mutex<Vec<ObjectKey>>,
    auto_ready: bool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready() -> Self {
        Self {
            auto_ready: true,
            ..Self::default()
        }
    }

    /// Replace the live `.status` of an object. Returns false when the object
    /// does not exist.
    pub fn set_status(&self, key: &ObjectKey, status: Value) -> bool {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        match objects.get_mut(key) {
            Some(object) => {
                object.body.insert("status".to_owned(), status);
                true
            }
            None => false,
        }
    }

    /// Make every later apply of `key` fail with `error`.
    pub fn fail_apply(&self, key: ObjectKey, error: ApplyError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, error);
    }

    pub fn clear_failure(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Store `object` as live state without going through apply.
    pub fn insert(&self, object: PackageObject) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object.key(), object);
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<PackageObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<PackageObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Keys of every successful apply, in call order.
    pub fn applied(&self) -> Vec<ObjectKey> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a pending install request for `instance`.
    pub fn register_instance(&self, package: impl Into<String>, instance: InstanceRef) {
        self.set_instance(package.into(), instance, false);
    }

    /// Record `instance` as already installed.
    pub fn register_active(&self, package: impl Into<String>, instance: InstanceRef) {
        self.set_instance(package.into(), instance, true);
    }

    fn set_instance(&self, package: String, instance: InstanceRef, active: bool) {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(package)
            .or_default()
            .insert(instance, active);
    }

    pub fn remove_instance(&self, package: &str, instance: &InstanceRef) {
        if let Some(set) = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(package)
        {
            set.remove(instance);
        }
    }

    fn make_ready(object: &mut PackageObject) {
        let generation = object.metadata.generation.unwrap_or(1);
        object.metadata.generation = Some(generation);

        let mut status = json!({
            "conditions": [{
                "type": "Available",
                "status": "True",
                "observedGeneration": generation,
            }]
        });
        if let Some(replicas) = object.field(".spec.replicas") {
            for field in ["replicas", "updatedReplicas", "readyReplicas", "availableReplicas"] {
                status[field] = replicas.clone();
            }
        }
        object.body.insert("status".to_owned(), status);
    }
}

impl ClusterClient for MockCluster {
    fn apply(&self, object: &PackageObject) -> Result<(), ApplyError> {
        let key = object.key();
        if let Some(error) = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Err(error.clone());
        }

        let mut live = object.clone();
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        if self.auto_ready {
            Self::make_ready(&mut live);
        } else if let Some(status) = objects.get(&key).and_then(|o| o.body.get("status")) {
            live.body.insert("status".to_owned(), status.clone());
        }
        objects.insert(key.clone(), live);
        drop(objects);

        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key);
        Ok(())
    }

    fn observe(&self, key: &ObjectKey) -> Option<PackageObject> {
        self.get(key)
    }
}

impl ScopeMembership for MockCluster {
    fn instances(&self, package: &str, scope: &Scope) -> Vec<ScopeMember> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(package)
            .map(|members| {
                members
                    .iter()
                    .filter(|(instance, _)| instance.scope() == *scope)
                    .map(|(instance, &active)| ScopeMember {
                        instance: instance.clone(),
                        active,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct HandlerState {
    status: PhaseStatus,
    failure: Option<ApplyError>,
    applied: Vec<String>,
}

/// Stand-in for an external phase-class handler. Clones share state, so a
/// test can keep one clone and register the other.
#[derive(Debug, Clone)]
pub struct MockPhaseHandler {
    state: Arc<Mutex<HandlerState>>,
}

impl MockPhaseHandler {
    pub fn new(status: PhaseStatus) -> Self {
        Self {
            state: Arc::new(Mutex::new(HandlerState {
                status,
                failure: None,
                applied: Vec::new(),
            })),
        }
    }

    pub fn set_status(&self, status: PhaseStatus) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status;
    }

    pub fn fail_with(&self, error: Option<ApplyError>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failure = error;
    }

    /// Names of the phases handed to this handler, in call order.
    pub fn applied_phases(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .applied
            .clone()
    }
}

impl PhaseHandler for MockPhaseHandler {
    fn apply(&self, phase: &PlannedPhase, _cluster: &dyn ClusterClient) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }
        state.applied.push(phase.phase.name.to_string());
        Ok(())
    }

    fn observe_status(&self, _phase: &PlannedPhase, _cluster: &dyn ClusterClient) -> PhaseStatus {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .clone()
    }
}
