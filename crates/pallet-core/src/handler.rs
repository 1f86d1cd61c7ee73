use crate::plan::PlannedPhase;
use crate::CoreError;
use pallet_schema::{ObjectKey, PackageObject, DEFAULT_PHASE_CLASS};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// A failed apply. Transient failures are retried on the next pass;
/// permanent ones fail the phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{object}: {message}")]
pub struct ApplyError {
    pub object: String,
    pub message: String,
    pub permanent: bool,
}

impl ApplyError {
    pub fn transient(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            message: message.into(),
            permanent: true,
        }
    }
}

/// Access to the target cluster.
pub trait ClusterClient {
    /// Create or update `object` to match the desired state.
    fn apply(&self, object: &PackageObject) -> Result<(), ApplyError>;

    /// Current live state of the object, `None` if it does not exist.
    fn observe(&self, key: &ObjectKey) -> Option<PackageObject>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason")]
pub enum PhaseStatus {
    Available,
    Pending(String),
    Failed(String),
}

/// Applies one phase and reports its status.
///
/// Phases with a non-default class are delegated: the handler registered for
/// that class alone decides when the phase is available.
pub trait PhaseHandler: Send + Sync {
    fn apply(&self, phase: &PlannedPhase, cluster: &dyn ClusterClient) -> Result<(), ApplyError>;

    fn observe_status(&self, phase: &PlannedPhase, cluster: &dyn ClusterClient) -> PhaseStatus;
}

/// Applies objects directly. External objects are only observed.
#[derive(Debug, Default)]
pub struct DefaultPhaseHandler;

impl PhaseHandler for DefaultPhaseHandler {
    fn apply(&self, phase: &PlannedPhase, cluster: &dyn ClusterClient) -> Result<(), ApplyError> {
        for object in &phase.objects {
            if object.is_external() {
                debug!("skipping apply of external object {}", object.key());
                continue;
            }
            cluster.apply(object)?;
        }
        Ok(())
    }

    fn observe_status(&self, phase: &PlannedPhase, cluster: &dyn ClusterClient) -> PhaseStatus {
        let missing: Vec<String> = phase
            .objects
            .iter()
            .map(PackageObject::key)
            .filter(|key| cluster.observe(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if missing.is_empty() {
            PhaseStatus::Available
        } else {
            PhaseStatus::Pending(format!("waiting for {}", missing.join(", ")))
        }
    }
}

/// Phase handlers keyed by phase class.
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Box<dyn PhaseHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut handlers: BTreeMap<String, Box<dyn PhaseHandler>> = BTreeMap::new();
        handlers.insert(DEFAULT_PHASE_CLASS.to_owned(), Box::new(DefaultPhaseHandler));
        Self { handlers }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `class`, replacing any previous one.
    pub fn register(&mut self, class: impl Into<String>, handler: Box<dyn PhaseHandler>) {
        self.handlers.insert(class.into(), handler);
    }

    #[must_use]
    pub fn with_handler(
        mut self,
        class: impl Into<String>,
        handler: Box<dyn PhaseHandler>,
    ) -> Self {
        self.register(class, handler);
        self
    }

    pub fn get(&self, class: &str) -> Option<&dyn PhaseHandler> {
        self.handlers.get(class).map(|h| &**h)
    }

    pub fn select(&self, class: &str) -> Result<&dyn PhaseHandler, CoreError> {
        self.get(class)
            .ok_or_else(|| CoreError::UnknownPhaseClass(class.to_owned()))
    }

    pub fn classes(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
