//! Core reconcile engine for Pallet packages.
//!
//! This crate ties the schema and repository layers into the `Engine`: it
//! evaluates environment constraints, resolves dependencies against the merged
//! repository index, drives the phased rollout with availability probes, and
//! commits the lock file once the pass completes. It also provides the rollout
//! state machine, phase handlers, cancellation, and an in-memory cluster for
//! tests and dry runs.

pub mod concurrency;
pub mod constraints;
pub mod engine;
pub mod handler;
pub mod lifecycle;
pub mod mock;
pub mod plan;
pub mod probe;
pub mod resolve;
pub mod rollout;

pub use concurrency::{install_signal_handler, CancelToken, LockFileGuard};
pub use constraints::{
    ConstraintEvaluator, Eligibility, InstanceRef, Scope, ScopeMember, ScopeMembership, Violation,
};
pub use engine::{
    Engine, ReconcileOptions, ReconcileReport, ReconcileRequest, ReconcileStage, DEFAULT_LOCK_FILE,
};
pub use handler::{
    ApplyError, ClusterClient, DefaultPhaseHandler, HandlerRegistry, PhaseHandler, PhaseStatus,
};
pub use lifecycle::{validate_transition, RolloutState};
pub use mock::{MockCluster, MockPhaseHandler};
pub use plan::{load_objects, parse_objects_str, PhasePlan, PlanError, PlannedPhase};
pub use probe::{evaluate_probe, ProbeReport};
pub use resolve::{resolve, Resolution, ResolutionError, Resolver};
pub use rollout::{MappedCondition, PhaseExecutor, PhaseOutcome, PhaseReport, RolloutReport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] pallet_schema::ManifestError),
    #[error("lock error: {0}")]
    Lock(#[from] pallet_schema::LockError),
    #[error("repository error: {0}")]
    Repository(#[from] pallet_repo::RepositoryError),
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),
    #[error("invalid rollout transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("no phase handler registered for class '{0}'")]
    UnknownPhaseClass(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
