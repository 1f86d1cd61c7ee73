use super::{
    colorize_state, instance_or_default, json_pretty, load_package, parse_instance, read_objects,
    Context, EXIT_CONSTRAINT_VIOLATION, EXIT_FAILURE, EXIT_RESOLUTION_ERROR, EXIT_SUCCESS,
};
use pallet_core::{
    Engine, HandlerRegistry, MockCluster, MockPhaseHandler, PhaseOutcome, PhaseStatus,
    ReconcileReport, ReconcileRequest, ReconcileStage,
};
use std::path::PathBuf;
use tracing::info;

pub struct RolloutArgs {
    pub manifest: PathBuf,
    pub objects: Option<PathBuf>,
    pub instance: Option<String>,
    pub existing: Vec<String>,
    /// Phase classes served by a handler that reports them available.
    pub delegate: Vec<String>,
    pub passes: u32,
    pub locked: bool,
    pub write_lock: bool,
}

/// Run reconciliation passes against an in-memory cluster in which every
/// applied object becomes available.
pub fn run(ctx: &Context, args: &RolloutArgs) -> Result<u8, String> {
    let package = load_package(&args.manifest)?;
    let instance = instance_or_default(args.instance.as_deref(), &package)?;
    let objects = read_objects(args.objects.as_deref())?;

    let cluster = MockCluster::ready();
    cluster.register_instance(package.name.clone(), instance.clone());
    for other in &args.existing {
        cluster.register_active(package.name.clone(), parse_instance(other)?);
    }

    let mut registry = HandlerRegistry::new();
    for class in &args.delegate {
        registry.register(
            class.clone(),
            Box::new(MockPhaseHandler::new(PhaseStatus::Available)),
        );
    }

    let images = ctx.config.image_source();
    let mut options = ctx.options();
    options.locked = args.locked;
    options.write_lock = args.write_lock;
    let engine = Engine::new(&cluster, &cluster, &registry)
        .with_options(options)
        .with_image_source(&images);

    let mut reports = Vec::new();
    for pass in 1..=args.passes.max(1) {
        let request = ReconcileRequest {
            manifest_path: args.manifest.clone(),
            objects: objects.clone(),
            environment: ctx.environment.clone(),
            instance: instance.clone(),
        };
        let report = engine
            .reconcile(request, &ctx.cancel)
            .map_err(|e| e.to_string())?;
        info!("pass {pass}: {:?}", report.stage);
        let done = report.stage != ReconcileStage::RolledOut
            || report.rollout.as_ref().is_some_and(|r| r.is_available() || r.is_failed());
        reports.push(report);
        if done {
            break;
        }
    }

    let Some(last) = reports.last() else {
        return Ok(EXIT_FAILURE);
    };
    if ctx.json {
        println!("{}", json_pretty(&reports)?);
    } else {
        for (i, report) in reports.iter().enumerate() {
            print_report(i + 1, report);
        }
    }
    Ok(exit_code(last))
}

fn exit_code(report: &ReconcileReport) -> u8 {
    match report.stage {
        ReconcileStage::Ineligible => EXIT_CONSTRAINT_VIOLATION,
        ReconcileStage::Unresolved => EXIT_RESOLUTION_ERROR,
        ReconcileStage::Resolved => EXIT_SUCCESS,
        ReconcileStage::RolledOut => match &report.rollout {
            Some(rollout) if rollout.is_available() => EXIT_SUCCESS,
            _ => EXIT_FAILURE,
        },
    }
}

fn print_report(pass: usize, report: &ReconcileReport) {
    println!("pass {pass}: {} ({})", report.package, report.instance);
    match report.stage {
        ReconcileStage::Ineligible => {
            println!("  not eligible:");
            for violation in &report.eligibility.violations {
                println!("    {violation}");
            }
            return;
        }
        ReconcileStage::Unresolved => {
            println!("  unresolved dependencies:");
            for error in &report.resolution_errors {
                println!("    {error}");
            }
            return;
        }
        ReconcileStage::Resolved | ReconcileStage::RolledOut => {}
    }

    if let Some(rollout) = &report.rollout {
        println!("  state: {}", colorize_state(rollout.state));
        for phase in &rollout.phases {
            let outcome = match &phase.outcome {
                PhaseOutcome::NotReached => "not reached".to_owned(),
                PhaseOutcome::Available => "available".to_owned(),
                PhaseOutcome::Stalled(reasons) => format!("stalled: {}", reasons.join("; ")),
                PhaseOutcome::Failed(reason) => format!("failed: {reason}"),
            };
            println!("  - {} ({}): {outcome}", phase.name, phase.class);
        }
        for condition in &rollout.conditions {
            println!(
                "  condition {} <- {} on {}: {}",
                condition.target, condition.source, condition.object, condition.status
            );
        }
    }
    if let Some(path) = &report.lock_path {
        if report.lock_written {
            println!("  wrote {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pallet_core::{Eligibility, InstanceRef};

    fn report(stage: ReconcileStage) -> ReconcileReport {
        ReconcileReport {
            package: "shop".to_owned(),
            instance: InstanceRef::cluster("shop"),
            stage,
            eligibility: Eligibility::default(),
            resolution_errors: Vec::new(),
            lock: None,
            lock_path: None,
            lock_written: false,
            rollout: None,
            finished_at: String::new(),
        }
    }

    #[test]
    fn exit_code_follows_stage() {
        assert_eq!(
            exit_code(&report(ReconcileStage::Ineligible)),
            EXIT_CONSTRAINT_VIOLATION
        );
        assert_eq!(
            exit_code(&report(ReconcileStage::Unresolved)),
            EXIT_RESOLUTION_ERROR
        );
        assert_eq!(exit_code(&report(ReconcileStage::Resolved)), EXIT_SUCCESS);
        assert_eq!(exit_code(&report(ReconcileStage::RolledOut)), EXIT_FAILURE);
    }
}
