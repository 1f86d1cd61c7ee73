use super::{json_pretty, load_package, read_objects, Context, EXIT_SUCCESS};
use pallet_core::PhasePlan;
use std::path::Path;

pub fn run(ctx: &Context, manifest: &Path, objects: Option<&Path>) -> Result<u8, String> {
    let package = load_package(manifest)?;
    let plan = PhasePlan::assemble(&package.phases, read_objects(objects)?)
        .map_err(|e| format!("plan error: {e}"))?;

    if ctx.json {
        let phases: Vec<_> = plan
            .phases
            .iter()
            .enumerate()
            .map(|(i, planned)| {
                serde_json::json!({
                    "name": planned.phase.name,
                    "class": planned.phase.class,
                    "delegated": planned.phase.is_delegated(),
                    "objects": planned
                        .objects
                        .iter()
                        .map(|o| o.key().to_string())
                        .collect::<Vec<_>>(),
                    "probes": plan
                        .applicable_probes(i, &package.probes)
                        .iter()
                        .map(|p| p.selector.to_string())
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let payload = serde_json::json!({ "package": package.name, "phases": phases });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("rollout plan for {}:", package.name);
    for (i, planned) in plan.phases.iter().enumerate() {
        let delegated = if planned.phase.is_delegated() {
            format!(" [delegated: {}]", planned.phase.class)
        } else {
            String::new()
        };
        println!(
            "  {}. {} ({} objects){delegated}",
            i + 1,
            planned.phase.name,
            planned.objects.len()
        );
        for object in &planned.objects {
            println!("       {}", object.key());
        }
        if !planned.phase.is_delegated() {
            for probe in plan.applicable_probes(i, &package.probes) {
                println!("       probe: {}", probe.selector);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
