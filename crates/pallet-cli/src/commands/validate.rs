use super::{json_pretty, load_package, read_objects, Context, EXIT_SUCCESS};
use pallet_core::PhasePlan;
use std::path::Path;

pub fn run(ctx: &Context, manifest: &Path, objects: Option<&Path>) -> Result<u8, String> {
    let package = load_package(manifest)?;
    let plan = match objects {
        Some(path) => Some(
            PhasePlan::assemble(&package.phases, read_objects(Some(path))?)
                .map_err(|e| format!("plan error: {e}"))?,
        ),
        None => None,
    };

    let object_count = plan
        .as_ref()
        .map(|p| p.phases.iter().map(|ph| ph.objects.len()).sum::<usize>());

    if ctx.json {
        let payload = serde_json::json!({
            "package": package.name,
            "valid": true,
            "phases": package.phases.iter().map(|p| p.name.to_string()).collect::<Vec<_>>(),
            "probes": package.probes.len(),
            "constraints": package.constraints.len(),
            "dependencies": package.dependencies.len(),
            "objects": object_count,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("manifest {} is valid", manifest.display());
        println!("package: {}", package.name);
        println!("phases: {}", package.phases.len());
        println!("dependencies: {}", package.dependencies.len());
        if let Some(count) = object_count {
            println!("objects: {count}");
        }
    }
    Ok(EXIT_SUCCESS)
}
