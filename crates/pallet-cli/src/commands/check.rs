use super::{
    instance_or_default, json_pretty, parse_instance, Context, EXIT_CONSTRAINT_VIOLATION,
    EXIT_SUCCESS,
};
use pallet_core::{Engine, HandlerRegistry, MockCluster};
use std::path::Path;

/// Evaluate the manifest's constraints for `instance`. `existing` lists
/// instances of the package already present in the cluster.
pub fn run(
    ctx: &Context,
    manifest: &Path,
    instance: Option<&str>,
    existing: &[String],
) -> Result<u8, String> {
    let cluster = MockCluster::new();
    let registry = HandlerRegistry::new();
    let engine = Engine::new(&cluster, &cluster, &registry);

    let package = engine.load_package(manifest).map_err(|e| e.to_string())?;
    let instance = instance_or_default(instance, &package)?;
    cluster.register_instance(package.name.clone(), instance.clone());
    for other in existing {
        cluster.register_active(package.name.clone(), parse_instance(other)?);
    }

    let eligibility = engine.check(&package, &ctx.environment, &instance);
    if ctx.json {
        let payload = serde_json::json!({
            "package": package.name,
            "instance": instance,
            "eligible": eligibility.is_eligible(),
            "violations": eligibility
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if eligibility.is_eligible() {
        println!("{} ({instance}) is eligible", package.name);
    } else {
        println!("{} ({instance}) is not eligible:", package.name);
        for violation in &eligibility.violations {
            println!("  {violation}");
        }
    }

    Ok(if eligibility.is_eligible() {
        EXIT_SUCCESS
    } else {
        EXIT_CONSTRAINT_VIOLATION
    })
}
