use super::{
    json_pretty, spin_fail, spin_ok, spinner, Context, EXIT_RESOLUTION_ERROR, EXIT_SUCCESS,
};
use pallet_core::{Engine, HandlerRegistry, MockCluster};
use pallet_schema::PackageManifestLock;
use std::path::Path;

pub fn run(ctx: &Context, manifest: &Path, locked: bool, write: bool) -> Result<u8, String> {
    let cluster = MockCluster::new();
    let registry = HandlerRegistry::new();
    let images = ctx.config.image_source();
    let mut options = ctx.options();
    options.locked = locked;
    let engine = Engine::new(&cluster, &cluster, &registry)
        .with_options(options)
        .with_image_source(&images);

    let package = engine.load_package(manifest).map_err(|e| e.to_string())?;
    let pb = (!ctx.json).then(|| spinner("resolving dependencies..."));
    let resolution = match engine.resolve(&package, manifest, &ctx.environment) {
        Ok(r) => r,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "resolution failed");
            }
            return Err(e.to_string());
        }
    };

    if !resolution.is_complete() {
        if let Some(ref pb) = pb {
            spin_fail(pb, "unresolved dependencies");
        }
        if ctx.json {
            let payload = serde_json::json!({
                "package": package.name,
                "resolved": false,
                "errors": resolution.errors,
            });
            println!("{}", json_pretty(&payload)?);
        } else {
            for error in &resolution.errors {
                eprintln!("  {error}");
            }
        }
        return Ok(EXIT_RESOLUTION_ERROR);
    }
    if let Some(ref pb) = pb {
        spin_ok(pb, "dependencies resolved");
    }

    let lock = PackageManifestLock::for_package(&package, &resolution.lockset);
    let lock_path = engine.lock_path(manifest);
    let written = if write && !locked {
        engine
            .commit_lock(&lock, &lock_path)
            .map_err(|e| e.to_string())?
    } else {
        false
    };

    if ctx.json {
        let payload = serde_json::json!({
            "package": package.name,
            "resolved": true,
            "dependencies": lock.spec.dependencies,
            "checksum": lock.checksum,
            "lock_path": lock_path,
            "lock_written": written,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for dep in &lock.spec.dependencies {
            println!("{} = {} {}@{}", dep.name, dep.version, dep.image, dep.digest);
        }
        if written {
            println!("wrote {}", lock_path.display());
        } else if write && !locked {
            println!("{} is up to date", lock_path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
