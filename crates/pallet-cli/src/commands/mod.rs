pub mod check;
pub mod completions;
pub mod man_pages;
pub mod plan;
pub mod resolve;
pub mod rollout;
pub mod validate;

use crate::config::PalletConfig;
use indicatif::{ProgressBar, ProgressStyle};
use pallet_core::{load_objects, CancelToken, InstanceRef, ReconcileOptions, RolloutState};
use pallet_schema::{parse_manifest_file, Environment, Package, PackageObject};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_RESOLUTION_ERROR: u8 = 3;
pub const EXIT_CONSTRAINT_VIOLATION: u8 = 4;

/// State shared by every command of one invocation.
pub struct Context {
    pub config: PalletConfig,
    pub environment: Environment,
    pub cancel: CancelToken,
    pub json: bool,
}

impl Context {
    pub fn options(&self) -> ReconcileOptions {
        let mut options = ReconcileOptions {
            search_paths: self.config.repositories.search_paths.clone(),
            ..ReconcileOptions::default()
        };
        if let Some(name) = &self.config.lock_file {
            options.lock_file_name.clone_from(name);
        }
        options
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn load_package(manifest: &Path) -> Result<Package, String> {
    parse_manifest_file(manifest)
        .and_then(|m| m.validate())
        .map_err(|e| format!("manifest error: {e}"))
}

pub fn read_objects(path: Option<&Path>) -> Result<Vec<PackageObject>, String> {
    match path {
        Some(path) => load_objects(path).map_err(|e| format!("plan error: {e}")),
        None => Ok(Vec::new()),
    }
}

/// Parse `namespace/name`, or a bare `name` for a cluster-scoped instance.
pub fn parse_instance(input: &str) -> Result<InstanceRef, String> {
    let invalid = || format!("invalid instance '{input}', expected NAME or NAMESPACE/NAME");
    match input.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(InstanceRef::namespaced(ns, name))
        }
        Some(_) => Err(invalid()),
        None if input.is_empty() => Err(invalid()),
        None => Ok(InstanceRef::cluster(input)),
    }
}

/// The instance named on the command line, defaulting to a cluster-scoped
/// instance named after the package.
pub fn instance_or_default(instance: Option<&str>, package: &Package) -> Result<InstanceRef, String> {
    instance.map_or_else(|| Ok(InstanceRef::cluster(&package.name)), parse_instance)
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        spinner_style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(spinner_style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(spinner_style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: RolloutState) -> String {
    use console::Style;
    let text = state.to_string();
    match state {
        RolloutState::AllPhasesAvailable | RolloutState::Available(_) => {
            Style::new().green().apply_to(text).to_string()
        }
        RolloutState::Applying(_) | RolloutState::Probing(_) => {
            Style::new().yellow().apply_to(text).to_string()
        }
        RolloutState::Failed(_) => Style::new().red().bold().apply_to(text).to_string(),
        RolloutState::Pending => Style::new().dim().apply_to(text).to_string(),
    }
}
