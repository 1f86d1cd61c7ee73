use crate::concurrency::{CancelToken, LockFileGuard};
use crate::constraints::{ConstraintEvaluator, Eligibility, InstanceRef, ScopeMembership};
use crate::handler::{ClusterClient, HandlerRegistry};
use crate::plan::PhasePlan;
use crate::resolve::{Resolution, ResolutionError, Resolver};
use crate::rollout::{PhaseExecutor, RolloutReport};
use crate::CoreError;
use pallet_repo::{ImageRepositorySource, RepositoryIndex, RepositoryLoader};
use pallet_schema::{parse_manifest_file, Environment, Package, PackageManifestLock, PackageObject};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_LOCK_FILE: &str = "manifest.lock.yaml";

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Take dependencies from the existing lock file instead of resolving.
    pub locked: bool,
    pub write_lock: bool,
    pub lock_file_name: String,
    /// Extra directories searched for repository files.
    pub search_paths: Vec<PathBuf>,
    pub rollout: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            locked: false,
            write_lock: true,
            lock_file_name: DEFAULT_LOCK_FILE.to_owned(),
            search_paths: Vec::new(),
            rollout: true,
        }
    }
}

/// Input of one reconciliation pass for one package instance.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub manifest_path: PathBuf,
    pub objects: Vec<PackageObject>,
    pub environment: Environment,
    pub instance: InstanceRef,
}

/// How far a pass got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStage {
    Ineligible,
    Unresolved,
    Resolved,
    RolledOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub package: String,
    pub instance: InstanceRef,
    pub stage: ReconcileStage,
    pub eligibility: Eligibility,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resolution_errors: Vec<ResolutionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<PackageManifestLock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_path: Option<PathBuf>,
    pub lock_written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutReport>,
    pub finished_at: String,
}

impl ReconcileReport {
    fn new(package: &Package, instance: InstanceRef, eligibility: Eligibility) -> Self {
        Self {
            package: package.name.clone(),
            instance,
            stage: ReconcileStage::Ineligible,
            eligibility,
            resolution_errors: Vec::new(),
            lock: None,
            lock_path: None,
            lock_written: false,
            rollout: None,
            finished_at: String::new(),
        }
    }

    fn finish(mut self, stage: ReconcileStage) -> Self {
        self.stage = stage;
        self.finished_at = chrono::Utc::now().to_rfc3339();
        self
    }
}

/// Runs reconciliation passes: constraints, dependency resolution, phased
/// rollout, then the lock-file commit.
pub struct Engine<'a> {
    cluster: &'a dyn ClusterClient,
    membership: &'a dyn ScopeMembership,
    registry: &'a HandlerRegistry,
    images: Option<&'a dyn ImageRepositorySource>,
    options: ReconcileOptions,
}

impl<'a> Engine<'a> {
    pub fn new(
        cluster: &'a dyn ClusterClient,
        membership: &'a dyn ScopeMembership,
        registry: &'a HandlerRegistry,
    ) -> Self {
        Self {
            cluster,
            membership,
            registry,
            images: None,
            options: ReconcileOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_image_source(mut self, source: &'a dyn ImageRepositorySource) -> Self {
        self.images = Some(source);
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn load_package(&self, manifest_path: &Path) -> Result<Package, CoreError> {
        debug!("loading manifest {}", manifest_path.display());
        let manifest = parse_manifest_file(manifest_path)?;
        Ok(manifest.validate()?)
    }

    pub fn check(
        &self,
        package: &Package,
        environment: &Environment,
        instance: &InstanceRef,
    ) -> Eligibility {
        ConstraintEvaluator::new(environment, self.membership).evaluate(
            &package.constraints,
            &package.name,
            instance,
        )
    }

    /// Load and merge the package's repositories, in declaration order.
    pub fn load_index(
        &self,
        package: &Package,
        manifest_dir: &Path,
    ) -> Result<RepositoryIndex, CoreError> {
        let mut loader = RepositoryLoader::new(manifest_dir);
        for path in &self.options.search_paths {
            loader = loader.with_search_path(path);
        }
        if let Some(images) = self.images {
            loader = loader.with_image_source(images);
        }
        let repositories = loader.load_all(&package.repositories)?;
        let index = RepositoryIndex::merge(&repositories)?;
        debug!(
            "repository index: {} packages, {} versions",
            index.packages().count(),
            index.version_count()
        );
        Ok(index)
    }

    /// Resolve the package's dependencies. In locked mode the existing lock
    /// file is verified and used as-is.
    pub fn resolve(
        &self,
        package: &Package,
        manifest_path: &Path,
        environment: &Environment,
    ) -> Result<Resolution, CoreError> {
        if self.options.locked {
            let lock = self.read_verified_lock(package, manifest_path)?;
            return Ok(Resolution {
                lockset: lock.lockset(),
                errors: Vec::new(),
            });
        }

        let index = self.load_index(package, manifest_dir(manifest_path))?;
        Ok(Resolver::new(&index)
            .with_environment(environment)
            .resolve(&package.dependencies))
    }

    fn read_verified_lock(
        &self,
        package: &Package,
        manifest_path: &Path,
    ) -> Result<PackageManifestLock, CoreError> {
        let path = self.lock_path(manifest_path);
        let lock = PackageManifestLock::read_from_file(&path)?;
        lock.verify_integrity()?;
        lock.verify_manifest_intent(package)?;
        debug!("using locked dependencies from {}", path.display());
        Ok(lock)
    }

    pub fn lock_path(&self, manifest_path: &Path) -> PathBuf {
        manifest_dir(manifest_path).join(&self.options.lock_file_name)
    }

    /// Write `lock` to `path` under an exclusive file lock. Returns false when
    /// the file already holds identical content.
    pub fn commit_lock(&self, lock: &PackageManifestLock, path: &Path) -> Result<bool, CoreError> {
        let mut guard_name = path.as_os_str().to_owned();
        guard_name.push(".guard");
        let _guard = LockFileGuard::acquire(Path::new(&guard_name))?;

        if path.exists() {
            match PackageManifestLock::read_from_file(path) {
                Ok(existing) if existing == *lock => {
                    debug!("lock file {} is up to date", path.display());
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) => warn!("replacing unreadable lock file {}: {e}", path.display()),
            }
        }

        lock.write_to_file(path)?;
        info!("wrote lock file {}", path.display());
        Ok(true)
    }

    pub fn plan(
        &self,
        package: &Package,
        objects: Vec<PackageObject>,
    ) -> Result<PhasePlan, CoreError> {
        Ok(PhasePlan::assemble(&package.phases, objects)?)
    }

    /// Run one pass for `request`. Nothing is written unless the pass runs to
    /// completion without being cancelled.
    pub fn reconcile(
        &self,
        request: ReconcileRequest,
        cancel: &CancelToken,
    ) -> Result<ReconcileReport, CoreError> {
        cancel.check()?;
        let package = self.load_package(&request.manifest_path)?;
        info!("reconciling {} for {}", package.name, request.instance);

        let eligibility = self.check(&package, &request.environment, &request.instance);
        let mut report = ReconcileReport::new(&package, request.instance, eligibility);
        if !report.eligibility.is_eligible() {
            for violation in &report.eligibility.violations {
                warn!("{}: {violation}", package.name);
            }
            return Ok(report.finish(ReconcileStage::Ineligible));
        }

        cancel.check()?;
        let resolution = self.resolve(&package, &request.manifest_path, &request.environment)?;
        if !resolution.is_complete() {
            report.resolution_errors = resolution.errors;
            return Ok(report.finish(ReconcileStage::Unresolved));
        }
        let lock = PackageManifestLock::for_package(&package, &resolution.lockset);
        let lock_path = self.lock_path(&request.manifest_path);

        let mut stage = ReconcileStage::Resolved;
        if self.options.rollout {
            cancel.check()?;
            let plan = self.plan(&package, request.objects)?;
            let executor = PhaseExecutor::new(&plan, self.registry, self.cluster, &package.probes)?;
            report.rollout = Some(executor.run_pass(cancel)?);
            stage = ReconcileStage::RolledOut;
        }

        cancel.check()?;
        if self.options.write_lock && !self.options.locked {
            report.lock_written = self.commit_lock(&lock, &lock_path)?;
        }
        report.lock = Some(lock);
        report.lock_path = Some(lock_path);
        Ok(report.finish(stage))
    }
}

fn manifest_dir(manifest_path: &Path) -> &Path {
    manifest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}
