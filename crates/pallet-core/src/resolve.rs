use crate::constraints::evaluate_platform;
use pallet_repo::{RepositoryIndex, VersionedEntry};
use pallet_schema::{Dependency, DependencyName, Environment, Fqdn, LockedDependency, Lockset};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Why one dependency could not be resolved. Resolution failures are retried
/// on the next pass.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ResolutionError {
    #[error("dependency '{dependency}': package {package} is not published in any repository")]
    UnknownPackage {
        dependency: DependencyName,
        package: Fqdn,
    },
    #[error("dependency '{dependency}': no version of {package} satisfies '{range}' (available: {available})")]
    NoMatchingVersion {
        dependency: DependencyName,
        package: Fqdn,
        range: String,
        available: String,
    },
    #[error("dependency '{dependency}': versions of {package} matching '{range}' are not eligible in this environment")]
    NoEligibleVersion {
        dependency: DependencyName,
        package: Fqdn,
        range: String,
    },
}

impl ResolutionError {
    pub fn dependency(&self) -> &DependencyName {
        match self {
            ResolutionError::UnknownPackage { dependency, .. }
            | ResolutionError::NoMatchingVersion { dependency, .. }
            | ResolutionError::NoEligibleVersion { dependency, .. } => dependency,
        }
    }
}

/// Outcome of one resolution: every dependency ends up either in the lockset
/// or in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub lockset: Lockset,
    pub errors: Vec<ResolutionError>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Pins each dependency to the highest published version satisfying its range.
pub struct Resolver<'a> {
    index: &'a RepositoryIndex,
    environment: Option<&'a Environment>,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a RepositoryIndex) -> Self {
        Self {
            index,
            environment: None,
        }
    }

    /// Skip published versions whose own constraints fail in `environment`.
    #[must_use]
    pub fn with_environment(mut self, environment: &'a Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn resolve(&self, dependencies: &[Dependency]) -> Resolution {
        let mut resolution = Resolution::default();
        let mut ordered: Vec<&Dependency> = dependencies.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        for dep in ordered {
            match self.resolve_one(dep) {
                Ok(locked) => {
                    debug!(
                        "resolved {} -> {} {} ({})",
                        dep.name, dep.package, locked.version, locked.digest
                    );
                    resolution.lockset.insert(locked);
                }
                Err(e) => {
                    warn!("{e}");
                    resolution.errors.push(e);
                }
            }
        }
        resolution
    }

    fn resolve_one(&self, dep: &Dependency) -> Result<LockedDependency, ResolutionError> {
        let candidates = self.index.lookup(&dep.package);
        if candidates.is_empty() {
            return Err(ResolutionError::UnknownPackage {
                dependency: dep.name.clone(),
                package: dep.package.clone(),
            });
        }

        let matching: Vec<&VersionedEntry> = candidates
            .iter()
            .filter(|e| dep.range.matches(&e.version))
            .collect();
        if matching.is_empty() {
            let available: Vec<String> =
                candidates.iter().map(|e| e.version.to_string()).collect();
            return Err(ResolutionError::NoMatchingVersion {
                dependency: dep.name.clone(),
                package: dep.package.clone(),
                range: dep.range.to_string(),
                available: available.join(", "),
            });
        }

        let eligible: Vec<&VersionedEntry> = matching
            .into_iter()
            .filter(|e| {
                self.environment
                    .is_none_or(|env| evaluate_platform(&e.constraints, env).is_eligible())
            })
            .collect();

        let best = dep
            .range
            .best_match(eligible.iter().map(|e| &e.version))
            .and_then(|v| eligible.iter().find(|e| e.version == *v))
            .ok_or_else(|| ResolutionError::NoEligibleVersion {
                dependency: dep.name.clone(),
                package: dep.package.clone(),
                range: dep.range.to_string(),
            })?;

        Ok(LockedDependency {
            name: dep.name.clone(),
            image: best.image.clone(),
            digest: best.digest.clone(),
            version: best.version.to_string(),
        })
    }
}

/// Resolve `dependencies` against `index` without environment filtering.
pub fn resolve(dependencies: &[Dependency], index: &RepositoryIndex) -> Resolution {
    Resolver::new(index).resolve(dependencies)
}
