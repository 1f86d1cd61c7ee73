use crate::environment::PlatformName;
use crate::manifest::{
    GroupKind, ManifestConstraint, ManifestError, ManifestScope, ObjectSetProbe, PackageManifest,
    ProbeSpec,
};
use crate::object::PackageObject;
use crate::range::VersionRange;
use crate::types::{DependencyName, Fqdn, PhaseName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Phase class reconciled by the built-in handler.
pub const DEFAULT_PHASE_CLASS: &str = "default";

/// Validated, immutable view of a manifest.
///
/// Ranges are parsed, FQDNs split, constraint and probe shapes collapsed into
/// closed enums, and names checked for uniqueness. Anything that would fail
/// here fails at load time rather than during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub scopes: Vec<ManifestScope>,
    pub phases: Vec<Phase>,
    pub probes: Vec<AvailabilityProbe>,
    pub images: Vec<Image>,
    pub constraints: Vec<Constraint>,
    pub repositories: Vec<RepositoryRef>,
    pub dependencies: Vec<Dependency>,
    pub config_schema: Option<serde_json::Value>,
    pub multi_component: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub class: String,
}

impl Phase {
    pub fn new(name: impl Into<PhaseName>) -> Self {
        Self {
            name: name.into(),
            class: DEFAULT_PHASE_CLASS.to_owned(),
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Delegated phases are reconciled by an external phase handler.
    pub fn is_delegated(&self) -> bool {
        self.class != DEFAULT_PHASE_CLASS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryRef {
    File(PathBuf),
    Image(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: DependencyName,
    pub package: Fqdn,
    pub range: VersionRange,
}

/// Environment constraint. A package's constraints are conjunctive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Platform version must satisfy the range; ignored on other platforms.
    PlatformVersion {
        name: PlatformName,
        range: VersionRange,
    },
    /// Platform must be one of the listed ones.
    Platform(Vec<PlatformName>),
    /// Only one instance of the package per scope.
    UniqueInScope,
}

/// Selects objects by group/kind and, optionally, labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSelector {
    pub kind: GroupKind,
    pub match_labels: BTreeMap<String, String>,
}

impl ObjectSelector {
    pub fn matches(&self, object: &PackageObject) -> bool {
        object.group() == self.kind.group
            && object.kind == self.kind.kind
            && self
                .match_labels
                .iter()
                .all(|(k, v)| object.metadata.labels.get(k) == Some(v))
    }
}

impl std::fmt::Display for ObjectSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind.group.is_empty() {
            write!(f, "{}", self.kind.kind)?;
        } else {
            write!(f, "{}.{}", self.kind.kind, self.kind.group)?;
        }
        if !self.match_labels.is_empty() {
            let labels: Vec<String> = self
                .match_labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, "[{}]", labels.join(","))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCheck {
    /// `.status.conditions[type]` must have the given status.
    Condition {
        condition_type: String,
        status: String,
    },
    /// Two field paths must resolve to equal values.
    FieldsEqual { field_a: String, field_b: String },
}

impl std::fmt::Display for ProbeCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeCheck::Condition {
                condition_type,
                status,
            } => write!(f, "condition {condition_type}={status}"),
            ProbeCheck::FieldsEqual { field_a, field_b } => {
                write!(f, "{field_a} == {field_b}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityProbe {
    pub selector: ObjectSelector,
    pub checks: Vec<ProbeCheck>,
}

impl PackageManifest {
    /// Validate the manifest and produce the immutable [`Package`] model.
    pub fn validate(&self) -> Result<Package, ManifestError> {
        let name = self.metadata.name.trim().to_owned();
        if name.is_empty() {
            return Err(ManifestError::EmptyName);
        }

        let mut scopes = self.spec.scopes.clone();
        scopes.sort();
        scopes.dedup();
        if scopes.is_empty() {
            return Err(ManifestError::NoScopes);
        }

        Ok(Package {
            name,
            labels: self.metadata.labels.clone(),
            annotations: self.metadata.annotations.clone(),
            scopes,
            phases: self.validate_phases()?,
            probes: self.validate_probes()?,
            images: self.validate_images()?,
            constraints: self.validate_constraints()?,
            repositories: self.validate_repositories()?,
            dependencies: self.validate_dependencies()?,
            config_schema: self.spec.config.open_api_v3_schema.clone(),
            multi_component: self.spec.components.is_some(),
        })
    }

    fn validate_phases(&self) -> Result<Vec<Phase>, ManifestError> {
        if self.spec.phases.is_empty() {
            return Err(ManifestError::NoPhases);
        }
        let mut seen = BTreeSet::new();
        let mut phases = Vec::with_capacity(self.spec.phases.len());
        for (i, phase) in self.spec.phases.iter().enumerate() {
            let name = phase.name.trim();
            if name.is_empty() {
                return Err(ManifestError::EmptyPhaseName(i));
            }
            if !seen.insert(name.to_owned()) {
                return Err(ManifestError::DuplicatePhase(name.to_owned()));
            }
            let class = match phase.class.trim() {
                "" => DEFAULT_PHASE_CLASS,
                other => other,
            };
            phases.push(Phase::new(name).with_class(class));
        }
        Ok(phases)
    }

    fn validate_probes(&self) -> Result<Vec<AvailabilityProbe>, ManifestError> {
        self.spec
            .availability_probes
            .iter()
            .enumerate()
            .map(|(index, probe)| convert_probe(index, probe))
            .collect()
    }

    fn validate_images(&self) -> Result<Vec<Image>, ManifestError> {
        let mut seen = BTreeSet::new();
        let mut images = Vec::with_capacity(self.spec.images.len());
        for image in &self.spec.images {
            let name = image.name.trim().to_owned();
            if !seen.insert(name.clone()) {
                return Err(ManifestError::DuplicateImage(name));
            }
            let reference = image.image.trim().to_owned();
            if reference.is_empty() {
                return Err(ManifestError::EmptyImage(name));
            }
            images.push(Image {
                name,
                image: reference,
            });
        }
        Ok(images)
    }

    fn validate_constraints(&self) -> Result<Vec<Constraint>, ManifestError> {
        convert_constraints(&self.spec.constraints)
    }

    fn validate_repositories(&self) -> Result<Vec<RepositoryRef>, ManifestError> {
        let mut out = Vec::with_capacity(self.spec.repositories.len());
        for (index, repo) in self.spec.repositories.iter().enumerate() {
            let file = repo.file.trim();
            let image = repo.image.trim();
            match (file.is_empty(), image.is_empty()) {
                (false, true) => out.push(RepositoryRef::File(PathBuf::from(file))),
                (true, false) => out.push(RepositoryRef::Image(image.to_owned())),
                _ => {
                    return Err(ManifestError::InvalidRepository {
                        index,
                        reason: "exactly one of file, image must be set".to_owned(),
                    })
                }
            }
        }
        Ok(out)
    }

    fn validate_dependencies(&self) -> Result<Vec<Dependency>, ManifestError> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.spec.dependencies.len());
        for (index, dep) in self.spec.dependencies.iter().enumerate() {
            let Some(image) = &dep.image else {
                return Err(ManifestError::MissingDependencySource(index));
            };
            let name = image.name.trim().to_owned();
            if !seen.insert(name.clone()) {
                return Err(ManifestError::DuplicateDependency(name));
            }
            let package: Fqdn =
                image
                    .package
                    .parse()
                    .map_err(|source| ManifestError::InvalidFqdn {
                        name: name.clone(),
                        source,
                    })?;
            let range =
                VersionRange::parse(&image.range).map_err(|source| ManifestError::InvalidRange {
                    context: format!("dependency '{name}'"),
                    source,
                })?;
            out.push(Dependency {
                name: DependencyName::new(name),
                package,
                range,
            });
        }
        Ok(out)
    }
}

/// Convert raw constraint documents, shared by manifests and repository entries.
pub fn convert_constraints(raw: &[ManifestConstraint]) -> Result<Vec<Constraint>, ManifestError> {
    let mut out = Vec::with_capacity(raw.len());
    for (index, c) in raw.iter().enumerate() {
        let set = usize::from(c.platform_version.is_some())
            + usize::from(c.platform.is_some())
            + usize::from(c.unique_in_scope.is_some());
        if set != 1 {
            return Err(ManifestError::InvalidConstraint {
                index,
                reason: format!(
                    "exactly one of platformVersion, platform, uniqueInScope must be set, found {set}"
                ),
            });
        }

        if let Some(pv) = &c.platform_version {
            let range = VersionRange::parse(&pv.range).map_err(|source| {
                ManifestError::InvalidRange {
                    context: format!("constraint #{index} ({} version)", pv.name),
                    source,
                }
            })?;
            out.push(Constraint::PlatformVersion {
                name: pv.name,
                range,
            });
        } else if let Some(platforms) = &c.platform {
            if platforms.is_empty() {
                return Err(ManifestError::InvalidConstraint {
                    index,
                    reason: "platform list must not be empty".to_owned(),
                });
            }
            out.push(Constraint::Platform(platforms.clone()));
        } else {
            out.push(Constraint::UniqueInScope);
        }
    }
    Ok(out)
}

fn convert_probe(index: usize, probe: &ObjectSetProbe) -> Result<AvailabilityProbe, ManifestError> {
    let invalid = |reason: String| ManifestError::InvalidProbe { index, reason };

    if probe.selector.kind.kind.trim().is_empty() {
        return Err(invalid("selector.kind.kind must not be empty".to_owned()));
    }
    if probe.probes.is_empty() {
        return Err(invalid("at least one probe must be declared".to_owned()));
    }

    let checks = probe
        .probes
        .iter()
        .map(|p| convert_check(p).map_err(&invalid))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AvailabilityProbe {
        selector: ObjectSelector {
            kind: probe.selector.kind.clone(),
            match_labels: probe
                .selector
                .selector
                .as_ref()
                .map(|s| s.match_labels.clone())
                .unwrap_or_default(),
        },
        checks,
    })
}

fn convert_check(spec: &ProbeSpec) -> Result<ProbeCheck, String> {
    match (&spec.condition, &spec.fields_equal, &spec.cel) {
        (Some(c), None, None) => Ok(ProbeCheck::Condition {
            condition_type: c.condition_type.clone(),
            status: c.status.clone(),
        }),
        (None, Some(f), None) => Ok(ProbeCheck::FieldsEqual {
            field_a: f.field_a.clone(),
            field_b: f.field_b.clone(),
        }),
        (None, None, Some(cel)) => Err(format!("cel probes are not supported: '{}'", cel.rule)),
        _ => Err("exactly one of condition, fieldsEqual, cel must be set".to_owned()),
    }
}
