use crate::environment::{PlatformName, TemplateContext};
use crate::range::RangeError;
use crate::types::FqdnError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const MANIFEST_API_VERSION: &str = "manifests.package-operator.run/v1alpha1";
pub const MANIFEST_KIND: &str = "PackageManifest";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("unsupported apiVersion '{0}', expected manifests.package-operator.run/v1alpha1")]
    UnsupportedApiVersion(String),
    #[error("unexpected kind '{0}', expected PackageManifest")]
    UnexpectedKind(String),
    #[error("metadata.name must not be empty")]
    EmptyName,
    #[error("spec.scopes must declare at least one of Cluster, Namespaced")]
    NoScopes,
    #[error("spec.phases must not be empty")]
    NoPhases,
    #[error("phase name must not be empty (phase #{0})")]
    EmptyPhaseName(usize),
    #[error("phase '{0}' is declared more than once")]
    DuplicatePhase(String),
    #[error("image '{0}' is declared more than once")]
    DuplicateImage(String),
    #[error("image '{0}' has an empty image reference")]
    EmptyImage(String),
    #[error("dependency '{0}' is declared more than once")]
    DuplicateDependency(String),
    #[error("dependency #{0} does not declare an image source")]
    MissingDependencySource(usize),
    #[error("{context}: {source}")]
    InvalidRange {
        context: String,
        #[source]
        source: RangeError,
    },
    #[error("dependency '{name}': {source}")]
    InvalidFqdn {
        name: String,
        #[source]
        source: FqdnError,
    },
    #[error("constraint #{index}: {reason}")]
    InvalidConstraint { index: usize, reason: String },
    #[error("availability probe #{index}: {reason}")]
    InvalidProbe { index: usize, reason: String },
    #[error("repository #{index}: {reason}")]
    InvalidRepository { index: usize, reason: String },
    #[error("object {object}: {reason}")]
    InvalidObject { object: String, reason: String },
}

/// Manifest of a package, as written by package authors.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: ManifestSpec,
    #[serde(default)]
    pub test: ManifestTest,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Installation scopes a package supports.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestScope {
    Cluster,
    Namespaced,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSpec {
    pub scopes: Vec<ManifestScope>,
    pub phases: Vec<ManifestPhase>,
    /// All probes must succeed for the package to be Available. Failing
    /// probes block reconciliation of later phases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_probes: Vec<ObjectSetProbe>,
    #[serde(default)]
    pub config: ManifestConfig,
    #[serde(default)]
    pub images: Vec<ManifestImage>,
    /// Presence marks a multi-component package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ManifestConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<ManifestRepository>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ManifestDependency>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfig {
    /// OpenAPI v3 schema, handed to the schema validation collaborator as-is.
    #[serde(
        default,
        rename = "openAPIV3Schema",
        skip_serializing_if = "Option::is_none"
    )]
    pub open_api_v3_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestPhase {
    pub name: String,
    /// Empty or `default` means the built-in handler reconciles the phase;
    /// anything else delegates it to an external phase handler.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestImage {
    /// Name templates reference the image by.
    pub name: String,
    /// `REPOSITORY[:TAG]`.
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<PlatformVersionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Vec<PlatformName>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_in_scope: Option<UniqueInScopeSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlatformVersionSpec {
    pub name: PlatformName,
    pub range: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct UniqueInScopeSpec {}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestRepository {
    /// Path to a repository file, relative to the manifest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    /// Container image holding a repository.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestDependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<DependencyImageSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DependencyImageSpec {
    pub name: String,
    /// `<package-name>.<repository-name>`.
    pub package: String,
    pub range: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSetProbe {
    pub selector: ProbeSelector,
    pub probes: Vec<ProbeSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProbeSelector {
    pub kind: GroupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKind {
    #[serde(default)]
    pub group: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionProbeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_equal: Option<FieldsEqualProbeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<CelProbeSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConditionProbeSpec {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldsEqualProbeSpec {
    pub field_a: String,
    pub field_b: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CelProbeSpec {
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ManifestTest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template: Vec<TemplateTestCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconform: Option<KubeconformTest>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TemplateTestCase {
    pub name: String,
    #[serde(default)]
    pub context: TemplateContext,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeconformTest {
    pub kubernetes_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_locations: Vec<String>,
}

pub fn parse_manifest_str(input: &str) -> Result<PackageManifest, ManifestError> {
    let manifest: PackageManifest = serde_yaml::from_str(input)?;
    if manifest.api_version != MANIFEST_API_VERSION {
        return Err(ManifestError::UnsupportedApiVersion(manifest.api_version));
    }
    if manifest.kind != MANIFEST_KIND {
        return Err(ManifestError::UnexpectedKind(manifest.kind));
    }
    Ok(manifest)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<PackageManifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}
