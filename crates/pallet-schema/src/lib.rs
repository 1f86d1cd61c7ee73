//! Package manifests, version ranges, environment snapshots and lock files for Pallet.
//!
//! This crate is the schema layer: YAML manifest parsing (`PackageManifest`),
//! load-time validation into an immutable `Package`, Semantic Versioning range
//! matching (`VersionRange`), the environment and template context documents,
//! the recognized annotation keys, and lock file generation/verification
//! (`PackageManifestLock`).

pub mod annotations;
pub mod environment;
pub mod lock;
pub mod manifest;
pub mod object;
pub mod package;
pub mod range;
pub mod types;

pub use environment::{
    Environment, HostedCluster, Platform, PlatformName, ProxyEnvironment, TemplateContext,
    TemplateObjectMeta,
};
pub use lock::{LockError, LockedDependency, LockedImage, Lockset, PackageManifestLock};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, GroupKind, ManifestConstraint, ManifestError,
    ManifestScope, PackageManifest,
};
pub use object::{ObjectKey, ObjectMeta, PackageObject};
pub use package::{
    convert_constraints, AvailabilityProbe, Constraint, Dependency, Image, ObjectSelector, Package,
    Phase, ProbeCheck, RepositoryRef, DEFAULT_PHASE_CLASS,
};
pub use range::{cmp_precedence, parse_version, RangeError, VersionError, VersionRange};
pub use types::{DependencyName, Digest, Fqdn, FqdnError, ImageRef, PhaseName};
