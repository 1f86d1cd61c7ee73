use crate::package::{Image, Package};
use crate::range::parse_version;
use crate::types::{DependencyName, Digest, ImageRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const LOCK_API_VERSION: &str = "manifests.package-operator.run/v1alpha1";
pub const LOCK_KIND: &str = "PackageManifestLock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock file parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unexpected lock document kind '{0}', expected PackageManifestLock")]
    UnexpectedKind(String),
    #[error("lock file checksum mismatch: lock has '{lock}', recomputed '{computed}'")]
    ChecksumMismatch { lock: String, computed: String },
    #[error("lock file manifest drift: {0}")]
    ManifestDrift(String),
}

/// A dependency pinned to one published image digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedDependency {
    pub name: DependencyName,
    pub image: ImageRef,
    pub digest: Digest,
    pub version: String,
}

/// An image of the package itself. The digest is only known when the manifest
/// pins it with `@digest`; tag references are recorded without one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LockedImage {
    pub name: String,
    pub image: ImageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
}

impl LockedImage {
    pub fn from_manifest(image: &Image) -> Self {
        match image.image.split_once('@') {
            Some((reference, digest)) => Self {
                name: image.name.clone(),
                image: ImageRef::new(reference),
                digest: Some(Digest::new(digest)),
            },
            None => Self {
                name: image.name.clone(),
                image: ImageRef::new(image.image.as_str()),
                digest: None,
            },
        }
    }
}

/// Resolved dependencies keyed by dependency name.
///
/// Iteration order only depends on the names, so two resolutions over the same
/// inputs serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockset(BTreeMap<DependencyName, LockedDependency>);

impl Lockset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locked: LockedDependency) {
        self.0.insert(locked.name.clone(), locked);
    }

    pub fn get(&self, name: &str) -> Option<&LockedDependency> {
        self.0.get(&DependencyName::new(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LockedDependency> {
        self.0.values()
    }
}

impl FromIterator<LockedDependency> for Lockset {
    fn from_iter<T: IntoIterator<Item = LockedDependency>>(iter: T) -> Self {
        let mut set = Self::new();
        for locked in iter {
            set.insert(locked);
        }
        set
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockSpec {
    #[serde(default)]
    pub images: Vec<LockedImage>,
    #[serde(default)]
    pub dependencies: Vec<LockedDependency>,
}

/// Persisted lockset, stored next to the manifest.
///
/// The checksum is computed from the locked content only, so the same
/// resolution always yields a byte-identical document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestLock {
    pub api_version: String,
    pub kind: String,
    pub spec: LockSpec,
    pub checksum: String,
}

impl PackageManifestLock {
    pub fn new(images: Vec<LockedImage>, lockset: &Lockset) -> Self {
        let mut images = images;
        images.sort();

        let lock = Self {
            api_version: LOCK_API_VERSION.to_owned(),
            kind: LOCK_KIND.to_owned(),
            spec: LockSpec {
                images,
                dependencies: lockset.iter().cloned().collect(),
            },
            checksum: String::new(),
        };
        let checksum = lock.compute_checksum();
        Self { checksum, ..lock }
    }

    /// Lock a validated package against a lockset.
    pub fn for_package(package: &Package, lockset: &Lockset) -> Self {
        let images = package.images.iter().map(LockedImage::from_manifest).collect();
        Self::new(images, lockset)
    }

    /// Dependencies of this lock as a [`Lockset`].
    pub fn lockset(&self) -> Lockset {
        self.spec.dependencies.iter().cloned().collect()
    }

    pub fn compute_checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();

        for image in &self.spec.images {
            let digest = image.digest.as_ref().map_or("", Digest::as_str);
            hasher.update(format!("image:{}={}@{digest}\n", image.name, image.image).as_bytes());
        }
        for dep in &self.spec.dependencies {
            hasher.update(
                format!(
                    "dep:{}={}@{}#{}\n",
                    dep.name, dep.image, dep.digest, dep.version
                )
                .as_bytes(),
            );
        }

        hasher.finalize().to_hex().to_string()
    }

    /// Verify the stored checksum matches the locked content.
    pub fn verify_integrity(&self) -> Result<(), LockError> {
        let computed = self.compute_checksum();
        if self.checksum != computed {
            return Err(LockError::ChecksumMismatch {
                lock: self.checksum.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Check that the manifest's declared dependencies still match this lock.
    ///
    /// Catches manifests edited after the lock was written: added or removed
    /// dependencies, changed packages, and ranges the locked version no
    /// longer satisfies.
    pub fn verify_manifest_intent(&self, package: &Package) -> Result<(), LockError> {
        let locked = self.lockset();

        for dep in &package.dependencies {
            let Some(entry) = locked.get(dep.name.as_str()) else {
                return Err(LockError::ManifestDrift(format!(
                    "dependency '{}' is in the manifest but not in the lock file. Run 'pallet resolve' to re-resolve.",
                    dep.name
                )));
            };
            let satisfied = parse_version(&entry.version)
                .map(|v| dep.range.matches(&v))
                .unwrap_or(false);
            if !satisfied {
                return Err(LockError::ManifestDrift(format!(
                    "dependency '{}' is locked at {} which does not satisfy '{}'",
                    dep.name, entry.version, dep.range
                )));
            }
        }

        for entry in locked.iter() {
            if !package.dependencies.iter().any(|d| d.name == entry.name) {
                return Err(LockError::ManifestDrift(format!(
                    "dependency '{}' is locked but no longer declared",
                    entry.name
                )));
            }
        }

        for image in &package.images {
            if !self.spec.images.iter().any(|i| i.name == image.name) {
                return Err(LockError::ManifestDrift(format!(
                    "image '{}' is in the manifest but not in the lock file",
                    image.name
                )));
            }
        }

        Ok(())
    }

    pub fn to_yaml_string(&self) -> Result<String, LockError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, LockError> {
        let lock: Self = serde_yaml::from_str(input)?;
        if lock.kind != LOCK_KIND {
            return Err(LockError::UnexpectedKind(lock.kind));
        }
        Ok(lock)
    }

    /// Write atomically: temp file in the target directory, fsync, rename.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), LockError> {
        let path = path.as_ref();
        let content = self.to_yaml_string()?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LockError::Io(e.error))?;
        if let Ok(f) = fs::File::open(dir) {
            let _ = f.sync_all();
        }
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}
