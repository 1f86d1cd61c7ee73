use crate::document::Repository;
use crate::RepositoryError;
use pallet_schema::{cmp_precedence, Constraint, Digest, Fqdn, ImageRef};
use semver::Version;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntry {
    pub fqdn: Fqdn,
    pub version: Version,
    pub image: ImageRef,
    pub digest: Digest,
    /// Environment constraints the published version declares for itself.
    pub constraints: Vec<Constraint>,
    /// Name of the repository the entry came from.
    pub repository: String,
}

/// Merged, read-only view over all repositories of a pass.
///
/// Entries are grouped by FQDN and kept in ascending version order.
#[derive(Debug, Clone, Default)]
pub struct RepositoryIndex {
    packages: BTreeMap<Fqdn, Vec<VersionedEntry>>,
}

impl RepositoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge repositories in declaration order. When the same FQDN and version
    /// appear twice, the later repository wins.
    pub fn merge<'a, I>(repositories: I) -> Result<Self, RepositoryError>
    where
        I: IntoIterator<Item = &'a Repository>,
    {
        let mut index = Self::new();
        for repo in repositories {
            for entry in repo.versioned_entries()? {
                index.insert(entry);
            }
        }
        info!(
            "indexed {} package(s), {} version(s)",
            index.packages.len(),
            index.version_count()
        );
        Ok(index)
    }

    /// Insert an entry, replacing any existing entry with the same FQDN and version.
    pub fn insert(&mut self, entry: VersionedEntry) {
        let versions = self.packages.entry(entry.fqdn.clone()).or_default();
        match versions.binary_search_by(|probe| order(probe, &entry)) {
            Ok(pos) => {
                debug!(
                    "{} {} from '{}' replaces the entry from '{}'",
                    entry.fqdn, entry.version, entry.repository, versions[pos].repository
                );
                versions[pos] = entry;
            }
            Err(pos) => versions.insert(pos, entry),
        }
    }

    /// All published versions of a package. Unknown packages yield an empty slice.
    pub fn lookup(&self, fqdn: &Fqdn) -> &[VersionedEntry] {
        self.packages.get(fqdn).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn packages(&self) -> impl Iterator<Item = &Fqdn> {
        self.packages.keys()
    }

    pub fn version_count(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

fn order(a: &VersionedEntry, b: &VersionedEntry) -> std::cmp::Ordering {
    cmp_precedence(&a.version, &b.version).then_with(|| a.version.cmp(&b.version))
}
