use crate::index::VersionedEntry;
use crate::RepositoryError;
use pallet_schema::{
    convert_constraints, parse_version, Digest, Fqdn, ImageRef, ManifestConstraint,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const REPOSITORY_KIND: &str = "Repository";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryMetadata {
    pub name: String,
}

/// Repository document as stored on disk or inside a repository image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub metadata: RepositoryMetadata,
    #[serde(default)]
    pub entries: Vec<RepositoryEntry>,
}

/// One published image. The same digest may be published under several
/// versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryEntry {
    /// Package name; the FQDN is `<name>.<repository name>`.
    pub name: String,
    pub image: String,
    pub digest: String,
    pub versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ManifestConstraint>,
}

pub fn parse_repository_str(input: &str) -> Result<Repository, RepositoryError> {
    let repo: Repository = serde_yaml::from_str(input)?;
    if repo.kind != REPOSITORY_KIND {
        return Err(RepositoryError::UnexpectedKind(repo.kind));
    }
    if repo.metadata.name.trim().is_empty() {
        return Err(RepositoryError::EmptyName);
    }
    Ok(repo)
}

impl Repository {
    pub fn name(&self) -> &str {
        self.metadata.name.trim()
    }

    /// Expand entries into one [`VersionedEntry`] per published version.
    ///
    /// Rejects entries with unparsable versions, malformed constraints, or
    /// missing image data. Document order is preserved.
    pub fn versioned_entries(&self) -> Result<Vec<VersionedEntry>, RepositoryError> {
        let repository = self.name().to_owned();
        let mut out = Vec::new();

        for entry in &self.entries {
            let invalid = |reason: String| RepositoryError::InvalidEntry {
                repository: repository.clone(),
                entry: entry.name.clone(),
                reason,
            };

            let name = entry.name.trim();
            if name.is_empty() || name.contains('.') {
                return Err(invalid(
                    "package name must be non-empty and must not contain '.'".to_owned(),
                ));
            }
            if entry.image.trim().is_empty() || entry.digest.trim().is_empty() {
                return Err(invalid("image and digest must be set".to_owned()));
            }
            if entry.versions.is_empty() {
                return Err(invalid("at least one version must be published".to_owned()));
            }

            let constraints =
                convert_constraints(&entry.constraints).map_err(|e| invalid(e.to_string()))?;
            let fqdn = Fqdn::new(name, repository.as_str());

            let mut seen = BTreeSet::new();
            for raw in &entry.versions {
                let version = parse_version(raw).map_err(|e| invalid(e.to_string()))?;
                if !seen.insert(version.clone()) {
                    return Err(invalid(format!("version {version} is listed twice")));
                }
                out.push(VersionedEntry {
                    fqdn: fqdn.clone(),
                    version,
                    image: ImageRef::new(entry.image.trim()),
                    digest: Digest::new(entry.digest.trim()),
                    constraints: constraints.clone(),
                    repository: repository.clone(),
                });
            }
        }

        Ok(out)
    }
}
