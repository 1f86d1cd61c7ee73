use crate::document::{parse_repository_str, Repository};
use crate::RepositoryError;
use pallet_schema::RepositoryRef;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fetches repository documents published as container images.
///
/// Pulling images is the job of an external registry client; implementors
/// return the raw repository document stored in the image.
pub trait ImageRepositorySource {
    fn fetch(&self, image: &str) -> Result<String, RepositoryError>;
}

/// Image source backed by a fixed mapping from image reference to a local
/// repository file, for offline use and tests.
#[derive(Debug, Clone, Default)]
pub struct MappedImageSource {
    images: BTreeMap<String, PathBuf>,
}

impl MappedImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.images.insert(image.into(), path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageRepositorySource for MappedImageSource {
    fn fetch(&self, image: &str) -> Result<String, RepositoryError> {
        let path = self
            .images
            .get(image)
            .ok_or_else(|| RepositoryError::Source {
                image: image.to_owned(),
                reason: "image is not mapped to a local repository file".to_owned(),
            })?;
        fs::read_to_string(path).map_err(|source| RepositoryError::Io {
            path: path.clone(),
            source,
        })
    }
}

/// Loads the repositories a manifest references.
///
/// File references are resolved against the manifest directory first, then
/// against each search path in order.
pub struct RepositoryLoader<'a> {
    base_dir: PathBuf,
    search_paths: Vec<PathBuf>,
    images: Option<&'a dyn ImageRepositorySource>,
}

impl<'a> RepositoryLoader<'a> {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            search_paths: Vec::new(),
            images: None,
        }
    }

    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_image_source(mut self, source: &'a dyn ImageRepositorySource) -> Self {
        self.images = Some(source);
        self
    }

    pub fn load(&self, reference: &RepositoryRef) -> Result<Repository, RepositoryError> {
        match reference {
            RepositoryRef::File(file) => {
                let path = self.locate(file);
                debug!("loading repository file {}", path.display());
                let content = fs::read_to_string(&path)
                    .map_err(|source| RepositoryError::Io { path, source })?;
                parse_repository_str(&content)
            }
            RepositoryRef::Image(image) => {
                let source = self
                    .images
                    .ok_or_else(|| RepositoryError::NoImageSource(image.clone()))?;
                debug!("loading repository image {image}");
                parse_repository_str(&source.fetch(image)?)
            }
        }
    }

    /// Load every reference, preserving declaration order.
    pub fn load_all(
        &self,
        references: &[RepositoryRef],
    ) -> Result<Vec<Repository>, RepositoryError> {
        references.iter().map(|r| self.load(r)).collect()
    }

    fn locate(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            return file.to_path_buf();
        }
        let primary = self.base_dir.join(file);
        if primary.exists() {
            return primary;
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(file))
            .find(|candidate| candidate.exists())
            .unwrap_or(primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "kind: Repository\nmetadata: {name: core}\nentries: []\n";

    #[test]
    fn loads_file_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("repo.yaml"), REPO).unwrap();
        let loader = RepositoryLoader::new(dir.path());
        let repo = loader
            .load(&RepositoryRef::File(PathBuf::from("repo.yaml")))
            .unwrap();
        assert_eq!(repo.name(), "core");
    }

    #[test]
    fn falls_back_to_search_paths() {
        let base = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        fs::write(extra.path().join("repo.yaml"), REPO).unwrap();
        let loader = RepositoryLoader::new(base.path()).with_search_path(extra.path());
        assert!(loader
            .load(&RepositoryRef::File(PathBuf::from("repo.yaml")))
            .is_ok());
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let loader = RepositoryLoader::new(dir.path());
        let err = loader
            .load(&RepositoryRef::File(PathBuf::from("absent.yaml")))
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Io { ref path, .. } if path.ends_with("absent.yaml")
        ));
    }

    #[test]
    fn image_needs_a_source() {
        let loader = RepositoryLoader::new(".");
        let err = loader
            .load(&RepositoryRef::Image("quay.io/acme/repo:1".to_owned()))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NoImageSource(_)));
    }

    #[test]
    fn image_loaded_through_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mirror.yaml");
        fs::write(&file, REPO).unwrap();
        let source = MappedImageSource::new().with_image("quay.io/acme/repo:1", &file);
        let loader = RepositoryLoader::new(dir.path()).with_image_source(&source);
        let repos = loader
            .load_all(&[RepositoryRef::Image("quay.io/acme/repo:1".to_owned())])
            .unwrap();
        assert_eq!(repos.len(), 1);

        let err = loader
            .load(&RepositoryRef::Image("quay.io/acme/other:1".to_owned()))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Source { .. }));
    }
}
