//! `pallet.toml` tool configuration.
//!
//! Every field is optional; command-line flags override file values.

use pallet_repo::MappedImageSource;
use pallet_schema::Environment;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "pallet.toml";
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.29.0";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PalletConfig {
    /// Lock file name, relative to the manifest directory.
    pub lock_file: Option<String>,
    pub repositories: RepositoriesConfig,
    pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoriesConfig {
    pub search_paths: Vec<PathBuf>,
    /// Repository image reference to a local repository file.
    pub images: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub kubernetes_version: Option<String>,
    pub openshift_version: Option<String>,
}

impl PalletConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
        Self::parse(&content).map_err(|e| format!("invalid config {}: {e}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load `explicit` if given, otherwise `pallet.toml` in the working
    /// directory when present.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, String> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Build the environment snapshot, preferring the given overrides.
    pub fn environment(
        &self,
        kubernetes_version: Option<&str>,
        openshift_version: Option<&str>,
    ) -> Environment {
        let kubernetes = kubernetes_version
            .or(self.environment.kubernetes_version.as_deref())
            .unwrap_or(DEFAULT_KUBERNETES_VERSION);
        let env = Environment::kubernetes(kubernetes);
        match openshift_version.or(self.environment.openshift_version.as_deref()) {
            Some(version) => env.with_openshift(version),
            None => env,
        }
    }

    pub fn image_source(&self) -> MappedImageSource {
        self.repositories
            .images
            .iter()
            .fold(MappedImageSource::new(), |source, (image, path)| {
                source.with_image(image.clone(), path.clone())
            })
    }
}
