//! Package repositories for Pallet.
//!
//! A repository publishes package images under one or more versions. This crate
//! parses repository documents, loads them from files or through an external
//! image source, and merges them into a `RepositoryIndex` that the resolver
//! queries by package FQDN.

pub mod document;
pub mod index;
pub mod loader;

pub use document::{parse_repository_str, Repository, RepositoryEntry, REPOSITORY_KIND};
pub use index::{RepositoryIndex, VersionedEntry};
pub use loader::{ImageRepositorySource, MappedImageSource, RepositoryLoader};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to read repository file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse repository: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unexpected kind '{0}', expected Repository")]
    UnexpectedKind(String),
    #[error("repository metadata.name must not be empty")]
    EmptyName,
    #[error("repository '{repository}', entry '{entry}': {reason}")]
    InvalidEntry {
        repository: String,
        entry: String,
        reason: String,
    },
    #[error("repository image '{0}' cannot be loaded: no image source configured")]
    NoImageSource(String),
    #[error("repository image '{image}': {reason}")]
    Source { image: String, reason: String },
}
