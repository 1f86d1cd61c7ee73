//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so documents stay
//! compatible with the upstream manifest format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Name a dependency is referenced by inside templates and the lock file.
    DependencyName
);

string_newtype!(
    /// Name of a rollout phase, unique within a manifest.
    PhaseName
);

string_newtype!(
    /// Image repository reference without digest, e.g. `quay.io/org/pkg`.
    ImageRef
);

string_newtype!(
    /// Content digest of an image, e.g. `sha256:...`. Carried through verbatim.
    Digest
);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid package FQDN '{0}', expected '<package-name>.<repository-name>'")]
pub struct FqdnError(pub String);

/// Fully qualified package name: `<package-name>.<repository-name>`.
///
/// The package name is everything before the first `.`; the repository name
/// is the remainder and may itself contain dots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqdn {
    package: String,
    repository: String,
}

impl Fqdn {
    pub fn new(package: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            repository: repository.into(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }
}

impl FromStr for Fqdn {
    type Err = FqdnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.split_once('.') {
            Some((package, repository)) if !package.is_empty() && !repository.is_empty() => {
                Ok(Self::new(package, repository))
            }
            _ => Err(FqdnError(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Fqdn {
    type Error = FqdnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fqdn> for String {
    fn from(value: Fqdn) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.repository)
    }
}
