//! OCI image references: `[registry/]repository[:tag|@digest]`.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::core::PkgError;

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag assumed when a reference names neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

static REPOSITORY_COMPONENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").ok());

static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").ok());

static DIGEST: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").ok());

fn is_match(re: &LazyLock<Option<Regex>>, s: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(s))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Tag(String),
    Digest(String),
}

impl Identifier {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(t) => t,
            Self::Digest(d) => d,
        }
    }
}

/// A parsed image reference that remembers how it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    original: String,
    registry: String,
    repository: String,
    identifier: Identifier,
    explicit_identifier: bool,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, PkgError> {
        let invalid = |reason: &str| PkgError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() || reference.trim() != reference {
            return Err(invalid("reference is empty or has surrounding whitespace"));
        }

        let (name, identifier, explicit_identifier) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !is_match(&DIGEST, digest) {
                    return Err(invalid("digest must look like 'sha256:<hex>'"));
                }
                (name, Identifier::Digest(digest.to_string()), true)
            }
            None => {
                let last_slash = reference.rfind('/').map_or(0, |i| i + 1);
                match reference[last_slash..].rfind(':') {
                    Some(colon) => {
                        let split = last_slash + colon;
                        let tag = &reference[split + 1..];
                        if !is_match(&TAG, tag) {
                            return Err(invalid("tag contains invalid characters"));
                        }
                        (&reference[..split], Identifier::Tag(tag.to_string()), true)
                    }
                    None => (reference, Identifier::Tag(DEFAULT_TAG.to_string()), false),
                }
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ if !name.contains('/') => (DEFAULT_REGISTRY.to_string(), format!("library/{name}")),
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() || !repository.split('/').all(|c| is_match(&REPOSITORY_COMPONENT, c))
        {
            return Err(invalid("repository must be lowercase path components"));
        }

        Ok(Self {
            original: reference.to_string(),
            registry,
            repository,
            identifier,
            explicit_identifier,
        })
    }

    /// Registry host, e.g. `ghcr.io` or `localhost:5000`.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry, e.g. `org/provider`.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The reference as originally written.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// The reference as written, minus its tag or digest.
    ///
    /// This is the identity of a package in the Lock: it does not change when
    /// a new version is installed and keeps the registry spelling the package
    /// author used.
    pub fn source(&self) -> String {
        if !self.explicit_identifier {
            return self.original.clone();
        }
        self.original
            .strip_suffix(self.identifier.as_str())
            .unwrap_or(&self.original)
            .trim_end_matches([':', '@'])
            .to_string()
    }

    /// Same repository, different tag.
    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{tag}", self.source())
    }
}

impl FromStr for ImageReference {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
