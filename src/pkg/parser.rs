//! Package stream parsing.
//!
//! A package stream is a multi-document YAML file. Documents whose API group
//! is [`META_GROUP`] describe the package itself; everything else is content
//! the package installs (custom resource definitions, for the kinds we ship).

use serde::Deserialize;
use tracing::debug;

use crate::api::{DynamicObject, PackageMeta};
use crate::constants::META_GROUP;
use crate::core::PkgError;

/// A parsed package stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageBundle {
    pub meta: Vec<PackageMeta>,
    pub objects: Vec<DynamicObject>,
}

impl PackageBundle {
    /// The package meta, if the stream holds exactly one.
    pub fn single_meta(&self) -> Option<&PackageMeta> {
        match self.meta.as_slice() {
            [meta] => Some(meta),
            _ => None,
        }
    }
}

/// Turns a package stream into a [`PackageBundle`].
pub trait Parser: Send + Sync {
    fn parse(&self, stream: &str) -> Result<PackageBundle, PkgError>;
}

/// Parser for YAML package streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageParser;

impl PackageParser {
    pub fn new() -> Self {
        Self
    }
}

fn is_meta(api_version: &str) -> bool {
    api_version.split('/').next() == Some(META_GROUP)
}

impl Parser for PackageParser {
    fn parse(&self, stream: &str) -> Result<PackageBundle, PkgError> {
        let mut bundle = PackageBundle::default();

        for (index, document) in serde_yaml::Deserializer::from_str(stream).enumerate() {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }

            let kind = value.get("kind").and_then(serde_yaml::Value::as_str);
            if kind.is_none_or(str::is_empty) {
                return Err(PkgError::Parse {
                    reason: format!("document {index} has no kind"),
                });
            }

            let api_version = value.get("apiVersion").and_then(serde_yaml::Value::as_str).unwrap_or("");
            if is_meta(api_version) {
                let meta: PackageMeta = serde_yaml::from_value(value).map_err(|e| PkgError::Parse {
                    reason: format!("document {index} is not a valid package meta: {e}"),
                })?;
                bundle.meta.push(meta);
            } else {
                let object: DynamicObject = serde_yaml::from_value(value).map_err(|e| PkgError::Parse {
                    reason: format!("document {index} is not a valid object: {e}"),
                })?;
                bundle.objects.push(object);
            }
        }

        debug!(meta = bundle.meta.len(), objects = bundle.objects.len(), "Parsed package stream");
        Ok(bundle)
    }
}
