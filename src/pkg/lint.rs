//! Package linting.
//!
//! A [`PackageLinter`] is a list of checks at three levels: the whole bundle,
//! each meta document, and each content object. The first failing check stops
//! linting.

use crate::api::{DynamicObject, PackageMeta, PackageType};
use crate::core::PkgError;
use crate::pkg::parser::PackageBundle;
use crate::version::Constraint;

/// Kind of the only content objects a package may carry.
pub const CRD_KIND: &str = "CustomResourceDefinition";

pub type PackageCheck = fn(&PackageBundle) -> Result<(), PkgError>;
pub type MetaCheck = fn(&PackageMeta) -> Result<(), PkgError>;
pub type ObjectCheck = fn(&DynamicObject) -> Result<(), PkgError>;

/// Validates a parsed bundle.
pub trait Linter: Send + Sync {
    fn lint(&self, bundle: &PackageBundle) -> Result<(), PkgError>;
}

#[derive(Debug, Clone, Default)]
pub struct PackageLinter {
    package_checks: Vec<PackageCheck>,
    meta_checks: Vec<MetaCheck>,
    object_checks: Vec<ObjectCheck>,
}

impl PackageLinter {
    pub fn new(
        package_checks: Vec<PackageCheck>,
        meta_checks: Vec<MetaCheck>,
        object_checks: Vec<ObjectCheck>,
    ) -> Self {
        Self {
            package_checks,
            meta_checks,
            object_checks,
        }
    }

    /// Linter for the given package type.
    pub fn for_type(package_type: PackageType) -> Self {
        match package_type {
            PackageType::Provider => provider_linter(),
            PackageType::Intent => intent_linter(),
        }
    }
}

impl Linter for PackageLinter {
    fn lint(&self, bundle: &PackageBundle) -> Result<(), PkgError> {
        for check in &self.package_checks {
            check(bundle)?;
        }
        for meta in &bundle.meta {
            for check in &self.meta_checks {
                check(meta)?;
            }
        }
        for object in &bundle.objects {
            for check in &self.object_checks {
                check(object)?;
            }
        }
        Ok(())
    }
}

/// Lints provider packages.
pub fn provider_linter() -> PackageLinter {
    PackageLinter::new(
        vec![one_meta],
        vec![is_provider, core_constraint_parses],
        vec![is_crd],
    )
}

/// Lints intent packages.
pub fn intent_linter() -> PackageLinter {
    PackageLinter::new(
        vec![one_meta],
        vec![is_intent, core_constraint_parses],
        vec![is_crd],
    )
}

fn lint_error(reason: impl Into<String>) -> PkgError {
    PkgError::Lint {
        reason: reason.into(),
    }
}

fn one_meta(bundle: &PackageBundle) -> Result<(), PkgError> {
    if bundle.meta.len() != 1 {
        return Err(lint_error(format!(
            "not exactly one package meta type (found {})",
            bundle.meta.len()
        )));
    }
    Ok(())
}

fn is_type(meta: &PackageMeta, expected: PackageType) -> Result<(), PkgError> {
    if meta.kind != expected {
        return Err(lint_error(format!(
            "package meta type is {}, expected {expected}",
            meta.kind
        )));
    }
    Ok(())
}

fn is_provider(meta: &PackageMeta) -> Result<(), PkgError> {
    is_type(meta, PackageType::Provider)
}

fn is_intent(meta: &PackageMeta) -> Result<(), PkgError> {
    is_type(meta, PackageType::Intent)
}

fn core_constraint_parses(meta: &PackageMeta) -> Result<(), PkgError> {
    if let Some(core) = &meta.spec.core {
        Constraint::parse(&core.version)
            .map_err(|e| lint_error(format!("core version constraint is invalid: {e}")))?;
    }
    Ok(())
}

fn is_crd(object: &DynamicObject) -> Result<(), PkgError> {
    if object.kind != CRD_KIND {
        return Err(lint_error(format!(
            "object is not a CRD: {} {}",
            object.kind, object.metadata.name
        )));
    }
    Ok(())
}
