//! Record model of the package engine.
//!
//! - [`Package`] - user intent: install this image
//! - [`PackageRevision`] - one immutable, numbered snapshot of a package's image
//! - [`Lock`] - singleton ledger of installed packages and their dependencies
//! - [`PackageMeta`] - the meta document inside a package stream
//!
//! Field names serialize exactly as stored records expect (`camelCase` for
//! records, `kebab-case` inside the meta document's pod spec).

pub mod condition;
pub mod lock;
pub mod meta;
pub mod meta_pkg;
pub mod package;
pub mod revision;

pub use condition::{Condition, ConditionKind, ConditionReason, ConditionStatus, ConditionedStatus};
pub use lock::{Dependency, LOCK_KIND, Lock, LockNode, LockPackage};
pub use meta::{
    DynamicObject, ObjectKey, ObjectMeta, OwnerReference, Reference, Resource, TypedReference,
};
pub use meta_pkg::{
    Container, ContainerSpec, CoreConstraints, DeploymentType, Extras, MetaSpec, PackageMeta,
    PodSpec, PolicyRule,
};
pub use package::{
    ActivationPolicy, Package, PackageSpec, PackageStatus, PackageType, PullPolicy, RevisionKind,
};
pub use revision::{DesiredState, PackageRevision, RevisionSpec, RevisionStatus};
