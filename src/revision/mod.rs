//! Revision reconciliation: installing the contents of one package revision.
//!
//! A pass reads the package stream through a [`Backend`], parses and lints
//! it, registers the revision in the Lock through a [`DependencyManager`],
//! then takes control of the packaged objects with an [`Establisher`]. The
//! [`Hooks`] run around the establish step and stand up the controller a
//! package ships.
//!
//! | step                 | failure health | retry      |
//! |----------------------|----------------|------------|
//! | backend, parse       | unhealthy      | short wait |
//! | lint, meta count     | unhealthy      | long wait  |
//! | dependencies         | unknown        | short wait |
//! | hooks, establish     | unhealthy      | short wait |
//! | success              | healthy        | long wait  |

mod backend;
mod dependency;
mod establisher;
mod hooks;
mod reconciler;
pub mod render;

pub use backend::{Backend, ImageBackend};
pub use dependency::{DependencyCounts, DependencyManager, PackageDependencyManager};
pub use establisher::{ApiEstablisher, Establisher};
pub use hooks::{Hooks, NopHooks, ProviderHooks};
pub use reconciler::{RevisionOptions, RevisionReconciler};
