//! Package reconciler.
//!
//! A Package names a package image. Each distinct image it resolves to becomes
//! a numbered, content-addressed revision owned by the Package. The reconciler
//! keeps exactly one revision active (unless activation is manual), collects
//! revisions beyond the history limit one per pass, and mirrors the health of
//! the current revision onto the Package.
//!
//! Revision names come from a [`Revisioner`]:
//!
//! | pull policy    | revision name                                   |
//! |----------------|-------------------------------------------------|
//! | `Never`        | hash of the source string, never re-resolved    |
//! | `IfNotPresent` | current revision while the source is unchanged  |
//! | `Always`       | manifest digest from the registry, every pass   |

mod reconciler;
mod revisioner;

pub use reconciler::{ManagerOptions, PackageReconciler};
pub use revisioner::{NopRevisioner, PackageRevisioner, Revisioner};
