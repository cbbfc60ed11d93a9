//! ctlpkg - package lifecycle and dependency resolution for a declarative
//! control plane
//!
//! Packages are OCI images carrying a YAML package stream: one meta document
//! describing the package and the custom resource definitions it installs.
//! ctlpkg turns user intent (a `Provider` or `Intent` record naming an image)
//! into installed, ownership-tracked content, and keeps the dependencies
//! between packages satisfied.
//!
//! # Architecture Overview
//!
//! Three controllers cooperate over one record store:
//!
//! - The **package manager** ([`manager`]) resolves a package's image to a
//!   revision name and keeps a numbered history of revisions, exactly one of
//!   them current and at most one active.
//! - The **revision reconciler** ([`revision`]) reads a revision's package
//!   stream, lints it, records the revision in the Lock, takes control of
//!   the packaged objects and stands up the packaged controller.
//! - The **resolver** ([`resolver`]) builds a dependency graph from the Lock
//!   and creates a package for the first dependency nobody installed yet.
//!
//! Nothing calls anything else directly: every controller reacts to record
//! changes, so the three converge through the store.
//!
//! # Core Modules
//!
//! ## Records and storage
//! - [`api`] - Record types: packages, revisions, the Lock, package meta
//! - [`store`] - Record store with watch stream, owner references and
//!   finalizers, plus an in-memory implementation
//!
//! ## Engine
//! - [`controller`] - Work queue and controller runtime
//! - [`manager`] - Package to revision reconciliation
//! - [`revision`] - Revision installation, hooks and dependency checks
//! - [`resolver`] - Missing dependency resolution
//! - [`engine`] - Wiring of all controllers over one store
//!
//! ## Packages
//! - [`pkg`] - Image references, registry access, cache, parser and linter
//! - [`dag`] - Dependency graph with cycle detection
//! - [`version`] - Tag parsing and version constraints
//!
//! ## Supporting Modules
//! - [`cli`] - Command-line interface
//! - [`config`] - TOML configuration of the `run` command
//! - [`constants`] - Timers, labels and other shared constants
//! - [`core`] - Error types and user-facing error rendering
//! - [`utils`] - Retry backoff
//!
//! # Record Example
//!
//! ```yaml
//! apiVersion: pkg.ctlpkg.io/v1
//! kind: Provider
//! metadata:
//!   name: prov-srl
//! spec:
//!   package: ghcr.io/example/prov-srl:v0.3.1
//!   revisionHistoryLimit: 2
//!   packagePullPolicy: IfNotPresent
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod core;
pub mod dag;
pub mod engine;
pub mod manager;
pub mod pkg;
pub mod resolver;
pub mod revision;
pub mod store;
pub mod utils;
pub mod version;

// Test utilities (only compiled for tests or with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
