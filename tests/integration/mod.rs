//! Integration test suite for ctlpkg
//!
//! End-to-end scenarios over an in-memory store: the package, revision and
//! resolver reconcilers are driven pass by pass against a static registry, so
//! every step of an install can be asserted. The `engine` scenario runs the
//! real controllers instead and waits for convergence.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **install**: Package to healthy revision, history and pull policies
//! - **dependencies**: Missing dependencies installed through the Lock
//! - **upgrade**: A new source supersedes the active revision
//! - **deletion**: Package removal tears revisions and the Lock entry down
//! - **engine**: All controllers running concurrently
//! - **cli**: The `ctlpkg` binary

mod common;

mod cli;
mod deletion;
mod dependencies;
mod engine;
mod install;
mod upgrade;
