//! Configuration for the ctlpkg manager process.
//!
//! See [`ManagerConfig`] for the file format and defaults.

mod manager;

pub use manager::{Credentials, ManagerConfig, PackagesConfig, RegistryConfig, Timers};
