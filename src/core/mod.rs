//! Core types for ctlpkg
//!
//! This module holds the error taxonomy shared by every component:
//! - [`PkgError`] - Enumerated failure modes of the package engine
//! - [`ErrorContext`] - User-friendly error wrapper with suggestions and details
//! - [`user_friendly_error`] - Convert any error to the user-friendly format

pub mod error;

pub use error::{ErrorContext, PkgError, user_friendly_error};
