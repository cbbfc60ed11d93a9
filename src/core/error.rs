//! Error handling for ctlpkg
//!
//! This module provides the typed error taxonomy of the package engine and the
//! user-facing rendering used by the command-line binary. The design follows
//! two principles:
//! 1. **Strongly-typed errors** ([`PkgError`]) for failures callers branch on
//! 2. **User-friendly messages** ([`ErrorContext`]) with suggestions for CLI users
//!
//! Reconcilers return [`anyhow::Result`] and wrap every failure with a static
//! cause string at each boundary, so a [`PkgError`] is usually found somewhere
//! in the error chain rather than at its head. [`user_friendly_error`] walks
//! the chain to find it.
//!
//! # Error Categories
//!
//! - **Structural**: [`PkgError::CircularDependency`], [`PkgError::NodeNotFound`]
//! - **Content**: [`PkgError::InvalidConstraint`], [`PkgError::InvalidReference`],
//!   [`PkgError::Parse`], [`PkgError::Lint`], [`PkgError::UnsupportedPackageType`]
//! - **Resolution**: [`PkgError::NoValidVersion`], [`PkgError::MissingDependencies`],
//!   [`PkgError::IncompatibleDependencies`]
//! - **Infrastructure**: [`PkgError::Registry`], [`PkgError::Timeout`], [`PkgError::Io`]

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Failure modes of the package engine.
#[derive(Error, Debug)]
pub enum PkgError {
    /// A node of the dependency graph is reachable from itself.
    #[error("Circular dependency detected: {chain}")]
    CircularDependency {
        /// Cycle path rendered as `a → b → a`
        chain: String,
    },

    /// A lookup named a node that is not part of the dependency graph.
    #[error("node {identifier} does not exist in the dependency graph")]
    NodeNotFound {
        /// Identifier that was looked up
        identifier: String,
    },

    /// A node was given a neighbor of a kind it cannot depend on.
    #[error("node {identifier} cannot take {neighbor} as a neighbor")]
    InvalidNeighbor {
        /// Node receiving the neighbor
        identifier: String,
        /// Rejected neighbor
        neighbor: String,
    },

    /// A semantic version constraint could not be parsed.
    #[error("invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint {
        /// The constraint as written
        constraint: String,
        /// Parser diagnostic
        reason: String,
    },

    /// A package image reference could not be parsed.
    #[error("invalid package reference '{reference}': {reason}")]
    InvalidReference {
        /// The reference as written
        reference: String,
        /// Parser diagnostic
        reason: String,
    },

    /// No registry tag satisfies a dependency constraint.
    #[error("cannot find a version of {package} satisfying '{constraints}'")]
    NoValidVersion {
        /// Dependency package reference
        package: String,
        /// Constraint that could not be met
        constraints: String,
    },

    /// A dependency names a package type this installation cannot create.
    #[error("unsupported package type '{package_type}'")]
    UnsupportedPackageType {
        /// The declared type
        package_type: String,
    },

    /// Dependencies declared by a package are not installed yet.
    #[error("missing package dependencies: {}", .missing.join(", "))]
    MissingDependencies {
        /// Identifiers of the missing packages
        missing: Vec<String>,
    },

    /// Installed dependencies do not satisfy the declared constraints.
    #[error("incompatible package dependencies: {}", .incompatible.join(", "))]
    IncompatibleDependencies {
        /// `package (installed version, wanted constraint)` descriptions
        incompatible: Vec<String>,
    },

    /// The package stream could not be parsed into a bundle.
    #[error("cannot parse package stream: {reason}")]
    Parse {
        /// Parser diagnostic
        reason: String,
    },

    /// The parsed bundle failed linting.
    #[error("package failed lint: {reason}")]
    Lint {
        /// Linter diagnostic
        reason: String,
    },

    /// A registry request failed.
    #[error("registry request to {url} failed: {reason}")]
    Registry {
        /// Request URL
        url: String,
        /// Transport or status diagnostic
        reason: String,
    },

    /// A reconcile pass exceeded its wall-clock budget.
    #[error("reconcile of {key} timed out after {seconds}s")]
    Timeout {
        /// Record key being reconciled
        key: String,
        /// Budget in seconds
        seconds: u64,
    },

    /// The configuration file is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// What is wrong
        message: String,
    },

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// User-facing rendering of an error, with optional details and a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    /// Headline error message
    pub message: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with just a headline.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    ///
    /// Suggestions are displayed in green in the terminal to draw attention.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error, displayed in yellow.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// The error chain is walked outermost first; the first recognised error type
/// decides the suggestion. The headline always carries the full chain so the
/// static causes added by `.context()` remain visible.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let headline = format!("{error:#}");

    for cause in error.chain() {
        if let Some(pkg_error) = cause.downcast_ref::<PkgError>() {
            return describe_pkg_error(pkg_error, headline);
        }

        if let Some(store_error) = cause.downcast_ref::<StoreError>() {
            return match store_error {
                StoreError::NotFound {
                    ..
                } => ErrorContext::new(headline)
                    .with_suggestion("Check that the record exists in the records directory"),
                StoreError::Conflict {
                    ..
                } => ErrorContext::new(headline)
                    .with_details("The record was modified concurrently; the write will be retried"),
                _ => ErrorContext::new(headline),
            };
        }

        if let Some(toml_error) = cause.downcast_ref::<toml::de::Error>() {
            return ErrorContext::new(headline)
                .with_details(toml_error.message().to_string())
                .with_suggestion("Check the configuration file syntax");
        }

        if let Some(io_error) = cause.downcast_ref::<std::io::Error>() {
            match io_error.kind() {
                std::io::ErrorKind::NotFound => {
                    return ErrorContext::new(headline).with_suggestion(
                        "Check that the file or directory exists and the path is correct",
                    );
                }
                std::io::ErrorKind::PermissionDenied => {
                    return ErrorContext::new(headline)
                        .with_suggestion("Check file ownership and permissions");
                }
                _ => {}
            }
        }
    }

    ErrorContext::new(headline)
}

fn describe_pkg_error(error: &PkgError, headline: String) -> ErrorContext {
    match error {
        PkgError::CircularDependency {
            ..
        } => ErrorContext::new(headline)
            .with_details("Packages in the lock depend on each other in a loop")
            .with_suggestion("Remove one of the packages in the cycle from the lock"),
        PkgError::InvalidConstraint {
            ..
        } => ErrorContext::new(headline)
            .with_suggestion("Use constraints such as '>=1.0.0 <2.0.0', '^1.2.0' or '~1.4'"),
        PkgError::InvalidReference {
            ..
        } => ErrorContext::new(headline)
            .with_suggestion("Use references of the form 'registry/org/repo:tag'"),
        PkgError::Lint {
            ..
        }
        | PkgError::Parse {
            ..
        } => ErrorContext::new(headline)
            .with_details("The package stream must contain exactly one meta document")
            .with_suggestion("Rebuild the package image with a corrected package.yaml"),
        PkgError::Registry {
            ..
        } => ErrorContext::new(headline)
            .with_suggestion("Check registry connectivity and the configured pull credentials"),
        PkgError::Config {
            ..
        } => ErrorContext::new(headline).with_suggestion("Check the configuration file"),
        _ => ErrorContext::new(headline),
    }
}
