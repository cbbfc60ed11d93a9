//! Command-line interface for ctlpkg.
//!
//! # Available Commands
//!
//! - `run` - Seed an in-memory store from a directory of records and run the
//!   package, revision and resolver controllers until Ctrl-C
//! - `lint` - Parse and lint a package stream file
//!
//! # Usage
//! ```bash
//! # Run against a records directory with a configuration file
//! ctlpkg --config ctlpkg.toml run --records ./records
//!
//! # Check a package before publishing it
//! ctlpkg lint package.yaml --kind provider
//! ```
//!
//! # Logging
//!
//! `RUST_LOG` wins when set. Otherwise `--verbose` selects `debug`, `--quiet`
//! selects `error`, and the configuration's `log_level` (default `info`)
//! applies.

mod lint;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use lint::{LintCommand, OutputFormat, PackageKind};
pub use run::{RunCommand, load_records};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter forced by `--verbose`/`--quiet`.
    pub log_level: Option<String>,

    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Install the global tracing subscriber.
    ///
    /// `fallback` is used when neither `RUST_LOG` nor a flag picks a level.
    pub fn init_logging(&self, fallback: Option<&str>) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            let level = self
                .log_level
                .as_deref()
                .or(fallback)
                .unwrap_or(DEFAULT_LOG_LEVEL);
            EnvFilter::new(level)
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

#[derive(Parser)]
#[command(
    name = "ctlpkg",
    about = "Package manager for a declarative control plane",
    version,
    long_about = "ctlpkg installs Provider and Intent packages from OCI registries, \
                  keeps a numbered history of revisions per package and resolves \
                  missing dependencies through a shared lock."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Log errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "CTLPKG_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controllers over a directory of records
    Run(RunCommand),

    /// Parse and lint a package stream
    Lint(LintCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        match self.command {
            Commands::Run(cmd) => cmd.execute(&config).await,
            Commands::Lint(cmd) => cmd.execute(&config).await,
        }
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }
}
