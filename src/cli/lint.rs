//! `ctlpkg lint`: check a package stream before publishing it.

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs;

use super::CliConfig;
use crate::api::PackageType;
use crate::core::PkgError;
use crate::pkg::{Linter, PackageLinter, PackageParser, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PackageKind {
    Provider,
    Intent,
}

impl From<PackageKind> for PackageType {
    fn from(kind: PackageKind) -> Self {
        match kind {
            PackageKind::Provider => Self::Provider,
            PackageKind::Intent => Self::Intent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct LintCommand {
    /// Package stream file (`package.yaml`)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Package type the stream must describe
    #[arg(long, value_enum, default_value = "provider")]
    pub kind: PackageKind,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct LintReport {
    valid: bool,
    kind: String,
    name: Option<String>,
    objects: usize,
    errors: Vec<String>,
}

impl LintCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        cli.init_logging(Some("warn"));

        let stream = fs::read_to_string(&self.file)
            .await
            .with_context(|| format!("Failed to read package {}", self.file.display()))?;
        let package_type = PackageType::from(self.kind);
        let report = lint_stream(&stream, package_type);

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text if report.valid => println!(
                "{} {} is a valid {} package ({} objects)",
                "✓".green(),
                self.file.display(),
                report.kind,
                report.objects
            ),
            OutputFormat::Text => {
                for error in &report.errors {
                    println!("{} {error}", "✗".red());
                }
            }
        }

        if !report.valid {
            bail!(PkgError::Lint {
                reason: format!("{} is not a valid {package_type} package", self.file.display()),
            });
        }
        Ok(())
    }
}

fn lint_stream(stream: &str, package_type: PackageType) -> LintReport {
    let mut report = LintReport {
        valid: false,
        kind: package_type.to_string(),
        name: None,
        objects: 0,
        errors: Vec::new(),
    };

    let bundle = match PackageParser::new().parse(stream) {
        Ok(bundle) => bundle,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        }
    };
    report.objects = bundle.objects.len();
    report.name = bundle.single_meta().map(|m| m.metadata.name.clone());

    match PackageLinter::for_type(package_type).lint(&bundle) {
        Ok(()) => report.valid = true,
        Err(e) => report.errors.push(e.to_string()),
    }
    report
}
