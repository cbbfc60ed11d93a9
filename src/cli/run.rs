//! `ctlpkg run`: serve a records directory until interrupted.

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::CliConfig;
use crate::api::DynamicObject;
use crate::config::ManagerConfig;
use crate::controller::TracingRecorder;
use crate::engine::Engine;
use crate::pkg::{FsCache, NopCache, PackageCache, RegistryFetcher};
use crate::store::{Client, MemoryStore};

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Directory of YAML files (`.yaml`/`.yml`) whose documents seed the store
    #[arg(long, value_name = "DIR")]
    pub records: PathBuf,
}

impl RunCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = ManagerConfig::load_or_default(cli.config_path.as_deref()).await?;
        cli.init_logging(config.log_level.as_deref());

        let client = Client::new(Arc::new(MemoryStore::new()));
        let seeded = load_records(&client, &self.records).await?;
        info!(records = seeded, dir = %self.records.display(), "Seeded store");

        let fetcher = Arc::new(RegistryFetcher::new(config.registry.clone())?);
        let cache: Arc<dyn PackageCache> = match &config.cache_dir {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
                Arc::new(FsCache::new(dir))
            }
            None => Arc::new(NopCache),
        };
        let engine = Engine::new(client, fetcher, cache, Arc::new(TracingRecorder), config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted, shutting down"),
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
            }
            let _ = shutdown_tx.send(true);
        });

        engine.run(shutdown_rx).await
    }
}

/// Create every document of every YAML file in `dir`, in file name order.
///
/// Returns the number of records created.
pub async fn load_records(client: &Client, dir: &Path) -> Result<usize> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read records directory {}", dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")) {
            files.push(path);
        }
    }
    files.sort();

    let mut count = 0;
    for path in files {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for mut record in parse_records(&content).with_context(|| format!("Failed to parse {}", path.display()))? {
            debug!(record = %record.key(), file = %path.display(), "Seeding record");
            client
                .create(&mut record)
                .await
                .with_context(|| format!("Failed to create record from {}", path.display()))?;
            count += 1;
        }
    }
    Ok(count)
}

fn parse_records(content: &str) -> Result<Vec<DynamicObject>> {
    let mut records = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let record: DynamicObject =
            serde_yaml::from_value(value).with_context(|| format!("document {index} is not a record"))?;
        if record.metadata.name.is_empty() {
            bail!("document {index} ({}) has no metadata.name", record.kind);
        }
        records.push(record);
    }
    Ok(records)
}
