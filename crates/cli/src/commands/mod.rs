//! Subcommand implementations

pub mod config;
pub mod doctor;
pub mod fetch;
pub mod health;
pub mod serve;

use anyhow::{Context, Result, bail};
use news_pulse_adapters::factory::AdapterRegistry;
use news_pulse_adapters::snapshot::{
    InMemorySnapshotStore, JsonFileSnapshotStore, SqliteSnapshotStore,
};
use news_pulse_domain::usecases::NewsService;
use news_pulse_domain::{SnapshotStore, SystemClock};
use std::sync::Arc;

use crate::config::AppConfig;

/// Open the configured warm-start store; `none` disables persistence
pub(crate) async fn open_snapshot_store(
    config: &AppConfig,
) -> Result<Option<Arc<dyn SnapshotStore>>> {
    let path = &config.general.snapshot_path;
    let store: Arc<dyn SnapshotStore> = match config.general.snapshot_backend.trim() {
        "none" => return Ok(None),
        "json" => Arc::new(JsonFileSnapshotStore::new(path)),
        "sqlite" => Arc::new(
            SqliteSnapshotStore::new(path)
                .await
                .with_context(|| format!("Failed to open snapshot database: {}", path.display()))?,
        ),
        "memory" => Arc::new(InMemorySnapshotStore::new()),
        other => bail!("Unknown snapshot backend: {}", other),
    };
    Ok(Some(store))
}

/// Build the service from configuration and restore the last snapshot
pub(crate) async fn build_service(config: &AppConfig) -> Result<NewsService<SystemClock>> {
    let pipeline = config
        .pipeline_config()
        .context("Invalid pipeline configuration")?;
    let descriptors = config
        .source_descriptors()
        .context("Invalid source configuration")?;
    if descriptors.is_empty() {
        bail!("No sources configured; add at least one [sources.<name>] table");
    }

    let adapters = AdapterRegistry::with_defaults()
        .build_all(&descriptors)
        .context("Failed to build adapters")?;
    let snapshots = open_snapshot_store(config).await?;

    let service = NewsService::new(adapters, snapshots, Arc::new(SystemClock), pipeline);
    service.warm_start().await;
    Ok(service)
}
