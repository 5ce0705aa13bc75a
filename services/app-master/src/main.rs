//! flock Application Master
//!
//! Loads a cluster specification, builds the state engine, runs one review
//! pass, and logs the resulting operation plan. The resource-manager and
//! node-manager transports are injected by the embedding process via the
//! library's driver seams; this binary exercises the engine end to end
//! against a spec document without dispatching anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flock_app_master::config::Config;
use flock_app_master::providers::{Provider, WorkerPoolProvider};
use flock_app_master::state::{AppState, HistoryStore};
use flock_app_master::SystemClock;
use flock_model::DefaultRecordFactory;
use flock_spec::ClusterSpec;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flock application master");

    let config = Config::from_env()?;
    info!(
        spec_path = %config.spec_path.display(),
        history_dir = %config.history_dir.display(),
        "Configuration loaded"
    );

    let content = std::fs::read_to_string(&config.spec_path)
        .with_context(|| format!("Failed to read spec: {}", config.spec_path.display()))?;
    let spec: ClusterSpec = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse spec: {}", config.spec_path.display()))?;

    let provider = WorkerPoolProvider;
    let history_store = HistoryStore::new(&config.history_dir);

    let mut state = AppState::new(Arc::new(DefaultRecordFactory), Arc::new(SystemClock));
    state.set_container_limits(config.container_max_memory_mb, config.container_max_cores);
    state.build_instance(
        spec,
        BTreeMap::new(),
        provider.roles(),
        &history_store,
        Vec::new(),
    )?;

    let operations = state.review_request_and_release_nodes()?;
    info!(count = operations.len(), "Computed reconciliation plan");
    for operation in &operations {
        let rendered = serde_json::to_string(operation).context("Failed to render operation")?;
        info!(operation = %rendered, "Planned operation");
    }

    let description = state.refresh_cluster_status(None);
    info!(
        cluster = %description.name,
        state = ?description.state,
        progress = state.application_progress_percentage(),
        "Cluster status"
    );

    if let Some(snapshot) = state.take_history_snapshot_if_dirty() {
        history_store.save(&snapshot)?;
    }

    Ok(())
}
