//! Async driver loops around the engine.
//!
//! The engine is synchronous; this module owns it behind one
//! `tokio::sync::Mutex`, runs the periodic review and status-publish
//! loops, applies the operations the engine emits, and persists placement
//! memory snapshots. All I/O happens here, never under an engine entry
//! point; the lock is only ever held for the synchronous call itself.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use flock_spec::ClusterDescription;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::state::{AppState, HistoryStore, RmOperation};

/// The engine as the driver shares it across tasks.
pub type SharedAppState = Arc<Mutex<AppState>>;

/// Applies engine-emitted operations to the resource manager.
///
/// The production implementation wraps the cluster-manager client; tests
/// and the plan binary use [`RecordingRmHandler`].
#[async_trait]
pub trait RmOperationHandler: Send + Sync {
    async fn execute(&self, operation: RmOperation) -> Result<()>;
}

/// Receives cluster description snapshots.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, description: ClusterDescription) -> Result<()>;
}

/// Collects operations instead of dispatching them.
#[derive(Default)]
pub struct RecordingRmHandler {
    operations: Mutex<Vec<RmOperation>>,
}

impl RecordingRmHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything recorded so far.
    pub async fn take(&self) -> Vec<RmOperation> {
        let mut operations = self.operations.lock().await;
        std::mem::take(&mut *operations)
    }
}

#[async_trait]
impl RmOperationHandler for RecordingRmHandler {
    async fn execute(&self, operation: RmOperation) -> Result<()> {
        self.operations.lock().await.push(operation);
        Ok(())
    }
}

/// Logs a one-line summary of each published snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatusPublisher;

#[async_trait]
impl StatusPublisher for LoggingStatusPublisher {
    async fn publish(&self, description: ClusterDescription) -> Result<()> {
        let live: usize = description.instances.values().map(|ids| ids.len()).sum();
        info!(
            cluster = %description.name,
            state = ?description.state,
            live_containers = live,
            "Cluster status"
        );
        Ok(())
    }
}

/// Dispatches a batch of operations in order.
pub async fn apply_operations(
    handler: &dyn RmOperationHandler,
    operations: Vec<RmOperation>,
) -> Result<usize> {
    let count = operations.len();
    for operation in operations {
        handler.execute(operation).await?;
    }
    Ok(count)
}

/// Runs the periodic review pass until shutdown is signalled.
///
/// A fatal engine error (teardown trigger) releases every container,
/// dispatches the releases, and returns the error; internal-state refusals
/// are logged and the loop carries on.
pub async fn run_review_loop(
    state: SharedAppState,
    handler: Arc<dyn RmOperationHandler>,
    history_store: Arc<HistoryStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    info!(interval_secs = interval.as_secs(), "Starting review loop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Review loop shutting down");
                    return Ok(());
                }
                continue;
            }
        }

        let review = {
            let mut engine = state.lock().await;
            engine.review_request_and_release_nodes()
        };

        match review {
            Ok(operations) => {
                if !operations.is_empty() {
                    debug!(count = operations.len(), "Dispatching operations");
                }
                apply_operations(handler.as_ref(), operations).await?;
            }
            Err(e) if e.is_fatal() => {
                let (releases, diagnostics) = {
                    let mut engine = state.lock().await;
                    (
                        engine.release_all_containers(),
                        engine.container_diagnostics(),
                    )
                };
                error!(error = %e, diagnostics = %diagnostics, "Cluster teardown triggered");
                apply_operations(handler.as_ref(), releases).await?;
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "Review pass refused");
            }
        }

        persist_history(&state, &history_store).await;
    }
}

/// Runs the periodic status-publish pass until shutdown is signalled.
pub async fn run_status_loop(
    state: SharedAppState,
    publisher: Arc<dyn StatusPublisher>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    info!(interval_secs = interval.as_secs(), "Starting status loop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Status loop shutting down");
                    return Ok(());
                }
                continue;
            }
        }

        let description = {
            let mut engine = state.lock().await;
            engine.refresh_cluster_status(None)
        };
        if let Err(e) = publisher.publish(description).await {
            warn!(error = %e, "Status publish failed");
        }
    }
}

/// Takes a placement-memory snapshot under the lock, writes it outside.
async fn persist_history(state: &SharedAppState, history_store: &HistoryStore) {
    let snapshot = {
        let mut engine = state.lock().await;
        engine.take_history_snapshot_if_dirty()
    };
    if let Some(snapshot) = snapshot {
        if let Err(e) = history_store.save(&snapshot) {
            warn!(error = %e, "Failed to persist role history");
        }
    }
}
