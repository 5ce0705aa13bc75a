use std::path::PathBuf;

use anyhow::Result;

/// Process-level settings, read from `FLOCK_*` environment variables.
///
/// Behavioural options (failure thresholds, per-role resources) live in
/// the cluster spec document, not here.
#[derive(Debug, Clone)]
pub struct Config {
    pub spec_path: PathBuf,
    pub history_dir: PathBuf,
    pub review_interval_secs: u64,
    pub status_interval_secs: u64,
    pub container_max_memory_mb: u32,
    pub container_max_cores: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let spec_path = std::env::var("FLOCK_SPEC_PATH")
            .unwrap_or_else(|_| "cluster.json".to_string())
            .into();

        let history_dir = std::env::var("FLOCK_HISTORY_DIR")
            .unwrap_or_else(|_| "/var/lib/flock/history".to_string())
            .into();

        let review_interval_secs = std::env::var("FLOCK_REVIEW_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let status_interval_secs = std::env::var("FLOCK_STATUS_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let container_max_memory_mb = std::env::var("FLOCK_CONTAINER_MAX_MEMORY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8192);

        let container_max_cores = std::env::var("FLOCK_CONTAINER_MAX_CORES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(32);

        Ok(Self {
            spec_path,
            history_dir,
            review_interval_secs,
            status_interval_secs,
            container_max_memory_mb,
            container_max_cores,
        })
    }
}
