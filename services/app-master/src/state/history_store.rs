//! Durable storage for the placement memory.
//!
//! One JSON snapshot file per history directory, written atomically
//! (write to temp, rename). Reload is idempotent and storage stays
//! proportional to distinct nodes x roles: the snapshot itself prunes
//! nodes that carry no information. Only the process's own lifetime
//! matters; a version mismatch starts fresh rather than migrating.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::node_instance::NodeInstance;

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "role-history.json";

/// A persistable image of the placement memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub version: u32,

    /// Millisecond epoch when the snapshot was taken.
    pub saved_at: i64,

    /// Hostname -> node record.
    pub nodes: BTreeMap<String, NodeInstance>,
}

impl HistorySnapshot {
    pub fn new(nodes: BTreeMap<String, NodeInstance>, saved_at: i64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            nodes,
        }
    }
}

/// Reads and writes history snapshots in one directory.
pub struct HistoryStore {
    snapshot_path: PathBuf,
}

impl HistoryStore {
    pub fn new(history_dir: impl AsRef<Path>) -> Self {
        Self {
            snapshot_path: history_dir.as_ref().join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Loads the last durable snapshot.
    ///
    /// Returns `None` when there is nothing usable: no file yet, or a file
    /// from an incompatible version. A file that exists but fails to parse
    /// is an error, not a fresh start.
    pub fn load(&self) -> Result<Option<HistorySnapshot>> {
        if !self.snapshot_path.exists() {
            debug!(path = %self.snapshot_path.display(), "No history snapshot, starting fresh");
            return Ok(None);
        }

        let content = fs::read_to_string(&self.snapshot_path).with_context(|| {
            format!(
                "Failed to read history snapshot: {}",
                self.snapshot_path.display()
            )
        })?;

        let snapshot: HistorySnapshot = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse history snapshot: {}",
                self.snapshot_path.display()
            )
        })?;

        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                file_version = snapshot.version,
                current_version = SNAPSHOT_VERSION,
                "History snapshot version mismatch, starting fresh"
            );
            return Ok(None);
        }

        info!(
            path = %self.snapshot_path.display(),
            node_count = snapshot.nodes.len(),
            saved_at = snapshot.saved_at,
            "Loaded role history"
        );
        Ok(Some(snapshot))
    }

    /// Writes a snapshot atomically: temp file, then rename.
    pub fn save(&self, snapshot: &HistorySnapshot) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let tmp_path = self.snapshot_path.with_extension("tmp");
        let content =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize history")?;

        fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &self.snapshot_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                tmp_path.display(),
                self.snapshot_path.display()
            )
        })?;

        debug!(
            path = %self.snapshot_path.display(),
            node_count = snapshot.nodes.len(),
            "Saved role history"
        );
        Ok(())
    }
}
