//! Per-role accounting.

use std::collections::BTreeMap;

use flock_spec::keys;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderRole;

/// The counters the reconciler steers by, one per role.
///
/// All mutation happens under the engine lock; the arithmetic here never
/// looks outside its own fields. `actual` counts allocated-and-not-yet-
/// completed containers (a superset of live); `releasing` counts the subset
/// of `actual` we have asked to give back.
#[derive(Debug, Clone)]
pub struct RoleStatus {
    name: String,
    key: u32,
    placement_policy: u32,

    desired: i64,
    requested: i64,
    actual: i64,
    releasing: i64,

    started: i64,
    completed: i64,
    failed: i64,
    start_failed: i64,

    exclude_from_flexing: bool,
    last_failure_message: Option<String>,
}

impl RoleStatus {
    pub fn new(role: &ProviderRole) -> Self {
        Self {
            name: role.name.clone(),
            key: role.id,
            placement_policy: role.placement_policy,
            desired: 0,
            requested: 0,
            actual: 0,
            releasing: 0,
            started: 0,
            completed: 0,
            failed: 0,
            start_failed: 0,
            exclude_from_flexing: false,
            last_failure_message: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The role id; doubles as the container-request priority.
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn placement_policy(&self) -> u32 {
        self.placement_policy
    }

    pub fn desired(&self) -> i64 {
        self.desired
    }

    pub fn set_desired(&mut self, desired: i64) {
        self.desired = desired;
    }

    pub fn requested(&self) -> i64 {
        self.requested
    }

    pub fn inc_requested(&mut self) {
        self.requested += 1;
    }

    /// Decrements the outstanding-request count. Saturates at zero: an
    /// allocation above what was asked for (a surplus) must not drive the
    /// count negative and provoke a phantom re-request on the next review.
    pub fn dec_requested(&mut self) {
        if self.requested > 0 {
            self.requested -= 1;
        }
    }

    pub fn actual(&self) -> i64 {
        self.actual
    }

    pub fn inc_actual(&mut self) -> i64 {
        self.actual += 1;
        self.actual
    }

    pub fn dec_actual(&mut self) -> i64 {
        self.actual -= 1;
        self.actual
    }

    pub fn releasing(&self) -> i64 {
        self.releasing
    }

    pub fn inc_releasing(&mut self) {
        self.releasing += 1;
    }

    pub fn dec_releasing(&mut self) {
        self.releasing -= 1;
    }

    pub fn started(&self) -> i64 {
        self.started
    }

    pub fn inc_started(&mut self) {
        self.started += 1;
    }

    pub fn completed(&self) -> i64 {
        self.completed
    }

    pub fn inc_completed(&mut self) {
        self.completed += 1;
    }

    pub fn failed(&self) -> i64 {
        self.failed
    }

    pub fn start_failed(&self) -> i64 {
        self.start_failed
    }

    pub fn inc_start_failed(&mut self) {
        self.start_failed += 1;
    }

    pub fn exclude_from_flexing(&self) -> bool {
        self.exclude_from_flexing
    }

    pub fn set_exclude_from_flexing(&mut self, exclude: bool) {
        self.exclude_from_flexing = exclude;
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.last_failure_message.as_deref()
    }

    /// Records one failure, keeping the most recent message.
    pub fn note_failed(&mut self, message: Option<String>) {
        self.failed += 1;
        if message.is_some() {
            self.last_failure_message = message;
        }
    }

    /// How many more instances to ask for (positive) or release (negative).
    ///
    /// Containers already queued for release still count in `actual`, so
    /// they are added back via `releasing`: a drop in `desired` is acted on
    /// once, not once per review pass.
    pub fn delta(&self) -> i64 {
        self.desired - (self.actual + self.requested - self.releasing)
    }

    /// A stable view for the published description.
    pub fn snapshot(&self) -> RoleStatusSnapshot {
        RoleStatusSnapshot {
            name: self.name.clone(),
            key: self.key,
            desired: self.desired,
            requested: self.requested,
            actual: self.actual,
            releasing: self.releasing,
            started: self.started,
            completed: self.completed,
            failed: self.failed,
            start_failed: self.start_failed,
            last_failure_message: self.last_failure_message.clone(),
        }
    }

    /// The per-role statistics map for the published description.
    pub fn build_statistics(&self) -> BTreeMap<String, i64> {
        let mut stats = BTreeMap::new();
        stats.insert(keys::STAT_DESIRED.to_string(), self.desired);
        stats.insert(keys::STAT_ACTUAL.to_string(), self.actual);
        stats.insert(keys::STAT_REQUESTED.to_string(), self.requested);
        stats.insert(keys::STAT_RELEASING.to_string(), self.releasing);
        stats.insert(keys::STAT_STARTED.to_string(), self.started);
        stats.insert(keys::STAT_COMPLETED.to_string(), self.completed);
        stats.insert(keys::STAT_FAILED.to_string(), self.failed);
        stats.insert(keys::STAT_START_FAILED.to_string(), self.start_failed);
        stats
    }
}

impl std::fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]: desired={} actual={} requested={} releasing={} \
             started={} completed={} failed={} start_failed={}",
            self.name,
            self.key,
            self.desired,
            self.actual,
            self.requested,
            self.releasing,
            self.started,
            self.completed,
            self.failed,
            self.start_failed
        )
    }
}

/// Owned snapshot of one role's counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleStatusSnapshot {
    pub name: String,
    pub key: u32,
    pub desired: i64,
    pub requested: i64,
    pub actual: i64,
    pub releasing: i64,
    pub started: i64,
    pub completed: i64,
    pub failed: i64,
    pub start_failed: i64,
    pub last_failure_message: Option<String>,
}
