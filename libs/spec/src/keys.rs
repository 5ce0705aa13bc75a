//! Option keys, info keys, statistics keys and their defaults.
//!
//! Everything user-authored lives in the spec document's string maps; these
//! constants are the only place the key strings are spelled out.

/// Reserved role name for the application master's own instance.
pub const ROLE_AM: &str = "am";

// ---------------------------------------------------------------------------
// Cluster-level options
// ---------------------------------------------------------------------------

/// Cumulative per-role failure count that triggers fatal teardown.
pub const OPT_CONTAINER_FAILURE_THRESHOLD: &str = "container_failure_threshold";
pub const DEF_CONTAINER_FAILURE_THRESHOLD: u32 = 10;

/// Seconds below which a start-to-crash also counts as a start failure.
pub const OPT_CONTAINER_FAILURE_SHORT_LIFE: &str = "container_failure_short_life";
pub const DEF_CONTAINER_FAILURE_SHORT_LIFE_SECS: u64 = 60;

/// Base URL of the cluster's log server, used to decorate failure messages.
pub const OPT_LOG_SERVER_URL: &str = "log_server_url";

// ---------------------------------------------------------------------------
// Per-role options
// ---------------------------------------------------------------------------

/// Desired instance count.
pub const ROLE_INSTANCES: &str = "role_instances";

/// Request priority; mandatory for roles that appear only in the spec.
pub const ROLE_PRIORITY: &str = "role_priority";

/// Placement hint consumed by role history.
pub const ROLE_PLACEMENT_POLICY: &str = "role_placement_policy";

/// Container memory request in MB, or the literal `"max"`.
pub const ROLE_YARN_MEMORY: &str = "yarn_memory";
pub const DEF_YARN_MEMORY: u32 = 256;

/// Container core request, or the literal `"max"`.
pub const ROLE_YARN_CORES: &str = "yarn_cores";
pub const DEF_YARN_CORES: u32 = 1;

/// JVM heap for the launched process; opaque to the engine.
pub const ROLE_JVM_HEAP: &str = "jvm_heap";

/// The literal that substitutes the cluster-reported container maximum.
pub const VAL_MAX: &str = "max";

// Observed per-role counters written back into the description's role maps.
pub const ROLE_ACTUAL_INSTANCES: &str = "role_actual_instances";
pub const ROLE_REQUESTED_INSTANCES: &str = "role_requested_instances";
pub const ROLE_RELEASING_INSTANCES: &str = "role_releasing_instances";
pub const ROLE_FAILED_INSTANCES: &str = "role_failed_instances";
pub const ROLE_FAILED_STARTING_INSTANCES: &str = "role_failed_starting_instances";

// ---------------------------------------------------------------------------
// Info keys on the published description
// ---------------------------------------------------------------------------

pub const INFO_CREATE_TIME_MILLIS: &str = "create_time_millis";
pub const INFO_CREATE_TIME: &str = "create_time";
pub const INFO_LIVE_TIME_MILLIS: &str = "live_time_millis";
pub const INFO_LIVE_TIME: &str = "live_time";
pub const INFO_STATUS_TIME_MILLIS: &str = "status_time_millis";
pub const INFO_STATUS_TIME: &str = "status_time";
pub const INFO_AM_RESTART_COUNT: &str = "am_restart_count";
pub const INFO_CONTAINER_MAX_MEMORY: &str = "container_max_memory";
pub const INFO_CONTAINER_MAX_CORES: &str = "container_max_cores";

// ---------------------------------------------------------------------------
// Statistics keys
// ---------------------------------------------------------------------------

// Per-role statistics.
pub const STAT_DESIRED: &str = "desired";
pub const STAT_ACTUAL: &str = "actual";
pub const STAT_REQUESTED: &str = "requested";
pub const STAT_RELEASING: &str = "releasing";
pub const STAT_STARTED: &str = "started";
pub const STAT_COMPLETED: &str = "completed";
pub const STAT_FAILED: &str = "failed";
pub const STAT_START_FAILED: &str = "start_failed";

// Cluster-wide statistics, published under [`ROLE_AM`].
pub const STAT_CONTAINERS_COMPLETED: &str = "containers_completed";
pub const STAT_CONTAINERS_FAILED: &str = "containers_failed";
pub const STAT_CONTAINERS_LIVE: &str = "containers_live";
pub const STAT_CONTAINERS_STARTED: &str = "containers_started";
pub const STAT_CONTAINERS_START_FAILED: &str = "containers_start_failed";
pub const STAT_CONTAINERS_SURPLUS: &str = "containers_surplus";
pub const STAT_CONTAINERS_UNKNOWN_COMPLETED: &str = "containers_unknown_completed";
