//! The cluster spec and description documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::keys;

/// Lifecycle tag on the published description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    #[default]
    Created,
    Live,
    Destroyed,
}

/// Lifecycle of a single role instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    #[default]
    Requested,
    Submitted,
    Live,
    Destroyed,
}

/// Desired state, authored by the user.
///
/// `roles` maps role name to an option map; `options` holds cluster-wide
/// settings. Both are opaque string maps; only the accessors below
/// interpret values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSpec {
    /// Cluster name, user-facing.
    pub name: String,

    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub roles: BTreeMap<String, BTreeMap<String, String>>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Names of every role in the spec, in document order.
    pub fn role_names(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    /// A role option, if the role and key are present.
    pub fn role_opt(&self, role: &str, key: &str) -> Option<&str> {
        self.roles.get(role).and_then(|m| m.get(key)).map(|s| s.as_str())
    }

    /// A role option that must be present.
    pub fn mandatory_role_opt(&self, role: &str, key: &str) -> Result<&str, ConfigError> {
        self.role_opt(role, key)
            .ok_or_else(|| ConfigError::MissingRoleOption {
                role: role.to_string(),
                key: key.to_string(),
            })
    }

    /// A role option parsed as an integer, with a default when absent.
    pub fn role_opt_u32(&self, role: &str, key: &str, default: u32) -> Result<u32, ConfigError> {
        match self.role_opt(role, key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidRoleOption {
                    role: role.to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                }),
        }
    }

    /// The desired instance count for a role; absent means `default`.
    pub fn desired_instances(&self, role: &str, default: u32) -> Result<u32, ConfigError> {
        self.role_opt_u32(role, keys::ROLE_INSTANCES, default)
    }

    /// A cluster-level option parsed as an integer, with a default.
    pub fn option_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.options.get(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidOption {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
        }
    }

    /// A cluster-level string option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    /// A resource requirement for a role. The literal `"max"` substitutes
    /// the cluster-reported maximum; absent means `default`.
    pub fn resource_requirement(
        &self,
        role: &str,
        key: &str,
        default: u32,
        max: u32,
    ) -> Result<u32, ConfigError> {
        match self.role_opt(role, key) {
            None => Ok(default),
            Some(value) if value.trim().eq_ignore_ascii_case(keys::VAL_MAX) => Ok(max),
            Some(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidRoleOption {
                    role: role.to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                }),
        }
    }

    /// Sets a role option, creating the role map if needed.
    pub fn set_role_opt(
        &mut self,
        role: impl Into<String>,
        key: impl Into<String>,
        value: impl ToString,
    ) {
        self.roles
            .entry(role.into())
            .or_default()
            .insert(key.into(), value.to_string());
    }
}

/// The published view of one live instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterNode {
    pub container_id: String,
    pub role: String,
    pub role_id: u32,
    pub state: InstanceState,
    pub host: String,
    #[serde(default)]
    pub http_address: Option<String>,
    pub create_time: i64,
    pub start_time: i64,
    pub released: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub diagnostics: Option<String>,
    #[serde(default)]
    pub command: String,
}

/// Observed state, published to readers.
///
/// Rebuilt by the engine's status refresh; readers only ever see owned
/// snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterDescription {
    pub name: String,
    pub state: ClusterState,

    /// Millisecond epoch timestamps; zero until stamped.
    pub create_time: i64,
    pub update_time: i64,
    pub status_time: i64,

    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub roles: BTreeMap<String, BTreeMap<String, String>>,

    /// Free-form published facts (timestamps, restart count, limits).
    #[serde(default)]
    pub info: BTreeMap<String, String>,

    /// Role name -> live container ids.
    #[serde(default)]
    pub instances: BTreeMap<String, Vec<String>>,

    /// Role name -> container id -> published node view.
    #[serde(default)]
    pub live: BTreeMap<String, BTreeMap<String, ClusterNode>>,

    /// Role name -> statistic -> value. Cluster-wide statistics are
    /// published under the reserved AM role name.
    #[serde(default)]
    pub statistics: BTreeMap<String, BTreeMap<String, i64>>,
}

impl ClusterDescription {
    /// Seeds a description from a spec: name, options and role maps are
    /// copied, everything observed starts empty.
    pub fn from_spec(spec: &ClusterSpec) -> Self {
        Self {
            name: spec.name.clone(),
            state: ClusterState::Created,
            options: spec.options.clone(),
            roles: spec.roles.clone(),
            ..Self::default()
        }
    }

    pub fn set_info(&mut self, key: impl Into<String>, value: impl ToString) {
        self.info.insert(key.into(), value.to_string());
    }

    pub fn set_role_opt(
        &mut self,
        role: impl Into<String>,
        key: impl Into<String>,
        value: impl ToString,
    ) {
        self.roles
            .entry(role.into())
            .or_default()
            .insert(key.into(), value.to_string());
    }
}
