//! Typed identifiers for resource-manager records.
//!
//! Unlike most resource ids in this codebase's ancestry, these are not
//! generated locally: the cluster resource manager mints container ids and
//! node addresses, and we only ever parse and carry them. The newtypes exist
//! so a container id can never be confused with a hostname in a map key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A resource-manager-assigned container identifier.
///
/// Opaque token; the only structure we require is that it is non-empty and
/// printable (no whitespace, no control characters), so it is safe as a map
/// key and in log lines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    /// Parses a container id, rejecting empty or non-printable tokens.
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        if s.is_empty() {
            return Err(ModelError::EmptyId);
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ModelError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContainerId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ContainerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContainerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The address of a cluster node: hostname plus the node-manager port.
///
/// The hostname alone is the placement-memory key; the port disambiguates
/// multiple node managers on one host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` address.
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(ModelError::InvalidNodeAddress(s.to_string()));
        };
        if host.is_empty() {
            return Err(ModelError::InvalidNodeAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ModelError::InvalidNodeAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
