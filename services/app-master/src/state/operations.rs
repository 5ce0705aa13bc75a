//! Resource-manager operations as data.
//!
//! The engine never talks to the cluster; it returns batches of
//! [`RmOperation`] values and the driver applies them. This keeps every
//! engine entry point free of I/O and makes review passes trivially
//! testable.

use flock_model::{Container, ContainerId, ContainerRequest};
use serde::{Deserialize, Serialize};

use super::role_instance::RoleInstance;

/// An intended side effect on the resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RmOperation {
    /// Ask for one more container.
    ContainerRequest(ContainerRequest),

    /// Give a container back.
    ContainerRelease(ContainerId),
}

/// An allocated container bound to the role that asked for it.
///
/// The driver turns each assignment into a launch: it builds the role
/// instance (command, environment) and submits the container start.
#[derive(Debug, Clone)]
pub struct ContainerAssignment {
    pub container: Container,
    pub role_name: String,
    pub role_id: u32,
}

/// Outcome of one container-completion event.
#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    /// The completion was a surplus allocation being purged.
    pub surplus: bool,

    /// The completion was an unrequested exit, a crash.
    pub failed: bool,

    /// The instance that completed, when it was known.
    pub instance: Option<RoleInstance>,
}
