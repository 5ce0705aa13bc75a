//! Resource-manager record types.

use serde::{Deserialize, Serialize};

use crate::ids::{ContainerId, NodeId};

/// A container request priority.
///
/// The raw integer also carries the role id of the request; see
/// [`crate::priority`] for the packing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// A resource capability: memory plus virtual cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Resource {
    /// Memory in megabytes.
    pub memory_mb: u32,

    /// Virtual core count.
    pub virtual_cores: u32,
}

impl Resource {
    pub fn new(memory_mb: u32, virtual_cores: u32) -> Self {
        Self {
            memory_mb,
            virtual_cores,
        }
    }
}

/// An allocation granted by the resource manager: a slot of (memory, cores)
/// on a specific node, into which a role's process is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Resource-manager-assigned id.
    pub id: ContainerId,

    /// The node the allocation landed on.
    pub node: NodeId,

    /// HTTP address of the node manager, when reported.
    #[serde(default)]
    pub http_address: Option<String>,

    /// Granted capability.
    pub resource: Resource,

    /// The priority the allocation was granted at; carries the role id.
    pub priority: Priority,
}

/// Terminal status of a container, delivered by the resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub container_id: ContainerId,

    /// Process exit status; zero for clean exits.
    pub exit_status: i32,

    /// Diagnostics string from the node manager, often empty.
    #[serde(default)]
    pub diagnostics: String,
}

impl ContainerStatus {
    pub fn new(container_id: ContainerId, exit_status: i32, diagnostics: impl Into<String>) -> Self {
        Self {
            container_id,
            exit_status,
            diagnostics: diagnostics.into(),
        }
    }
}

/// A request for one container, to be submitted to the resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Request priority; carries the role id.
    pub priority: Priority,

    /// Requested capability.
    pub capability: Resource,

    /// Preferred hostnames, in preference order. Empty means unlocated.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Whether the scheduler may fall back to other nodes when the
    /// preferred ones are busy. Always true when `nodes` is empty.
    pub relax_locality: bool,
}

impl ContainerRequest {
    /// An unlocated request: any node will do.
    pub fn anywhere(priority: Priority, capability: Resource) -> Self {
        Self {
            priority,
            capability,
            nodes: Vec::new(),
            relax_locality: true,
        }
    }

    /// A request hinted at specific hosts, with relaxed locality so the
    /// cluster can still place it elsewhere under pressure.
    pub fn at_nodes(priority: Priority, capability: Resource, nodes: Vec<String>) -> Self {
        Self {
            priority,
            capability,
            nodes,
            relax_locality: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_request_serializes() {
        let req = ContainerRequest::at_nodes(
            Priority(3),
            Resource::new(512, 1),
            vec!["worker-1".to_string()],
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"priority\":3"));
        assert!(json.contains("worker-1"));
        let parsed: ContainerRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_anywhere_request_has_no_nodes() {
        let req = ContainerRequest::anywhere(Priority(1), Resource::new(256, 1));
        assert!(req.nodes.is_empty());
        assert!(req.relax_locality);
    }
}
