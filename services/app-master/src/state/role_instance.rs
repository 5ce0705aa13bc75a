//! Per-container lifecycle record.

use flock_model::{Container, ContainerId};
use flock_spec::{ClusterNode, InstanceState};

/// Everything the engine knows about one container it owns.
///
/// State machine:
///
/// ```text
/// Requested ── start submitted ──> Submitted ── NM start ok ──> Live
///                                      │                          │
///                                      └── NM start fail ─────────┴──> Destroyed
/// ```
///
/// An instance is owned by exactly one engine map at a time: `active` while
/// the container is allocated, then `completed` or `failed` once its
/// completion arrives.
#[derive(Debug, Clone)]
pub struct RoleInstance {
    pub container: Container,
    pub role: String,
    pub role_id: u32,
    pub state: InstanceState,

    /// When the start was submitted (millisecond epoch; zero until then).
    pub create_time: i64,

    /// When the node manager confirmed the start (zero until then).
    pub start_time: i64,

    /// Set when a release has been submitted; the instance stays on the
    /// active list until the completion arrives.
    pub released: bool,

    pub exit_code: Option<i32>,
    pub diagnostics: Option<String>,

    pub command: String,
    pub environment: Vec<String>,
}

impl RoleInstance {
    pub fn new(container: Container, role: impl Into<String>, role_id: u32) -> Self {
        Self {
            container,
            role: role.into(),
            role_id,
            state: InstanceState::Requested,
            create_time: 0,
            start_time: 0,
            released: false,
            exit_code: None,
            diagnostics: None,
            command: String::new(),
            environment: Vec::new(),
        }
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.container.id
    }

    pub fn hostname(&self) -> &str {
        &self.container.node.host
    }

    /// Projects this instance into the published node view.
    pub fn to_cluster_node(&self) -> ClusterNode {
        ClusterNode {
            container_id: self.container.id.to_string(),
            role: self.role.clone(),
            role_id: self.role_id,
            state: self.state,
            host: self.container.node.host.clone(),
            http_address: self.container.http_address.clone(),
            create_time: self.create_time,
            start_time: self.start_time,
            released: self.released,
            exit_code: self.exit_code,
            diagnostics: self.diagnostics.clone(),
            command: self.command.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flock_model::{NodeId, Priority, Resource};

    fn container(id: &str, host: &str) -> Container {
        Container {
            id: ContainerId::parse(id).unwrap(),
            node: NodeId::new(host, 45454),
            http_address: Some(format!("{host}:8042")),
            resource: Resource::new(256, 1),
            priority: Priority(1),
        }
    }

    #[test]
    fn test_new_instance_starts_requested() {
        let ri = RoleInstance::new(container("c1", "host-a"), "worker", 1);
        assert_eq!(ri.state, InstanceState::Requested);
        assert!(!ri.released);
        assert_eq!(ri.hostname(), "host-a");
    }

    #[test]
    fn test_cluster_node_projection() {
        let mut ri = RoleInstance::new(container("c2", "host-b"), "worker", 1);
        ri.state = InstanceState::Live;
        ri.start_time = 42;
        ri.command = "bin/worker".to_string();

        let node = ri.to_cluster_node();
        assert_eq!(node.container_id, "c2");
        assert_eq!(node.state, InstanceState::Live);
        assert_eq!(node.host, "host-b");
        assert_eq!(node.start_time, 42);
        assert_eq!(node.command, "bin/worker");
    }
}
