//! The record-construction seam.
//!
//! The state engine never constructs resource-manager records directly; it
//! goes through a factory injected at build time. Production uses
//! [`DefaultRecordFactory`]; tests can substitute a factory that stamps
//! recognisable values.

use crate::records::{ContainerRequest, Priority, Resource};

/// Creates capability and request records for the engine.
pub trait RecordFactory: Send + Sync {
    /// A zeroed capability, to be filled in from role requirements.
    fn new_resource(&self) -> Resource;

    /// A container request for the given priority and capability,
    /// optionally hinted at preferred hosts.
    fn new_container_request(
        &self,
        priority: Priority,
        capability: Resource,
        nodes: Vec<String>,
    ) -> ContainerRequest;
}

/// The stock factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRecordFactory;

impl RecordFactory for DefaultRecordFactory {
    fn new_resource(&self) -> Resource {
        Resource::default()
    }

    fn new_container_request(
        &self,
        priority: Priority,
        capability: Resource,
        nodes: Vec<String>,
    ) -> ContainerRequest {
        if nodes.is_empty() {
            ContainerRequest::anywhere(priority, capability)
        } else {
            ContainerRequest::at_nodes(priority, capability, nodes)
        }
    }
}
