//! The provider interface.
//!
//! A provider is a per-workload plug-in: it names the roles the workload is
//! made of and assembles the launch context for each. The engine treats
//! roles as pure data; everything workload-specific stays behind this trait.

use flock_spec::{keys, ClusterSpec};

/// A role a provider offers: the unit of flex.
///
/// `id` doubles as the container-request priority and must be unique across
/// every role the engine knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRole {
    pub name: String,
    pub id: u32,
    pub placement_policy: u32,
}

impl ProviderRole {
    pub fn new(name: impl Into<String>, id: u32, placement_policy: u32) -> Self {
        Self {
            name: name.into(),
            id,
            placement_policy,
        }
    }
}

/// Command and environment for launching one role instance.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    pub command: String,
    pub environment: Vec<String>,
}

/// A workload provider: role catalogue plus launch-context assembly.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// The roles this provider offers.
    fn roles(&self) -> Vec<ProviderRole>;

    /// Builds the launch context for one instance of `role`.
    fn build_launch_context(&self, role: &ProviderRole, spec: &ClusterSpec) -> LaunchContext;
}

/// A minimal single-role provider: a flat pool of identical workers.
///
/// Backs the plan binary and the test suites; real workloads ship their own
/// provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerPoolProvider;

impl WorkerPoolProvider {
    pub const ROLE_WORKER: &'static str = "worker";
    pub const ROLE_WORKER_ID: u32 = 1;
}

impl Provider for WorkerPoolProvider {
    fn name(&self) -> &str {
        "worker-pool"
    }

    fn roles(&self) -> Vec<ProviderRole> {
        vec![ProviderRole::new(Self::ROLE_WORKER, Self::ROLE_WORKER_ID, 0)]
    }

    fn build_launch_context(&self, role: &ProviderRole, spec: &ClusterSpec) -> LaunchContext {
        let mut environment = Vec::new();
        if let Some(heap) = spec.role_opt(&role.name, keys::ROLE_JVM_HEAP) {
            environment.push(format!("JAVA_HEAP={heap}"));
        }
        LaunchContext {
            command: format!("bin/{} --role {}", self.name(), role.name),
            environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_offers_one_role() {
        let provider = WorkerPoolProvider;
        let roles = provider.roles();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, WorkerPoolProvider::ROLE_WORKER);
        assert_eq!(roles[0].id, WorkerPoolProvider::ROLE_WORKER_ID);
    }

    #[test]
    fn test_launch_context_passes_heap_through() {
        let provider = WorkerPoolProvider;
        let role = &provider.roles()[0];

        let mut spec = ClusterSpec::new("t");
        spec.set_role_opt(role.name.clone(), keys::ROLE_JVM_HEAP, "512M");

        let ctx = provider.build_launch_context(role, &spec);
        assert!(ctx.command.contains("--role worker"));
        assert_eq!(ctx.environment, vec!["JAVA_HEAP=512M".to_string()]);
    }
}
