//! Placement memory.
//!
//! Remembers, per (node, role), when the role last used the node, how many
//! instances are allocated there now, and whether the node is free again
//! for that role. Two queries come out of it: where to hint new container
//! requests, and which hosts to tear down when a role flexes below its
//! current population.
//!
//! The table is plain in-memory state owned by the engine; the driver
//! persists snapshots through [`super::HistoryStore`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use flock_model::{priority, Container, ContainerRequest, Priority, RecordFactory, Resource};
use tracing::debug;

use crate::clock::Clock;
use crate::providers::ProviderRole;

use super::history_store::HistorySnapshot;
use super::node_instance::{NodeEntry, NodeInstance};

pub struct RoleHistory {
    /// Hostname -> node record. BTreeMap so every scan is deterministic.
    nodes: BTreeMap<String, NodeInstance>,

    /// Role ids we have been told about.
    role_ids: BTreeSet<u32>,

    clock: Arc<dyn Clock>,

    /// Set on every mutation since the last snapshot was taken.
    dirty: bool,
}

impl RoleHistory {
    pub fn new(roles: &[ProviderRole], clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            role_ids: roles.iter().map(|r| r.id).collect(),
            clock,
            dirty: false,
        }
    }

    /// Registers a role that appeared after construction (a dynamic role).
    pub fn add_new_provider_role(&mut self, role: &ProviderRole) {
        self.role_ids.insert(role.id);
    }

    pub fn known_role_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.role_ids.iter().copied()
    }

    /// Replaces the node table from a reloaded snapshot. Replaying the same
    /// snapshot twice lands in the same state.
    pub fn restore(&mut self, snapshot: HistorySnapshot) {
        self.nodes = snapshot.nodes;
        self.dirty = false;
    }

    /// A persistable snapshot. Nodes with nothing allocated and nothing
    /// available are pruned, keeping storage proportional to the set of
    /// nodes that still carry information.
    pub fn snapshot(&self) -> HistorySnapshot {
        let nodes: BTreeMap<String, NodeInstance> = self
            .nodes
            .iter()
            .filter(|(_, node)| !node.is_empty())
            .map(|(hostname, node)| (hostname.clone(), node.clone()))
            .collect();
        HistorySnapshot::new(nodes, self.clock.now_millis())
    }

    /// A snapshot when anything changed since the last one, clearing the
    /// dirty flag. The driver calls this under the engine lock and does the
    /// actual write outside it.
    pub fn take_snapshot_if_dirty(&mut self) -> Option<HistorySnapshot> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.snapshot())
    }

    /// Builds a container request for one instance of a role: hinted at the
    /// best available node when there is one, unlocated otherwise.
    ///
    /// "Best" is the most-recently-used node marked available for the role
    /// with nothing of the role allocated there; ties break on the
    /// lexicographically smallest hostname. The chosen node's `available`
    /// flag is cleared so a review pass asking for several instances never
    /// hints the same node twice.
    pub fn request_node(
        &mut self,
        role_id: u32,
        priority: Priority,
        capability: Resource,
        factory: &dyn RecordFactory,
    ) -> ContainerRequest {
        let mut best: Option<(&String, i64)> = None;
        for (hostname, node) in &self.nodes {
            let Some(entry) = node.entry(role_id) else {
                continue;
            };
            if !entry.available || entry.active > 0 {
                continue;
            }
            let better = match best {
                None => true,
                // BTreeMap iteration is hostname-ascending, so on a tie the
                // earlier (smaller) hostname wins by keeping `best`.
                Some((_, best_used)) => entry.last_used > best_used,
            };
            if better {
                best = Some((hostname, entry.last_used));
            }
        }

        match best.map(|(hostname, _)| hostname.clone()) {
            Some(hostname) => {
                if let Some(node) = self.nodes.get_mut(&hostname) {
                    node.entry_mut(role_id).available = false;
                }
                self.dirty = true;
                debug!(role_id, host = %hostname, "Hinting request at previously used node");
                factory.new_container_request(priority, capability, vec![hostname])
            }
            None => factory.new_container_request(priority, capability, Vec::new()),
        }
    }

    /// Chooses up to `count` hosts whose instances of a role should be torn
    /// down. Nodes holding several instances of the role go first, then
    /// most-recently-assigned, then hostname ascending as the final
    /// tie-break. A node may appear more than once, once per instance it
    /// can give up; a node with nothing allocated is never returned.
    pub fn find_nodes_for_release(&self, role_id: u32, count: usize) -> Vec<NodeInstance> {
        let mut candidates: Vec<(String, u32, i64)> = self
            .nodes
            .values()
            .filter_map(|node| {
                node.entry(role_id).and_then(|entry| {
                    (entry.active > 0).then(|| {
                        (node.hostname.clone(), entry.active, entry.last_used)
                    })
                })
            })
            .collect();

        let mut picked = Vec::new();
        while picked.len() < count {
            candidates.sort_by(|a, b| {
                let multi_a = a.1 > 1;
                let multi_b = b.1 > 1;
                multi_b
                    .cmp(&multi_a)
                    .then(b.2.cmp(&a.2))
                    .then(a.0.cmp(&b.0))
            });
            let Some(slot) = candidates.iter_mut().find(|c| c.1 > 0) else {
                break;
            };
            slot.1 -= 1;
            let hostname = slot.0.clone();
            if let Some(node) = self.nodes.get(&hostname) {
                picked.push(node.clone());
            }
        }
        picked
    }

    /// Reorders a batch of allocations so containers that landed on nodes
    /// this role has used before are processed first. Stable, so the
    /// resource manager's order is preserved within each half.
    pub fn prepare_allocation_list(&self, allocated: Vec<Container>) -> Vec<Container> {
        let (known, unknown): (Vec<Container>, Vec<Container>) =
            allocated.into_iter().partition(|container| {
                let role_id = priority::extract_role(container);
                self.nodes
                    .get(&container.node.host)
                    .and_then(|node| node.entry(role_id))
                    .is_some()
            });
        let mut ordered = known;
        ordered.extend(unknown);
        ordered
    }

    /// An allocation has been bound to a role. This is the single point
    /// that increments the node's active count; the start-submitted and
    /// started notifications that follow for the same container only
    /// refresh the timestamp.
    pub fn on_container_assigned(&mut self, container: &Container) {
        let role_id = priority::extract_role(container);
        let now = self.clock.now_millis();
        let entry = self.node_entry_mut(&container.node.host, role_id);
        entry.active += 1;
        entry.available = false;
        entry.last_used = now;
        self.dirty = true;
    }

    /// A start has been submitted for an already-assigned container.
    pub fn on_container_start_submitted(&mut self, container: &Container) {
        self.touch(container);
    }

    /// The node manager confirmed a start.
    pub fn on_container_started(&mut self, container: &Container) {
        self.touch(container);
    }

    /// A release was submitted. The node stays active until completion.
    pub fn on_container_release_submitted(&mut self, _container: &Container) {}

    /// A requested release completed: the slot is free for the role again.
    pub fn on_release_completed(&mut self, container: &Container) {
        let role_id = priority::extract_role(container);
        let now = self.clock.now_millis();
        let entry = self.node_entry_mut(&container.node.host, role_id);
        if entry.dec_active() == 0 {
            entry.available = true;
        }
        entry.last_used = now;
        self.dirty = true;
    }

    /// A container died. A short-lived failure blacklists the node for the
    /// role; a long-lived one frees it for reuse.
    pub fn on_failed_container(&mut self, container: &Container, short_lived: bool) {
        let role_id = priority::extract_role(container);
        let now = self.clock.now_millis();
        let entry = self.node_entry_mut(&container.node.host, role_id);
        entry.dec_active();
        entry.available = !short_lived;
        entry.last_used = now;
        self.dirty = true;
    }

    /// A container never came up. Failure to start is the strongest signal
    /// the node is bad for the role.
    pub fn on_node_manager_container_start_failed(&mut self, container: &Container) {
        self.on_failed_container(container, true);
    }

    pub fn node(&self, hostname: &str) -> Option<&NodeInstance> {
        self.nodes.get(hostname)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn touch(&mut self, container: &Container) {
        let role_id = priority::extract_role(container);
        let now = self.clock.now_millis();
        self.node_entry_mut(&container.node.host, role_id).last_used = now;
        self.dirty = true;
    }

    fn node_entry_mut(&mut self, hostname: &str, role_id: u32) -> &mut NodeEntry {
        self.nodes
            .entry(hostname.to_string())
            .or_insert_with(|| NodeInstance::new(hostname))
            .entry_mut(role_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use flock_model::{ContainerId, DefaultRecordFactory, NodeId};

    fn container(id: &str, host: &str, role_id: u32) -> Container {
        Container {
            id: ContainerId::parse(id).unwrap(),
            node: NodeId::new(host, 45454),
            http_address: None,
            resource: Resource::new(256, 1),
            priority: priority::encode(role_id, false).unwrap(),
        }
    }

    fn history(clock: Arc<ManualClock>) -> RoleHistory {
        RoleHistory::new(&[ProviderRole::new("worker", 1, 0)], clock)
    }

    #[test]
    fn test_request_node_unlocated_with_no_history() {
        let clock = Arc::new(ManualClock::new(0));
        let mut rh = history(clock);
        let req = rh.request_node(1, Priority(1), Resource::new(256, 1), &DefaultRecordFactory);
        assert!(req.nodes.is_empty());
    }

    #[test]
    fn test_request_node_prefers_most_recently_used_available() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock.clone());

        // host-a used earlier, host-b later; both then released
        rh.on_container_assigned(&container("c1", "host-a", 1));
        clock.set(200);
        rh.on_container_assigned(&container("c2", "host-b", 1));
        clock.set(300);
        rh.on_release_completed(&container("c1", "host-a", 1));
        clock.set(400);
        rh.on_release_completed(&container("c2", "host-b", 1));

        let req = rh.request_node(1, Priority(1), Resource::new(256, 1), &DefaultRecordFactory);
        assert_eq!(req.nodes, vec!["host-b".to_string()]);

        // host-b is consumed; the next request falls back to host-a
        let req = rh.request_node(1, Priority(1), Resource::new(256, 1), &DefaultRecordFactory);
        assert_eq!(req.nodes, vec!["host-a".to_string()]);

        // nothing left
        let req = rh.request_node(1, Priority(1), Resource::new(256, 1), &DefaultRecordFactory);
        assert!(req.nodes.is_empty());
    }

    #[test]
    fn test_request_node_tie_breaks_on_hostname() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock.clone());
        rh.on_container_assigned(&container("c1", "host-b", 1));
        rh.on_container_assigned(&container("c2", "host-a", 1));
        clock.set(500);
        rh.on_release_completed(&container("c1", "host-b", 1));
        rh.on_release_completed(&container("c2", "host-a", 1));

        let req = rh.request_node(1, Priority(1), Resource::new(256, 1), &DefaultRecordFactory);
        assert_eq!(req.nodes, vec!["host-a".to_string()]);
    }

    #[test]
    fn test_short_lived_failure_blacklists_node() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock);
        let c = container("c1", "host-a", 1);
        rh.on_container_assigned(&c);
        rh.on_failed_container(&c, true);

        let entry = rh.node("host-a").unwrap().entry(1).unwrap().clone();
        assert_eq!(entry.active, 0);
        assert!(!entry.available);

        let req = rh.request_node(1, Priority(1), Resource::new(256, 1), &DefaultRecordFactory);
        assert!(req.nodes.is_empty());
    }

    #[test]
    fn test_long_lived_failure_frees_node() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock);
        let c = container("c1", "host-a", 1);
        rh.on_container_assigned(&c);
        rh.on_failed_container(&c, false);

        let entry = rh.node("host-a").unwrap().entry(1).unwrap();
        assert!(entry.available);
    }

    #[test]
    fn test_find_nodes_for_release_prefers_multi_instance_nodes() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock.clone());
        rh.on_container_assigned(&container("c1", "host-a", 1));
        rh.on_container_assigned(&container("c2", "host-a", 1));
        clock.set(999);
        rh.on_container_assigned(&container("c3", "host-b", 1));

        // host-b is more recent, but host-a holds two instances
        let picked = rh.find_nodes_for_release(1, 1);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].hostname, "host-a");

        // asking for three drains host-a twice, then host-b
        let picked = rh.find_nodes_for_release(1, 3);
        let hosts: Vec<&str> = picked.iter().map(|n| n.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["host-a", "host-a", "host-b"]);
    }

    #[test]
    fn test_find_nodes_for_release_never_over_returns() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock);
        rh.on_container_assigned(&container("c1", "host-a", 1));

        let picked = rh.find_nodes_for_release(1, 5);
        assert_eq!(picked.len(), 1);

        let picked = rh.find_nodes_for_release(2, 1);
        assert!(picked.is_empty());
    }

    #[test]
    fn test_prepare_allocation_list_puts_known_nodes_first() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock);
        rh.on_container_assigned(&container("c0", "host-known", 1));

        let batch = vec![
            container("c1", "host-new-1", 1),
            container("c2", "host-known", 1),
            container("c3", "host-new-2", 1),
        ];
        let ordered = rh.prepare_allocation_list(batch);
        let ids: Vec<&str> = ordered.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1", "c3"]);
    }

    #[test]
    fn test_snapshot_restore_roundtrip_is_idempotent() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock.clone());
        rh.on_container_assigned(&container("c1", "host-a", 1));
        rh.on_release_completed(&container("c1", "host-a", 1));

        let snap = rh.snapshot();
        let mut restored = history(clock);
        restored.restore(snap.clone());
        restored.restore(snap.clone());
        assert_eq!(restored.snapshot().nodes, snap.nodes);
        assert!(restored.take_snapshot_if_dirty().is_none());
    }

    #[test]
    fn test_snapshot_prunes_empty_nodes() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock);
        let c = container("c1", "host-a", 1);
        rh.on_container_assigned(&c);
        // short-lived failure: active back to zero, not available
        rh.on_failed_container(&c, true);

        assert!(rh.snapshot().nodes.is_empty());
    }

    #[test]
    fn test_dirty_flag_cleared_by_take() {
        let clock = Arc::new(ManualClock::new(100));
        let mut rh = history(clock);
        assert!(rh.take_snapshot_if_dirty().is_none());
        rh.on_container_assigned(&container("c1", "host-a", 1));
        assert!(rh.take_snapshot_if_dirty().is_some());
        assert!(rh.take_snapshot_if_dirty().is_none());
    }
}
