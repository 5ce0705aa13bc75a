//! Per-node placement bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What one role has done on one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEntry {
    /// Millisecond epoch of the last assignment/start/completion touch.
    pub last_used: i64,

    /// Instances of the role currently allocated to this node.
    pub active: u32,

    /// The role once ran here and is not running here now; such nodes are
    /// preferred targets for new requests. Cleared when the node is hinted
    /// or assigned, and by a short-lived failure.
    pub available: bool,
}

impl NodeEntry {
    /// Decrements `active`, saturating at zero. Returns the new count.
    pub fn dec_active(&mut self) -> u32 {
        self.active = self.active.saturating_sub(1);
        self.active
    }
}

/// One node's history across every role, keyed by role id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInstance {
    pub hostname: String,

    #[serde(default)]
    pub entries: BTreeMap<u32, NodeEntry>,
}

impl NodeInstance {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn entry(&self, role_id: u32) -> Option<&NodeEntry> {
        self.entries.get(&role_id)
    }

    pub fn entry_mut(&mut self, role_id: u32) -> &mut NodeEntry {
        self.entries.entry(role_id).or_default()
    }

    /// Active instances of one role on this node.
    pub fn active_for(&self, role_id: u32) -> u32 {
        self.entries.get(&role_id).map(|e| e.active).unwrap_or(0)
    }

    /// True when no role has anything allocated here and nothing is marked
    /// available; such nodes carry no information worth persisting.
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|e| e.active == 0 && !e.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_mut_creates_default() {
        let mut node = NodeInstance::new("host-a");
        assert!(node.entry(3).is_none());
        node.entry_mut(3).active = 2;
        assert_eq!(node.active_for(3), 2);
    }

    #[test]
    fn test_dec_active_saturates() {
        let mut entry = NodeEntry::default();
        assert_eq!(entry.dec_active(), 0);
        entry.active = 2;
        assert_eq!(entry.dec_active(), 1);
    }

    #[test]
    fn test_is_empty_ignores_stale_entries() {
        let mut node = NodeInstance::new("host-a");
        assert!(node.is_empty());
        node.entry_mut(1).available = true;
        assert!(!node.is_empty());
        node.entry_mut(1).available = false;
        assert!(node.is_empty());
    }
}
