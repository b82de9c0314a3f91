//! Cluster-wide unique name registry (local view).
//!
//! Each node keeps its own view of the global namespace; the view may lag
//! actual cluster state. Registration conflicts fail immediately against
//! the local view, entries are purged when their node goes down, and
//! [`GlobalRegistry::try_claim`] implements the compare-owner-then-delete
//! discipline the distributed supervisor relies on for exactly-one
//! ownership.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::NodeId;

/// Key prefix for distributed-supervisor child registrations.
///
/// Entries under this prefix are exempt from the blanket node-down purge:
/// they are consumed by the owning supervisor's claim during failover.
pub const DSUP_KEY_PREFIX: &str = "dsup:";

/// One global registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntry {
    /// Node hosting the named actor.
    pub node_id: NodeId,

    /// Opaque payload (for distributed-supervisor children: the child
    /// metadata document).
    pub payload: Value,

    /// When the entry was written.
    pub registered_at: DateTime<Utc>,
}

impl GlobalEntry {
    pub fn new(node_id: NodeId, payload: Value) -> Self {
        Self {
            node_id,
            payload,
            registered_at: Utc::now(),
        }
    }

    /// The `supervisor_id` field of the payload, when present.
    pub fn supervisor_id(&self) -> Option<&str> {
        self.payload.get("supervisor_id").and_then(|value| value.as_str())
    }
}

/// The local view of the cluster-wide name table.
#[derive(Clone, Default)]
pub struct GlobalRegistry {
    entries: Arc<DashMap<String, GlobalEntry>>,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Register a name. Fails with `GlobalNameConflict` if the name is
    /// already mapped, even to a remote node.
    pub fn register(&self, name: impl Into<String>, entry: GlobalEntry) -> Result<(), ClusterError> {
        let name = name.into();
        match self.entries.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Err(ClusterError::GlobalNameConflict {
                    name,
                    node_id: existing.get().node_id.to_string(),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Remove a name. Returns the entry if it existed.
    pub fn unregister(&self, name: &str) -> Option<GlobalEntry> {
        self.entries.remove(name).map(|(_, entry)| entry)
    }

    /// Resolve a name against the local view (no network round-trip;
    /// best-effort, may lag actual cluster state).
    pub fn lookup(&self, name: &str) -> Option<GlobalEntry> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Remove every entry hosted on `node`. Returns the removed names.
    pub fn purge_node(&self, node: &NodeId) -> Vec<String> {
        self.purge_node_where(node, |_| true)
    }

    /// Remove entries hosted on `node` whose name satisfies `keep_name`.
    ///
    /// The cluster uses this to spare `dsup:` registrations, which are
    /// deleted through [`GlobalRegistry::try_claim`] instead.
    pub fn purge_node_where(
        &self,
        node: &NodeId,
        keep_name: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().node_id == *node && keep_name(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for name in &doomed {
            self.entries.remove_if(name, |_, entry| entry.node_id == *node);
        }
        doomed
    }

    /// Atomically claim a registration for a restart.
    ///
    /// Compares the entry's `supervisor_id` metadata against `claimant`
    /// under the map's entry lock, deleting the entry only on a match.
    ///
    /// - `Ok(Some(entry))`: claimed; the caller now owns the restart.
    /// - `Ok(None)`: no entry; another supervisor already took over.
    /// - `Err(ChildClaim)`: the entry belongs to a different supervisor
    ///   (split-brain protection).
    pub fn try_claim(
        &self,
        name: &str,
        claimant: &str,
    ) -> Result<Option<GlobalEntry>, ClusterError> {
        match self.entries.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(_) => Ok(None),
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let owner = occupied.get().supervisor_id().unwrap_or_default().to_string();
                if owner == claimant {
                    Ok(Some(occupied.remove()))
                } else {
                    Err(ClusterError::ChildClaim {
                        key: name.to_string(),
                        owner,
                        claimant: claimant.to_string(),
                    })
                }
            }
        }
    }

    /// All names starting with `prefix`.
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for GlobalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str) -> NodeId {
        NodeId::new(name, "localhost", 4000).expect("valid id")
    }

    fn entry(node_name: &str, supervisor: &str) -> GlobalEntry {
        GlobalEntry::new(
            node(node_name),
            json!({ "supervisor_id": supervisor, "server_id": "s1" }),
        )
    }

    #[test]
    fn test_register_conflict() {
        let registry = GlobalRegistry::new();
        registry
            .register("svc", entry("a", "sup-1"))
            .expect("first registration should succeed");

        let result = registry.register("svc", entry("b", "sup-2"));
        assert!(matches!(
            result,
            Err(ClusterError::GlobalNameConflict { name, .. }) if name == "svc"
        ));
    }

    #[test]
    fn test_unregister_then_reregister() {
        let registry = GlobalRegistry::new();
        registry.register("svc", entry("a", "sup-1")).expect("register");
        assert!(registry.unregister("svc").is_some());
        assert!(registry.lookup("svc").is_none());
        registry
            .register("svc", entry("a", "sup-1"))
            .expect("re-register should succeed");
    }

    #[test]
    fn test_purge_node_removes_only_that_node() {
        let registry = GlobalRegistry::new();
        registry.register("one", entry("a", "sup-1")).expect("register");
        registry.register("two", entry("a", "sup-1")).expect("register");
        registry.register("three", entry("b", "sup-2")).expect("register");

        let mut purged = registry.purge_node(&node("a"));
        purged.sort();
        assert_eq!(purged, vec!["one".to_string(), "two".into()]);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("three").is_some());
    }

    #[test]
    fn test_try_claim_by_owner_succeeds() {
        let registry = GlobalRegistry::new();
        registry.register("dsup:s:c", entry("a", "s")).expect("register");

        let claimed = registry.try_claim("dsup:s:c", "s").expect("claim should succeed");
        assert!(claimed.is_some());
        assert!(registry.lookup("dsup:s:c").is_none());
    }

    #[test]
    fn test_try_claim_missing_entry_is_taken_over() {
        let registry = GlobalRegistry::new();
        let claimed = registry.try_claim("dsup:s:c", "s").expect("claim should not error");
        assert!(claimed.is_none());
    }

    #[test]
    fn test_try_claim_by_other_supervisor_is_rejected() {
        let registry = GlobalRegistry::new();
        registry.register("dsup:s:c", entry("a", "s")).expect("register");

        let result = registry.try_claim("dsup:s:c", "intruder");
        assert!(matches!(result, Err(ClusterError::ChildClaim { .. })));
        // Entry is untouched after a rejected claim.
        assert!(registry.lookup("dsup:s:c").is_some());
    }

    #[test]
    fn test_prefix_scan() {
        let registry = GlobalRegistry::new();
        registry.register("dsup:s:a", entry("a", "s")).expect("register");
        registry.register("dsup:s:b", entry("a", "s")).expect("register");
        registry.register("dsup:t:c", entry("a", "t")).expect("register");

        let mut names = registry.names_with_prefix("dsup:s:");
        names.sort();
        assert_eq!(names, vec!["dsup:s:a".to_string(), "dsup:s:b".into()]);
    }
}
