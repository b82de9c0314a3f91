//! Correlation table for in-flight remote requests.
//!
//! Every outgoing call or spawn allocates an id, parks a oneshot sender
//! here, and ships the request. Replies resolve the entry; caller-side
//! timeouts delete it; node loss rejects every entry for that node in one
//! sweep.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::NodeId;

/// Snapshot of the correlation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCallStats {
    /// Requests registered.
    pub initiated: u64,

    /// Requests resolved with a reply (ok or remote error).
    pub resolved: u64,

    /// Requests rejected locally (node loss, shutdown).
    pub rejected: u64,

    /// Requests that hit their caller-side timeout.
    pub timed_out: u64,
}

struct PendingEntry {
    node: NodeId,
    reply: oneshot::Sender<Result<Value, ClusterError>>,
    #[allow(dead_code)]
    created_at: Instant,
}

/// The pending-requests table.
#[derive(Default)]
pub(crate) struct PendingCalls {
    entries: DashMap<Uuid, PendingEntry>,
    initiated: AtomicU64,
    resolved: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park a reply sender for `id`, targeted at `node`.
    pub(crate) fn register(
        &self,
        id: Uuid,
        node: NodeId,
        reply: oneshot::Sender<Result<Value, ClusterError>>,
    ) {
        self.initiated.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            PendingEntry {
                node,
                reply,
                created_at: Instant::now(),
            },
        );
    }

    /// Resolve `id` with a reply. Late replies (after timeout or node loss)
    /// are dropped silently.
    pub(crate) fn resolve(&self, id: &Uuid, result: Result<Value, ClusterError>) {
        if let Some((_, entry)) = self.entries.remove(id) {
            self.resolved.fetch_add(1, Ordering::Relaxed);
            let _ = entry.reply.send(result);
        }
    }

    /// The caller-side timeout fired: forget the entry.
    ///
    /// The remote handler is not interrupted; a late reply is dropped.
    pub(crate) fn expire(&self, id: &Uuid) {
        if self.entries.remove(id).is_some() {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Withdraw an entry that was never actually sent (send failure).
    /// Counts as neither resolved nor timed out.
    pub(crate) fn cancel(&self, id: &Uuid) {
        self.entries.remove(id);
    }

    /// Reject every entry targeting `node` in one pass.
    pub(crate) fn fail_node(&self, node: &NodeId, reason: &str) {
        let affected: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|entry| entry.value().node == *node)
            .map(|entry| *entry.key())
            .collect();
        for id in affected {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                let _ = entry.reply.send(Err(ClusterError::NodeLost {
                    node_id: node.to_string(),
                    reason: reason.to_string(),
                }));
            }
        }
    }

    /// Reject everything (cluster shutdown).
    pub(crate) fn fail_all(&self, reason: &str) {
        let affected: Vec<Uuid> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in affected {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                let _ = entry.reply.send(Err(ClusterError::NotRunning {
                    reason: reason.to_string(),
                }));
            }
        }
    }

    /// Number of requests currently in flight.
    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Counter snapshot.
    pub(crate) fn stats(&self) -> PendingCallStats {
        PendingCallStats {
            initiated: self.initiated.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str) -> NodeId {
        NodeId::new(name, "localhost", 4000).expect("valid id")
    }

    #[tokio::test]
    async fn test_resolve_delivers_reply() {
        let pending = PendingCalls::new();
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        pending.register(id, node("a"), tx);
        pending.resolve(&id, Ok(json!(42)));

        let result = rx.await.expect("reply should arrive");
        assert_eq!(result.expect("reply should be ok"), json!(42));
        assert_eq!(pending.len(), 0);

        let stats = pending.stats();
        assert_eq!(stats.initiated, 1);
        assert_eq!(stats.resolved, 1);
    }

    #[tokio::test]
    async fn test_expire_then_late_reply_is_dropped() {
        let pending = PendingCalls::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();

        pending.register(id, node("a"), tx);
        pending.expire(&id);
        pending.resolve(&id, Ok(json!("late")));

        // The sender was dropped on expire; nothing was delivered.
        assert!(rx.try_recv().is_err());
        let stats = pending.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.resolved, 0);
    }

    #[tokio::test]
    async fn test_fail_node_rejects_only_that_nodes_entries() {
        let pending = PendingCalls::new();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();

        pending.register(id_a, node("lost"), tx_a);
        pending.register(id_b, node("alive"), tx_b);
        pending.fail_node(&node("lost"), "heartbeat_timeout");

        let result = rx_a.await.expect("rejection should arrive");
        assert!(matches!(result, Err(ClusterError::NodeLost { .. })));
        assert!(rx_b.try_recv().is_err()); // still pending
        assert_eq!(pending.len(), 1);

        let stats = pending.stats();
        assert_eq!(stats.rejected, 1);
    }
}
