//! Peer tracking: heartbeats, miss-threshold failure detection, gossip.
//!
//! Membership is a passive table driven by the cluster's dispatch loop: it
//! consumes heartbeats, explicit node-down announcements, and connection
//! losses, and emits [`MembershipEvent`]s. The view is eventually
//! consistent; two nodes may transiently disagree about a third.
//!
//! Invariant: one `NodeUp` per uninterrupted connection episode, and one
//! `NodeDown` per episode, only for peers previously seen connected.

// Layer 1: Standard library imports
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

// Layer 3: Internal module imports
use crate::node::{NodeId, NodeInfo, NodeStatus};
use crate::wire::DownReason;

/// Capacity of the membership event channel.
const MEMBERSHIP_CHANNEL_CAPACITY: usize = 256;

/// Cluster membership change notifications.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// A previously unknown (or down) peer sent its first heartbeat.
    NodeUp(NodeInfo),

    /// A connected peer was lost.
    NodeDown { id: NodeId, reason: DownReason },

    /// A connected peer's info changed (e.g. process count).
    NodeUpdated(NodeInfo),
}

struct PeerRecord {
    info: NodeInfo,
    last_heartbeat: Instant,
}

/// The local node's view of its peers (the local node itself is not
/// tracked here).
pub struct Membership {
    peers: DashMap<NodeId, PeerRecord>,
    events: broadcast::Sender<MembershipEvent>,
}

impl Membership {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(MEMBERSHIP_CHANNEL_CAPACITY);
        Self {
            peers: DashMap::new(),
            events,
        }
    }

    /// Subscribe to membership events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Record a heartbeat from `info.id`.
    ///
    /// Returns the gossip entries that are new to this node, so the caller
    /// can open connections to them.
    pub(crate) fn on_heartbeat(
        &self,
        info: NodeInfo,
        known_nodes: Vec<NodeId>,
        local: &NodeId,
    ) -> Vec<NodeId> {
        let id = info.id.clone();
        let mut came_up = false;
        let mut updated = false;

        {
            let mut record = self
                .peers
                .entry(id.clone())
                .or_insert_with(|| {
                    came_up = true;
                    PeerRecord {
                        info: NodeInfo {
                            status: NodeStatus::Connected,
                            ..info.clone()
                        },
                        last_heartbeat: Instant::now(),
                    }
                });
            if !came_up {
                if record.info.status == NodeStatus::Disconnected {
                    came_up = true;
                } else if record.info.process_count != info.process_count {
                    updated = true;
                }
                record.info = NodeInfo {
                    status: NodeStatus::Connected,
                    last_heartbeat_at: Utc::now(),
                    ..info
                };
                record.last_heartbeat = Instant::now();
            }
        }

        if came_up {
            let info = self.get(&id);
            if let Some(info) = info {
                info!(node_id = %id, "node up");
                let _ = self.events.send(MembershipEvent::NodeUp(info));
            }
        } else if updated {
            if let Some(info) = self.get(&id) {
                let _ = self.events.send(MembershipEvent::NodeUpdated(info));
            }
        }

        // Gossip: every identifier we have never seen is a connection lead.
        known_nodes
            .into_iter()
            .filter(|node| node != local && *node != id && !self.peers.contains_key(node))
            .collect()
    }

    /// Mark a peer down, emitting `NodeDown` if it was connected.
    ///
    /// Returns `true` if the peer transitioned (i.e. the event fired).
    pub(crate) fn mark_down(&self, id: &NodeId, reason: DownReason) -> bool {
        let transitioned = match self.peers.get_mut(id) {
            Some(mut record) => {
                if record.info.status == NodeStatus::Connected {
                    record.info.status = NodeStatus::Disconnected;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if transitioned {
            info!(node_id = %id, %reason, "node down");
            let _ = self.events.send(MembershipEvent::NodeDown {
                id: id.clone(),
                reason,
            });
        } else {
            debug!(node_id = %id, %reason, "node already down");
        }
        transitioned
    }

    /// Peers whose last heartbeat is older than `timeout`.
    pub(crate) fn expired(&self, timeout: Duration) -> Vec<NodeId> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|entry| {
                entry.value().info.status == NodeStatus::Connected
                    && now.duration_since(entry.value().last_heartbeat) > timeout
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Info for one peer.
    pub fn get(&self, id: &NodeId) -> Option<NodeInfo> {
        self.peers.get(id).map(|record| record.info.clone())
    }

    /// All currently connected peers.
    pub fn connected(&self) -> Vec<NodeInfo> {
        self.peers
            .iter()
            .filter(|entry| entry.value().info.status == NodeStatus::Connected)
            .map(|entry| entry.value().info.clone())
            .collect()
    }

    /// Identifiers of all currently connected peers.
    pub fn connected_ids(&self) -> Vec<NodeId> {
        self.connected().into_iter().map(|info| info.id).collect()
    }

    /// Drop a peer record entirely (used on graceful cluster stop).
    pub(crate) fn forget(&self, id: &NodeId) {
        self.peers.remove(id);
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("peers", &self.peers.len())
            .finish()
    }
}
