//! Typed wire messages exchanged between nodes.
//!
//! Every frame on a link is one JSON-encoded [`WireMessage`], length-prefixed
//! by the transport codec. The first frame in each direction must be the
//! handshake (`Hello` from the connecting side, `Welcome` back).

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::{NodeId, NodeInfo};

/// Why a node was declared down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownReason {
    /// The node announced its own shutdown.
    GracefulShutdown,

    /// The node stopped heartbeating.
    HeartbeatTimeout,

    /// The transport link dropped.
    ConnectionClosed,
}

impl std::fmt::Display for DownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DownReason::GracefulShutdown => "graceful_shutdown",
            DownReason::HeartbeatTimeout => "heartbeat_timeout",
            DownReason::ConnectionClosed => "connection_closed",
        };
        write!(f, "{text}")
    }
}

/// An error carried across the wire in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

/// Classification of a remote failure, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    /// The target actor is not running on the remote node.
    NotRunning,

    /// The remote handler failed.
    Handler,

    /// The behavior name is not registered on the remote node.
    BehaviorNotRegistered,

    /// The remote spawn failed.
    SpawnFailed,
}

impl WireError {
    pub fn new(kind: WireErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map a wire error from `node_id` back into a local error value.
    pub fn into_cluster_error(self, node_id: &NodeId, context: &str) -> ClusterError {
        match self.kind {
            WireErrorKind::NotRunning => ClusterError::RemoteServerNotRunning {
                node_id: node_id.to_string(),
                server_id: context.to_string(),
            },
            WireErrorKind::Handler => ClusterError::RemoteHandler {
                reason: self.message,
            },
            WireErrorKind::BehaviorNotRegistered => ClusterError::BehaviorNotRegistered {
                name: context.to_string(),
            },
            WireErrorKind::SpawnFailed => ClusterError::SpawnFailed {
                behavior_name: context.to_string(),
                reason: self.message,
            },
        }
    }
}

/// One frame on a node-to-node link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Handshake opener, sent by the connecting side.
    Hello { node_id: NodeId, proof: String },

    /// Handshake acceptance, sent by the accepting side.
    Welcome { node_id: NodeId, proof: String },

    /// Periodic liveness announcement with gossip of known peers.
    Heartbeat {
        node: NodeInfo,
        known_nodes: Vec<NodeId>,
    },

    /// Explicit announcement that a node is down.
    NodeDown {
        node_id: NodeId,
        detected_at: DateTime<Utc>,
        reason: DownReason,
    },

    /// Synchronous request to an actor on the receiving node.
    CallRequest {
        call_id: Uuid,
        server_id: Uuid,
        msg: Value,
        timeout_ms: u64,
    },

    /// Successful reply to a `CallRequest`.
    CallOk { call_id: Uuid, reply: Value },

    /// Failed reply to a `CallRequest`.
    CallErr { call_id: Uuid, error: WireError },

    /// Fire-and-forget message to an actor on the receiving node.
    Cast { server_id: Uuid, msg: Value },

    /// Request to instantiate a registered behavior on the receiving node.
    SpawnRequest {
        request_id: Uuid,
        behavior_name: String,
        args: Value,
    },

    /// Successful reply to a `SpawnRequest`.
    SpawnReply { request_id: Uuid, server_id: Uuid },

    /// Failed reply to a `SpawnRequest`.
    SpawnError { request_id: Uuid, error: WireError },

    /// Graceful stop request for an actor on the receiving node.
    Stop { server_id: Uuid },

    /// Monitor notification: an exported actor on the sending node
    /// terminated.
    Down { server_id: Uuid, reason: String },
}

impl WireMessage {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::Welcome { .. } => "welcome",
            WireMessage::Heartbeat { .. } => "heartbeat",
            WireMessage::NodeDown { .. } => "node_down",
            WireMessage::CallRequest { .. } => "call_request",
            WireMessage::CallOk { .. } => "call_ok",
            WireMessage::CallErr { .. } => "call_err",
            WireMessage::Cast { .. } => "cast",
            WireMessage::SpawnRequest { .. } => "spawn_request",
            WireMessage::SpawnReply { .. } => "spawn_reply",
            WireMessage::SpawnError { .. } => "spawn_error",
            WireMessage::Stop { .. } => "stop",
            WireMessage::Down { .. } => "down",
        }
    }
}

/// Handshake proof for the configured shared secret.
///
/// Both sides derive the same digest from the secret; an empty proof is used
/// when no secret is configured. This authenticates membership of the
/// cluster, not the identity of individual nodes.
pub fn secret_proof(secret: Option<&str>) -> String {
    match secret {
        None => String::new(),
        Some(secret) => {
            use std::fmt::Write;

            let digest = Sha256::digest(secret.as_bytes());
            let mut out = String::with_capacity(digest.len() * 2);
            for byte in digest {
                let _ = write!(out, "{byte:02x}");
            }
            out
        }
    }
}
