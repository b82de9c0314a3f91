//! Error types for the cluster layer.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use hearth_rt::SupervisorError;

/// Errors raised by the distributed layer.
///
/// # Examples
///
/// ```rust
/// use hearth_cluster::ClusterError;
/// use std::time::Duration;
///
/// let err = ClusterError::RemoteCallTimeout { timeout: Duration::from_millis(50) };
/// assert!(err.is_timeout());
/// ```
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The cluster configuration is malformed.
    #[error("invalid cluster configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A node identifier string failed validation.
    #[error("invalid node id '{value}': {reason}")]
    InvalidNodeId { value: String, reason: String },

    /// A socket-level failure in the transport.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The peer failed the shared-secret handshake.
    #[error("handshake with {peer} rejected: {reason}")]
    Handshake { peer: String, reason: String },

    /// A frame exceeded the configured maximum size.
    #[error("frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// No connected link to the target node.
    #[error("node {node_id} is not connected")]
    NodeNotConnected { node_id: String },

    /// A remote call did not receive its reply in time.
    ///
    /// The remote handler is not interrupted; only the local correlation
    /// entry is released.
    #[error("remote call timed out after {timeout:?}")]
    RemoteCallTimeout { timeout: Duration },

    /// The remote node reported that the target actor is gone.
    #[error("remote actor {server_id} is not running on {node_id}")]
    RemoteServerNotRunning { node_id: String, server_id: String },

    /// The remote handler failed; the error travels back to the caller.
    #[error("remote call handler failed: {reason}")]
    RemoteHandler { reason: String },

    /// The target node was lost while calls were in flight.
    #[error("node {node_id} was lost: {reason}")]
    NodeLost { node_id: String, reason: String },

    /// A remote spawn failed on the target node.
    #[error("remote spawn of '{behavior_name}' failed: {reason}")]
    SpawnFailed {
        behavior_name: String,
        reason: String,
    },

    /// The behavior name is unknown on the target node.
    #[error("behavior '{name}' is not registered")]
    BehaviorNotRegistered { name: String },

    /// The cluster-wide name is already taken.
    #[error("global name conflict: '{name}' is registered on {node_id}")]
    GlobalNameConflict { name: String, node_id: String },

    /// A claim failed because the registration belongs to another
    /// supervisor (split-brain protection).
    #[error("claim of '{key}' failed: owned by supervisor '{owner}', not '{claimant}'")]
    ChildClaim {
        key: String,
        owner: String,
        claimant: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// A supervision failure surfaced through the distributed supervisor.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// The cluster (or a component) is not in a state to serve the request.
    #[error("cluster is not running: {reason}")]
    NotRunning { reason: String },
}

impl ClusterError {
    /// Returns `true` for timeout failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::RemoteCallTimeout { .. })
    }

    /// Returns `true` when the target node or actor is unreachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ClusterError::NodeNotConnected { .. }
                | ClusterError::NodeLost { .. }
                | ClusterError::RemoteServerNotRunning { .. }
        )
    }

    /// Returns `true` for conflicts in the global registry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ClusterError::GlobalNameConflict { .. } | ClusterError::ChildClaim { .. }
        )
    }

    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        ClusterError::Transport {
            reason: reason.into(),
        }
    }

    pub(crate) fn serialization(reason: impl std::fmt::Display) -> Self {
        ClusterError::Serialization {
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ClusterError {
    fn from(err: std::io::Error) -> Self {
        ClusterError::Transport {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Serialization {
            reason: err.to_string(),
        }
    }
}
