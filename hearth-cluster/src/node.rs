//! Node identity and membership records.
//!
//! A node identifier has the form `name@host:port`. The name is constrained
//! to `[A-Za-z][A-Za-z0-9_-]{0,63}`; the host is any non-empty address; the
//! port is 1–65535.

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::ClusterError;

/// Maximum length of the node name component.
const MAX_NAME_LEN: usize = 64;

/// Identifier of a cluster node, formatted `name@host:port`.
///
/// # Examples
///
/// ```rust
/// use hearth_cluster::NodeId;
///
/// let id: NodeId = "api-1@10.0.0.5:4000".parse().expect("valid id");
/// assert_eq!(id.name(), "api-1");
/// assert_eq!(id.host(), "10.0.0.5");
/// assert_eq!(id.port(), 4000);
/// assert_eq!(id.to_string(), "api-1@10.0.0.5:4000");
///
/// assert!("1bad@h:1".parse::<NodeId>().is_err()); // must start with a letter
/// assert!("ok@h:0".parse::<NodeId>().is_err());   // port out of range
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    name: String,
    host: String,
    port: u16,
}

impl NodeId {
    /// Build a node id from its components, validating each.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, ClusterError> {
        let name = name.into();
        let host = host.into();
        validate_name(&name).map_err(|reason| ClusterError::InvalidNodeId {
            value: format!("{name}@{host}:{port}"),
            reason,
        })?;
        if host.is_empty() {
            return Err(ClusterError::InvalidNodeId {
                value: format!("{name}@{host}:{port}"),
                reason: "host must not be empty".into(),
            });
        }
        if port == 0 {
            return Err(ClusterError::InvalidNodeId {
                value: format!("{name}@{host}:{port}"),
                reason: "port must be in 1..=65535".into(),
            });
        }
        Ok(Self { name, host, port })
    }

    /// The node name component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The host component.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` socket address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name exceeds {MAX_NAME_LEN} characters"));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or(' ');
    if !first.is_ascii_alphabetic() {
        return Err("name must start with a letter".into());
    }
    for ch in chars {
        if !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-') {
            return Err(format!("invalid character '{ch}' in name"));
        }
    }
    Ok(())
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.port)
    }
}

impl FromStr for NodeId {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ClusterError::InvalidNodeId {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (name, rest) = value.split_once('@').ok_or_else(|| invalid("missing '@'"))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing ':port'"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| invalid("port is not a number in 1..=65535"))?;
        NodeId::new(name, host, port)
    }
}

impl TryFrom<String> for NodeId {
    type Error = ClusterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> String {
        id.to_string()
    }
}

/// Connection status of a peer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Connected,
    Disconnected,
}

/// What the local node knows about a peer (or itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node's identifier.
    pub id: NodeId,

    /// Connection status as seen locally.
    pub status: NodeStatus,

    /// When the last heartbeat from this node was received.
    pub last_heartbeat_at: DateTime<Utc>,

    /// Number of actors the node reports hosting.
    pub process_count: u32,
}

impl NodeInfo {
    /// Info for a node seen just now.
    pub fn connected(id: NodeId, process_count: u32) -> Self {
        Self {
            id,
            status: NodeStatus::Connected,
            last_heartbeat_at: Utc::now(),
            process_count,
        }
    }
}
