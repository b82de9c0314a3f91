//! # hearth-cluster - Distributed Layer for the Hearth Actor Runtime
//!
//! Extends [`hearth_rt`] across nodes: a framed, authenticated TCP
//! transport, gossiped membership with heartbeat failure detection,
//! correlated remote calls and spawns, a cluster-wide name registry, and a
//! distributed supervisor with node-loss failover under exactly-one
//! ownership.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use hearth_cluster::{Cluster, ClusterConfig};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = Cluster::new(ClusterConfig::builder("api", "127.0.0.1", 4000).build()?)?;
//! cluster.behaviors().register("greeter", || Box::new(Greeter::default()));
//! let local = cluster.start().await?;
//!
//! // Join an existing node and place an actor wherever there is room.
//! cluster.connect(&"seed@10.0.0.1:4000".parse()?)?;
//! let handle = cluster.spawn_local("greeter", json!({ "lang": "en" })).await?;
//! let reply = cluster.call(&handle, json!("world")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Consistency model
//!
//! The membership view is eventually consistent: two nodes may transiently
//! disagree about a third. The global registry is a best-effort local view;
//! exactly-one ownership of distributed children is enforced by the claim
//! protocol, not by consensus.
//!
//! # Module Organization
//!
//! - [`transport`] - Length-prefixed frames, handshake, reconnect backoff
//! - [`membership`] - Peer table, heartbeats, gossip, failure detection
//! - [`cluster`] - The composition root: remote call/cast/spawn
//! - [`behavior`] - Dynamic behaviors and the per-node behavior registry
//! - [`global`] - Cluster-wide unique names and the claim protocol
//! - [`dsup`] - The distributed supervisor
//! - [`wire`] - Typed wire messages
//! - [`node`] - Node identity
//! - [`config`] - Cluster configuration
//! - [`error`] - `ClusterError`

pub mod behavior;
pub mod cluster;
pub mod config;
pub mod dsup;
pub mod error;
pub mod global;
pub mod membership;
pub mod node;
pub mod transport;
pub mod wire;

pub(crate) mod pending;

// Re-export commonly used types
pub use behavior::{BehaviorFailure, BehaviorRegistry, DynBehavior, DynBehaviorFactory};
pub use cluster::{Cluster, RemoteDown, RemoteHandle};
pub use config::{
    ClusterConfig, ClusterConfigBuilder, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_MISS_THRESHOLD, DEFAULT_MAX_FRAME_BYTES, DEFAULT_RECONNECT_BASE_DELAY,
    DEFAULT_RECONNECT_MAX_DELAY, DEFAULT_REMOTE_CALL_TIMEOUT,
};
pub use dsup::{
    DistChildInfo, DistChildSpec, DistSupervisorOptions, DistributedSupervisor, DsupEvent,
    NodeSelector,
};
pub use error::ClusterError;
pub use global::{GlobalEntry, GlobalRegistry, DSUP_KEY_PREFIX};
pub use membership::{Membership, MembershipEvent};
pub use node::{NodeId, NodeInfo, NodeStatus};
pub use pending::PendingCallStats;
pub use transport::{Transport, TransportEvent};
pub use wire::{DownReason, WireMessage};
