//! Types for the distributed supervisor: placement selectors, child specs,
//! options, and events.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use crate::cluster::RemoteHandle;
use crate::error::ClusterError;
use crate::global::DSUP_KEY_PREFIX;
use crate::node::NodeId;
use hearth_rt::{RestartPolicy, Strategy, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_WINDOW};

/// User-supplied placement function: `(candidates, child_id) → node`.
pub type SelectorFn = Arc<dyn Fn(&[NodeId], &str) -> Option<NodeId> + Send + Sync>;

/// Node placement strategy for distributed children.
#[derive(Clone)]
pub enum NodeSelector {
    /// Prefer the local node; fall back to any connected peer.
    LocalFirst,

    /// Rotate through the candidate set.
    RoundRobin,

    /// Choose the candidate reporting the lowest process count.
    LeastLoaded,

    /// Choose a candidate uniformly at random.
    Random,

    /// Always place on this node; fails if it is not a candidate.
    Pinned(NodeId),

    /// Delegate the choice to a user function.
    Custom(SelectorFn),
}

impl fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSelector::LocalFirst => write!(f, "LocalFirst"),
            NodeSelector::RoundRobin => write!(f, "RoundRobin"),
            NodeSelector::LeastLoaded => write!(f, "LeastLoaded"),
            NodeSelector::Random => write!(f, "Random"),
            NodeSelector::Pinned(node) => write!(f, "Pinned({node})"),
            NodeSelector::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Specification of one distributed child.
///
/// The behavior is referenced by name and resolved through the hosting
/// node's behavior registry at spawn time, so it must be registered on
/// every node the selector may choose.
#[derive(Debug, Clone)]
pub struct DistChildSpec {
    /// Unique identifier within the supervisor. Must not contain `:`.
    pub id: String,

    /// Behavior to instantiate, by registry name.
    pub behavior_name: String,

    /// Arguments passed to the behavior's `init`, on the initial spawn and
    /// on every restart.
    pub args: Value,

    /// When to restart this child.
    pub restart: RestartPolicy,

    /// Placement override; `None` uses the supervisor default.
    pub selector: Option<NodeSelector>,
}

impl DistChildSpec {
    /// Spec with defaults: null args, permanent restart, default selector.
    pub fn new(id: impl Into<String>, behavior_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            behavior_name: behavior_name.into(),
            args: Value::Null,
            restart: RestartPolicy::Permanent,
            selector: None,
        }
    }

    /// Set the spawn arguments.
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Override the restart policy.
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Override the placement selector.
    pub fn with_selector(mut self, selector: NodeSelector) -> Self {
        self.selector = Some(selector);
        self
    }
}

/// Configuration for a distributed supervisor.
#[derive(Debug, Clone)]
pub struct DistSupervisorOptions {
    /// Cluster-unique supervisor identifier. Must not contain `:` (it is
    /// embedded in registration keys).
    pub id: String,

    /// Static children, started in declaration order.
    pub children: Vec<DistChildSpec>,

    /// Restart strategy for observed crashes.
    pub strategy: Strategy,

    /// Default placement selector.
    pub default_selector: NodeSelector,

    /// Maximum restarts tolerated within `within`.
    pub max_restarts: u32,

    /// Sliding window for the restart intensity limiter.
    pub within: Duration,
}

impl DistSupervisorOptions {
    /// Options with the given id and all defaults.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
            strategy: Strategy::OneForOne,
            default_selector: NodeSelector::LocalFirst,
            max_restarts: DEFAULT_MAX_RESTARTS,
            within: DEFAULT_RESTART_WINDOW,
        }
    }

    /// Append a child.
    pub fn with_child(mut self, spec: DistChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    /// Override the restart strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the default placement selector.
    pub fn with_default_selector(mut self, selector: NodeSelector) -> Self {
        self.default_selector = selector;
        self
    }

    /// Override the restart intensity limits.
    pub fn with_intensity(mut self, max_restarts: u32, within: Duration) -> Self {
        self.max_restarts = max_restarts;
        self.within = within;
        self
    }

    /// Check the options for internal consistency.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.id.is_empty() {
            return Err(ClusterError::InvalidConfig {
                reason: "supervisor id must not be empty".into(),
            });
        }
        if self.id.contains(':') {
            return Err(ClusterError::InvalidConfig {
                reason: "supervisor id must not contain ':'".into(),
            });
        }
        if self.strategy == Strategy::SimpleOneForOne {
            return Err(ClusterError::InvalidConfig {
                reason: "simple_one_for_one is not supported by the distributed supervisor".into(),
            });
        }
        for (index, spec) in self.children.iter().enumerate() {
            if spec.id.is_empty() || spec.id.contains(':') {
                return Err(ClusterError::InvalidConfig {
                    reason: format!("invalid child id '{}'", spec.id),
                });
            }
            if self.children[..index].iter().any(|other| other.id == spec.id) {
                return Err(ClusterError::Supervisor(
                    hearth_rt::SupervisorError::DuplicateChild {
                        id: spec.id.clone(),
                    },
                ));
            }
        }
        Ok(())
    }
}

/// Events emitted by a distributed supervisor.
#[derive(Debug, Clone)]
pub enum DsupEvent {
    /// A child was placed and registered.
    ChildStarted { child_id: String, node: NodeId },

    /// A child was restarted in place after a crash.
    ChildRestarted { child_id: String, node: NodeId },

    /// A child was moved off a failed node.
    ChildMigrated {
        child_id: String,
        from: NodeId,
        to: NodeId,
    },

    /// A node hosting children of this supervisor was lost.
    NodeFailureDetected { node: NodeId },

    /// A failover claim was rejected: the registration belongs to another
    /// supervisor (split-brain protection).
    ClaimRejected { child_id: String, owner: String },

    /// The supervisor shut itself down.
    Terminated { reason: String },
}

/// Point-in-time description of one distributed child.
#[derive(Debug, Clone)]
pub struct DistChildInfo {
    /// Child identifier within the supervisor.
    pub id: String,

    /// Current placement and server id.
    pub handle: RemoteHandle,

    /// How many times this child has been restarted.
    pub restart_count: u32,
}

/// Global-registry key for one child: `dsup:{supervisor_id}:{child_id}`.
pub(crate) fn registration_key(supervisor_id: &str, child_id: &str) -> String {
    format!("{DSUP_KEY_PREFIX}{supervisor_id}:{child_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_key_shape() {
        assert_eq!(registration_key("jobs", "worker-1"), "dsup:jobs:worker-1");
    }

    #[test]
    fn test_validate_rejects_separator_in_id() {
        let options = DistSupervisorOptions::new("has:colon");
        assert!(matches!(
            options.validate(),
            Err(ClusterError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_simple_one_for_one() {
        let options = DistSupervisorOptions::new("jobs").with_strategy(Strategy::SimpleOneForOne);
        assert!(matches!(
            options.validate(),
            Err(ClusterError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_children() {
        let options = DistSupervisorOptions::new("jobs")
            .with_child(DistChildSpec::new("a", "worker"))
            .with_child(DistChildSpec::new("a", "worker"));
        assert!(matches!(
            options.validate(),
            Err(ClusterError::Supervisor(
                hearth_rt::SupervisorError::DuplicateChild { .. }
            ))
        ));
    }

    #[test]
    fn test_child_spec_builder() {
        let spec = DistChildSpec::new("c", "worker")
            .with_args(serde_json::json!({ "shard": 3 }))
            .with_restart(RestartPolicy::Transient)
            .with_selector(NodeSelector::RoundRobin);
        assert_eq!(spec.id, "c");
        assert_eq!(spec.restart, RestartPolicy::Transient);
        assert!(matches!(spec.selector, Some(NodeSelector::RoundRobin)));
    }
}
