//! Type definitions for the supervision engine.
//!
//! This module provides the core types used by supervisors: child
//! specifications, restart policies, strategies, and supervisor options.

// Layer 1: Standard library imports
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use super::error::SupervisorError;
use crate::actor::{ActorCell, ActorError, ActorId, ActorStatus, DEFAULT_SHUTDOWN_TIMEOUT};

/// Default maximum restarts within the intensity window
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Default restart intensity window (5 seconds)
pub const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(5);

/// Default timeout for supervisor startup, covering all child factories
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Factory producing a fresh actor for a supervised child.
pub type ChildFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ActorCell, ActorError>> + Send + Sync>;

/// Factory producing a fresh actor from runtime arguments (dynamic children).
pub type TemplateFactory =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<ActorCell, ActorError>> + Send + Sync>;

/// Restart policy for supervised children.
///
/// Determines when a child is restarted after termination. Based on
/// Erlang/OTP supervisor restart policies.
///
/// # Examples
///
/// ```rust
/// use hearth_rt::RestartPolicy;
///
/// assert!(RestartPolicy::Permanent.should_restart(false)); // even normal exits
/// assert!(RestartPolicy::Transient.should_restart(true));  // abnormal only
/// assert!(!RestartPolicy::Transient.should_restart(false));
/// assert!(!RestartPolicy::Temporary.should_restart(true)); // never
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Always restart, regardless of exit reason.
    Permanent,

    /// Restart only on abnormal exit; normal/shutdown exits remove the child.
    Transient,

    /// Never restart; any exit removes the child.
    Temporary,
}

impl RestartPolicy {
    /// Returns `true` if this policy restarts a child that exited with the
    /// given abnormality.
    pub fn should_restart(&self, abnormal: bool) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => abnormal,
            RestartPolicy::Temporary => false,
        }
    }
}

/// Restart strategy applied when a supervised child fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Restart only the failed child.
    OneForOne,

    /// Stop the remaining children in reverse order, then restart all
    /// children in declaration order.
    OneForAll,

    /// Stop, in reverse order, the failed child and every child declared
    /// after it, then restart them in declaration order.
    RestForOne,

    /// Dynamic variant: no static children; instances of a single template
    /// are added at runtime and restarted individually.
    SimpleOneForOne,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::OneForOne => "one_for_one",
            Strategy::OneForAll => "one_for_all",
            Strategy::RestForOne => "rest_for_one",
            Strategy::SimpleOneForOne => "simple_one_for_one",
        };
        write!(f, "{name}")
    }
}

/// When the supervisor shuts itself down in response to the termination of a
/// significant child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoShutdown {
    /// Significant children have no effect on the supervisor.
    #[default]
    Never,

    /// The first significant child to terminate (without restart) stops the
    /// supervisor.
    AnySignificant,

    /// The last significant child to terminate (without restart) stops the
    /// supervisor.
    AllSignificant,
}

/// Specification of one supervised child.
///
/// The factory is invoked for the initial start and for every restart; each
/// invocation must yield a fresh actor.
///
/// # Examples
///
/// ```ignore
/// let spec = ChildSpec::new("worker", || async { Ok(spawn(Worker).await?.cell()) })
///     .with_restart(RestartPolicy::Transient)
///     .with_shutdown_timeout(Duration::from_secs(10));
/// ```
#[derive(Clone)]
pub struct ChildSpec {
    /// Unique identifier within the supervisor.
    pub id: String,

    /// Factory creating the child actor.
    pub factory: ChildFactory,

    /// When to restart this child.
    pub restart: RestartPolicy,

    /// Grace period for stopping this child before force-termination.
    pub shutdown_timeout: Duration,

    /// Whether this child participates in auto-shutdown.
    pub significant: bool,
}

impl ChildSpec {
    /// Create a spec with defaults: permanent restart, 5 s shutdown timeout,
    /// not significant.
    pub fn new<F, Fut>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActorCell, ActorError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            factory: Arc::new(move || Box::pin(factory())),
            restart: RestartPolicy::Permanent,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            significant: false,
        }
    }

    /// Override the restart policy.
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Override the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Mark this child significant for auto-shutdown purposes.
    pub fn significant(mut self) -> Self {
        self.significant = true;
        self
    }
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("restart", &self.restart)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("significant", &self.significant)
            .finish()
    }
}

/// Template for dynamically added children (`simple_one_for_one`).
///
/// The factory receives the arguments passed to `start_child_args`, both at
/// the initial start and on every restart of that instance.
#[derive(Clone)]
pub struct ChildTemplate {
    /// Factory creating a child from arguments.
    pub factory: TemplateFactory,

    /// Restart policy applied to every dynamic child.
    pub restart: RestartPolicy,

    /// Shutdown timeout applied to every dynamic child.
    pub shutdown_timeout: Duration,
}

impl ChildTemplate {
    /// Create a template with defaults: permanent restart, 5 s shutdown
    /// timeout.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActorCell, ActorError>> + Send + 'static,
    {
        Self {
            factory: Arc::new(move |args| Box::pin(factory(args))),
            restart: RestartPolicy::Permanent,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Override the restart policy.
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Override the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl fmt::Debug for ChildTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildTemplate")
            .field("restart", &self.restart)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

/// Configuration for a supervisor.
///
/// # Examples
///
/// ```ignore
/// let options = SupervisorOptions::new(Strategy::RestForOne)
///     .with_child(db_spec)
///     .with_child(cache_spec)
///     .with_max_restarts(5)
///     .with_within(Duration::from_secs(10));
/// let sup = Supervisor::start(options).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Restart strategy.
    pub strategy: Strategy,

    /// Static children, started in declaration order.
    pub children: Vec<ChildSpec>,

    /// Template for dynamic children (`simple_one_for_one` only).
    pub child_template: Option<ChildTemplate>,

    /// Maximum restarts tolerated within `within`.
    pub max_restarts: u32,

    /// Sliding window for the restart intensity limiter.
    pub within: Duration,

    /// Auto-shutdown policy for significant children.
    pub auto_shutdown: AutoShutdown,

    /// Time budget for starting the supervisor and its static children.
    pub start_timeout: Duration,
}

impl SupervisorOptions {
    /// Options with the given strategy and all defaults.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            children: Vec::new(),
            child_template: None,
            max_restarts: DEFAULT_MAX_RESTARTS,
            within: DEFAULT_RESTART_WINDOW,
            auto_shutdown: AutoShutdown::default(),
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Append a static child.
    pub fn with_child(mut self, spec: ChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    /// Append several static children, preserving order.
    pub fn with_children(mut self, specs: impl IntoIterator<Item = ChildSpec>) -> Self {
        self.children.extend(specs);
        self
    }

    /// Set the dynamic child template.
    pub fn with_child_template(mut self, template: ChildTemplate) -> Self {
        self.child_template = Some(template);
        self
    }

    /// Override the restart intensity maximum.
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Override the restart intensity window.
    pub fn with_within(mut self, within: Duration) -> Self {
        self.within = within;
        self
    }

    /// Set the auto-shutdown policy.
    pub fn with_auto_shutdown(mut self, auto_shutdown: AutoShutdown) -> Self {
        self.auto_shutdown = auto_shutdown;
        self
    }

    /// Override the start timeout.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Check the options for internal consistency.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        match self.strategy {
            Strategy::SimpleOneForOne => {
                if !self.children.is_empty() {
                    return Err(SupervisorError::InvalidSpec {
                        reason: "simple_one_for_one does not accept static children".into(),
                    });
                }
                if self.child_template.is_none() {
                    return Err(SupervisorError::InvalidSpec {
                        reason: "simple_one_for_one requires a child_template".into(),
                    });
                }
            }
            _ => {
                if self.child_template.is_some() {
                    return Err(SupervisorError::InvalidSpec {
                        reason: "child_template is only valid with simple_one_for_one".into(),
                    });
                }
            }
        }

        for (index, spec) in self.children.iter().enumerate() {
            if self.children[..index].iter().any(|other| other.id == spec.id) {
                return Err(SupervisorError::DuplicateChild {
                    id: spec.id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Point-in-time description of one supervised child.
#[derive(Debug, Clone)]
pub struct ChildInfo {
    /// Child identifier within the supervisor.
    pub id: String,

    /// Identifier of the current actor incarnation.
    pub actor_id: ActorId,

    /// Status of the current incarnation.
    pub status: ActorStatus,

    /// How many times this child has been restarted.
    pub restart_count: u32,

    /// Whether the child is significant for auto-shutdown.
    pub significant: bool,
}
