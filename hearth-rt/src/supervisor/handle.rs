//! Public supervisor API: `Supervisor::start` and `SupervisorRef`.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

// Layer 3: Internal module imports
use super::core::{
    MonitorMsg, SupervisorBehavior, SupervisorCall, SupervisorCast, SupervisorReply,
};
use super::error::SupervisorError;
use super::types::{ChildInfo, ChildSpec, SupervisorOptions};
use crate::actor::{
    spawn_with, ActorCell, ActorId, ActorRef, CallOptions, LifecycleEvent, SpawnOptions,
};
use crate::message::ExitReason;

/// Entry point for starting supervisors.
pub struct Supervisor;

impl Supervisor {
    /// Start a supervisor.
    ///
    /// Static children are started sequentially in declaration order. If any
    /// child factory fails, the children already started are stopped in
    /// reverse order and this call fails with `ChildStartFailed`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let sup = Supervisor::start(
    ///     SupervisorOptions::new(Strategy::OneForOne)
    ///         .with_child(ChildSpec::new("worker", make_worker)),
    /// )
    /// .await?;
    /// ```
    pub async fn start(options: SupervisorOptions) -> Result<SupervisorRef, SupervisorError> {
        options.validate()?;

        let mut options = options;
        let children = std::mem::take(&mut options.children);
        let op_timeout = options.start_timeout;

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let behavior = SupervisorBehavior::new(options, notify_tx);
        let actor = spawn_with(behavior, SpawnOptions::default())
            .await
            .map_err(|err| SupervisorError::Internal {
                reason: err.to_string(),
            })?;
        tokio::spawn(pump(notify_rx, actor.clone()));

        let supervisor = SupervisorRef { actor, op_timeout };
        for spec in children {
            if let Err(err) = supervisor.start_child(spec).await {
                // Roll back: stopping the supervisor stops the children
                // already started, in reverse order.
                supervisor.stop().await;
                return Err(err);
            }
        }
        Ok(supervisor)
    }
}

/// Forward monitor messages into the supervisor's mailbox.
///
/// Watcher tasks cannot cast directly (the behavior has no handle to its own
/// actor while it is being constructed), so they funnel through this pump.
async fn pump(
    mut rx: mpsc::UnboundedReceiver<MonitorMsg>,
    actor: ActorRef<SupervisorBehavior>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            MonitorMsg::ChildDown {
                id,
                actor_id,
                reason,
            } => actor.cast(SupervisorCast::ChildDown {
                id,
                actor_id,
                reason,
            }),
            MonitorMsg::StopSelf(reason) => {
                actor.cell().stop_with(reason).await;
            }
            MonitorMsg::Escalate(reason) => actor.force_terminate(reason),
        }
    }
}

/// Handle to a running supervisor.
///
/// Cheap to clone. Supervisors do not stop when their handles are dropped;
/// call [`SupervisorRef::stop`] (or stop the parent supervisor) to tear one
/// down.
#[derive(Clone)]
pub struct SupervisorRef {
    actor: ActorRef<SupervisorBehavior>,
    op_timeout: Duration,
}

impl std::fmt::Debug for SupervisorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorRef")
            .field("id", &self.actor.id())
            .field("status", &self.actor.status())
            .finish()
    }
}

impl SupervisorRef {
    /// Recover a supervisor handle from a type-erased cell.
    ///
    /// Returns `None` if the cell does not belong to a supervisor actor.
    /// Useful when a supervisor is itself a supervised child and only its
    /// cell is at hand.
    pub fn from_cell(cell: &ActorCell) -> Option<SupervisorRef> {
        cell.downcast::<SupervisorBehavior>().map(|actor| SupervisorRef {
            actor,
            op_timeout: super::types::DEFAULT_START_TIMEOUT,
        })
    }

    async fn op(&self, call: SupervisorCall) -> Result<SupervisorReply, SupervisorError> {
        match self
            .actor
            .call_with(call, CallOptions::default().with_timeout(self.op_timeout))
            .await
        {
            Ok(reply) => reply,
            Err(err) if err.is_not_running() => Err(SupervisorError::NotRunning),
            Err(err) => Err(SupervisorError::Internal {
                reason: err.to_string(),
            }),
        }
    }

    /// Add and start a child.
    ///
    /// Fails with `DuplicateChild` if the id is taken and `ChildStartFailed`
    /// if the factory fails.
    pub async fn start_child(&self, spec: ChildSpec) -> Result<ActorCell, SupervisorError> {
        match self.op(SupervisorCall::StartChild(spec)).await? {
            SupervisorReply::Child(cell) => Ok(cell),
            _ => Err(SupervisorError::Internal {
                reason: "unexpected reply to start_child".into(),
            }),
        }
    }

    /// Add and start a dynamic child from the template
    /// (`simple_one_for_one` only). Returns the generated child id and the
    /// new actor.
    pub async fn start_child_args(
        &self,
        args: Value,
    ) -> Result<(String, ActorCell), SupervisorError> {
        match self.op(SupervisorCall::StartDynamic(args)).await? {
            SupervisorReply::Dynamic { id, cell } => Ok((id, cell)),
            _ => Err(SupervisorError::Internal {
                reason: "unexpected reply to start_child_args".into(),
            }),
        }
    }

    /// Stop a child and remove it from the supervisor.
    pub async fn terminate_child(&self, id: &str) -> Result<(), SupervisorError> {
        match self.op(SupervisorCall::TerminateChild(id.to_string())).await? {
            SupervisorReply::Done => Ok(()),
            _ => Err(SupervisorError::Internal {
                reason: "unexpected reply to terminate_child".into(),
            }),
        }
    }

    /// Stop and restart a child, returning the new actor.
    pub async fn restart_child(&self, id: &str) -> Result<ActorCell, SupervisorError> {
        match self.op(SupervisorCall::RestartChild(id.to_string())).await? {
            SupervisorReply::Child(cell) => Ok(cell),
            _ => Err(SupervisorError::Internal {
                reason: "unexpected reply to restart_child".into(),
            }),
        }
    }

    /// The current actor cell of a child.
    ///
    /// Returns the live incarnation; after a restart this is the
    /// replacement, not the original handle.
    pub async fn child_cell(&self, id: &str) -> Result<ActorCell, SupervisorError> {
        match self.op(SupervisorCall::GetChild(id.to_string())).await? {
            SupervisorReply::Child(cell) => Ok(cell),
            _ => Err(SupervisorError::Internal {
                reason: "unexpected reply to child_cell".into(),
            }),
        }
    }

    /// Describe all current children in declaration order.
    pub async fn get_children(&self) -> Result<Vec<ChildInfo>, SupervisorError> {
        match self.op(SupervisorCall::GetChildren).await? {
            SupervisorReply::Children(infos) => Ok(infos),
            _ => Err(SupervisorError::Internal {
                reason: "unexpected reply to get_children".into(),
            }),
        }
    }

    /// Number of current children.
    pub async fn count_children(&self) -> Result<usize, SupervisorError> {
        match self.op(SupervisorCall::CountChildren).await? {
            SupervisorReply::Count(count) => Ok(count),
            _ => Err(SupervisorError::Internal {
                reason: "unexpected reply to count_children".into(),
            }),
        }
    }

    /// Stop the supervisor gracefully: children are stopped in reverse
    /// declaration order before this returns.
    pub async fn stop(&self) {
        self.actor.cell().stop_with(ExitReason::Shutdown).await;
    }

    /// Returns `true` while the supervisor is running.
    pub fn is_running(&self) -> bool {
        self.actor.is_running()
    }

    /// The supervisor's own actor id.
    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    /// Subscribe to the supervisor's own lifecycle events (e.g. the
    /// abnormal termination after `MaxRestartsExceeded`).
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.actor.subscribe()
    }

    /// The supervisor's exit reason, once terminated.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.actor.cell().exit_reason()
    }

    /// The type-erased cell of the supervisor actor.
    ///
    /// Lets a supervisor be supervised: return this from a child factory.
    pub fn cell(&self) -> ActorCell {
        self.actor.cell()
    }
}
