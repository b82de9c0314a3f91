//! The supervision engine.
//!
//! A supervisor is itself an actor: dynamic operations arrive as calls and
//! child-exit notifications as casts, so every restart decision runs
//! serialized inside the supervisor's own mailbox loop and is atomic with
//! respect to all other supervisor operations.
//!
//! Each child is watched by a small forwarding task subscribed to the
//! child's lifecycle events. The first failure or terminal event is pushed
//! into the supervisor's monitor channel, which an external pump turns into
//! a cast (the behavior cannot address its own mailbox directly).

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

// Layer 3: Internal module imports
use super::error::SupervisorError;
use super::intensity::RestartWindow;
use super::types::{
    AutoShutdown, ChildFactory, ChildInfo, ChildSpec, ChildTemplate, RestartPolicy, Strategy,
    SupervisorOptions,
};
use crate::actor::{ActorCell, ActorError, ActorId, Behavior, LifecycleEventKind};
use crate::message::ExitReason;

/// Requests handled synchronously by the supervisor actor.
pub(crate) enum SupervisorCall {
    StartChild(ChildSpec),
    StartDynamic(Value),
    TerminateChild(String),
    RestartChild(String),
    GetChild(String),
    GetChildren,
    CountChildren,
}

/// Replies produced by [`SupervisorCall`] operations.
pub(crate) enum SupervisorReply {
    Child(ActorCell),
    Dynamic { id: String, cell: ActorCell },
    Done,
    Children(Vec<ChildInfo>),
    Count(usize),
}

/// Asynchronous notifications handled by the supervisor actor.
pub(crate) enum SupervisorCast {
    ChildDown {
        id: String,
        actor_id: ActorId,
        reason: ExitReason,
    },
}

/// Messages flowing from watcher tasks (and the engine itself) to the pump.
pub(crate) enum MonitorMsg {
    ChildDown {
        id: String,
        actor_id: ActorId,
        reason: ExitReason,
    },
    /// Graceful self-stop (auto-shutdown on significant child exit).
    StopSelf(ExitReason),
    /// Abnormal self-termination (restart intensity breached).
    Escalate(ExitReason),
}

/// How a child entry is (re)started.
enum StartSource {
    Factory(ChildFactory),
    /// Dynamic child: the template is in [`SupState`], these are its args.
    Template(Value),
}

/// Bookkeeping for one supervised child.
struct ChildEntry {
    id: String,
    source: StartSource,
    restart: RestartPolicy,
    shutdown_timeout: Duration,
    significant: bool,
    cell: ActorCell,
    restart_count: u32,
    watcher: JoinHandle<()>,
}

/// The supervisor actor's state.
pub(crate) struct SupState {
    strategy: Strategy,
    entries: Vec<ChildEntry>,
    template: Option<ChildTemplate>,
    window: RestartWindow,
    auto_shutdown: AutoShutdown,
    next_dynamic: u64,
    notify: mpsc::UnboundedSender<MonitorMsg>,
    stopping: bool,
}

/// Behavior driving a supervisor actor.
pub(crate) struct SupervisorBehavior {
    options: Option<SupervisorOptions>,
    notify: mpsc::UnboundedSender<MonitorMsg>,
}

impl SupervisorBehavior {
    pub(crate) fn new(
        options: SupervisorOptions,
        notify: mpsc::UnboundedSender<MonitorMsg>,
    ) -> Self {
        Self {
            options: Some(options),
            notify,
        }
    }
}

#[async_trait]
impl Behavior for SupervisorBehavior {
    type State = SupState;
    type Call = SupervisorCall;
    type Reply = Result<SupervisorReply, SupervisorError>;
    type Cast = SupervisorCast;
    type Error = SupervisorError;

    async fn init(&mut self) -> Result<SupState, SupervisorError> {
        let options = self.options.take().ok_or(SupervisorError::Internal {
            reason: "supervisor behavior started twice".into(),
        })?;
        Ok(SupState {
            strategy: options.strategy,
            entries: Vec::new(),
            template: options.child_template,
            window: RestartWindow::new(options.max_restarts, options.within),
            auto_shutdown: options.auto_shutdown,
            next_dynamic: 0,
            notify: self.notify.clone(),
            stopping: false,
        })
    }

    async fn handle_call(
        &mut self,
        msg: SupervisorCall,
        state: &mut SupState,
    ) -> Result<Self::Reply, SupervisorError> {
        Ok(match msg {
            SupervisorCall::StartChild(spec) => start_child_op(state, spec).await,
            SupervisorCall::StartDynamic(args) => start_dynamic_op(state, args).await,
            SupervisorCall::TerminateChild(id) => terminate_child_op(state, &id).await,
            SupervisorCall::RestartChild(id) => restart_child_op(state, &id).await,
            SupervisorCall::GetChild(id) => state
                .entries
                .iter()
                .find(|entry| entry.id == id)
                .map(|entry| SupervisorReply::Child(entry.cell.clone()))
                .ok_or(SupervisorError::ChildNotFound { id }),
            SupervisorCall::GetChildren => Ok(SupervisorReply::Children(child_infos(state))),
            SupervisorCall::CountChildren => Ok(SupervisorReply::Count(state.entries.len())),
        })
    }

    async fn handle_cast(
        &mut self,
        msg: SupervisorCast,
        state: &mut SupState,
    ) -> Result<(), SupervisorError> {
        let SupervisorCast::ChildDown {
            id,
            actor_id,
            reason,
        } = msg;
        if state.stopping {
            return Ok(());
        }
        // Stale notifications (terminated children, replaced incarnations)
        // carry an actor id that no longer matches the entry.
        let Some(index) = state
            .entries
            .iter()
            .position(|entry| entry.id == id && entry.cell.id() == actor_id)
        else {
            return Ok(());
        };

        debug!(child = %id, %reason, "supervised child went down");

        if !state.entries[index]
            .restart
            .should_restart(reason.is_abnormal())
        {
            let entry = state.entries.remove(index);
            entry.watcher.abort();
            // After a swallowed cast failure the old incarnation may still
            // be running; make sure it is gone.
            entry.cell.force_terminate(ExitReason::Shutdown);
            check_auto_shutdown(state, &entry);
            return Ok(());
        }

        apply_restart(state, index).await;
        Ok(())
    }

    async fn terminate(
        &mut self,
        _reason: &ExitReason,
        state: &mut SupState,
    ) -> Result<(), SupervisorError> {
        state.stopping = true;
        // Reverse declaration order.
        while let Some(entry) = state.entries.pop() {
            entry.watcher.abort();
            stop_cell(&entry.cell, entry.shutdown_timeout).await;
        }
        Ok(())
    }
}

async fn start_child_op(
    state: &mut SupState,
    spec: ChildSpec,
) -> Result<SupervisorReply, SupervisorError> {
    if state.strategy == Strategy::SimpleOneForOne {
        return Err(SupervisorError::InvalidSpec {
            reason: "simple_one_for_one children are started with arguments".into(),
        });
    }
    if state.entries.iter().any(|entry| entry.id == spec.id) {
        return Err(SupervisorError::DuplicateChild { id: spec.id });
    }

    let cell = (spec.factory)()
        .await
        .map_err(|source| SupervisorError::ChildStartFailed {
            id: spec.id.clone(),
            source,
        })?;
    let watcher = spawn_watcher(spec.id.clone(), &cell, state.notify.clone());
    state.entries.push(ChildEntry {
        id: spec.id,
        source: StartSource::Factory(spec.factory),
        restart: spec.restart,
        shutdown_timeout: spec.shutdown_timeout,
        significant: spec.significant,
        cell: cell.clone(),
        restart_count: 0,
        watcher,
    });
    Ok(SupervisorReply::Child(cell))
}

async fn start_dynamic_op(
    state: &mut SupState,
    args: Value,
) -> Result<SupervisorReply, SupervisorError> {
    let template = match (state.strategy, &state.template) {
        (Strategy::SimpleOneForOne, Some(template)) => template.clone(),
        _ => {
            return Err(SupervisorError::InvalidSpec {
                reason: "dynamic children require the simple_one_for_one strategy".into(),
            })
        }
    };

    let id = format!("child-{}", state.next_dynamic);
    state.next_dynamic += 1;

    let cell = (template.factory)(args.clone()).await.map_err(|source| {
        SupervisorError::ChildStartFailed {
            id: id.clone(),
            source,
        }
    })?;
    let watcher = spawn_watcher(id.clone(), &cell, state.notify.clone());
    state.entries.push(ChildEntry {
        id: id.clone(),
        source: StartSource::Template(args),
        restart: template.restart,
        shutdown_timeout: template.shutdown_timeout,
        significant: false,
        cell: cell.clone(),
        restart_count: 0,
        watcher,
    });
    Ok(SupervisorReply::Dynamic { id, cell })
}

async fn terminate_child_op(
    state: &mut SupState,
    id: &str,
) -> Result<SupervisorReply, SupervisorError> {
    let index = state
        .entries
        .iter()
        .position(|entry| entry.id == id)
        .ok_or_else(|| SupervisorError::ChildNotFound { id: id.to_string() })?;

    let entry = state.entries.remove(index);
    entry.watcher.abort();
    stop_cell(&entry.cell, entry.shutdown_timeout).await;
    Ok(SupervisorReply::Done)
}

async fn restart_child_op(
    state: &mut SupState,
    id: &str,
) -> Result<SupervisorReply, SupervisorError> {
    let index = state
        .entries
        .iter()
        .position(|entry| entry.id == id)
        .ok_or_else(|| SupervisorError::ChildNotFound { id: id.to_string() })?;

    {
        let entry = &state.entries[index];
        entry.watcher.abort();
        stop_cell(&entry.cell, entry.shutdown_timeout).await;
    }

    let template = state.template.clone();
    let result = start_cell(&state.entries[index].source, template.as_ref()).await;
    match result {
        Ok(cell) => {
            let watcher = spawn_watcher(
                state.entries[index].id.clone(),
                &cell,
                state.notify.clone(),
            );
            let entry = &mut state.entries[index];
            entry.cell = cell.clone();
            entry.watcher = watcher;
            entry.restart_count += 1;
            Ok(SupervisorReply::Child(cell))
        }
        Err(source) => {
            let entry = state.entries.remove(index);
            Err(SupervisorError::ChildStartFailed {
                id: entry.id,
                source,
            })
        }
    }
}

/// Apply the configured strategy after the child at `index` failed.
async fn apply_restart(state: &mut SupState, index: usize) {
    let indices: Vec<usize> = match state.strategy {
        Strategy::OneForOne | Strategy::SimpleOneForOne => vec![index],
        Strategy::OneForAll => (0..state.entries.len()).collect(),
        Strategy::RestForOne => (index..state.entries.len()).collect(),
    };

    // One intensity token per triggering failure, independent of how many
    // siblings the strategy takes down with it.
    if !state.window.record() {
        escalate_max_restarts(state).await;
        return;
    }

    // Stop victims in reverse declaration order.
    for &i in indices.iter().rev() {
        let entry = &state.entries[i];
        entry.watcher.abort();
        if i == index {
            // The failed child: the old incarnation may still be running
            // after a swallowed cast failure.
            entry.cell.force_terminate(ExitReason::Shutdown);
        } else {
            stop_cell(&entry.cell, entry.shutdown_timeout).await;
        }
    }

    // Restart in declaration order. A failing factory consumes another
    // intensity token per attempt and eventually shuts the supervisor down.
    let template = state.template.clone();
    for &i in indices.iter() {
        loop {
            let result = start_cell(&state.entries[i].source, template.as_ref()).await;
            match result {
                Ok(cell) => {
                    let watcher =
                        spawn_watcher(state.entries[i].id.clone(), &cell, state.notify.clone());
                    let entry = &mut state.entries[i];
                    entry.cell = cell;
                    entry.watcher = watcher;
                    if i == index {
                        entry.restart_count += 1;
                    }
                    break;
                }
                Err(err) => {
                    warn!(child = %state.entries[i].id, error = %err, "restart attempt failed");
                    if !state.window.record() {
                        escalate_max_restarts(state).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Intensity breached: stop everything and terminate the supervisor with
/// `MaxRestartsExceeded`.
async fn escalate_max_restarts(state: &mut SupState) {
    let failure = SupervisorError::MaxRestartsExceeded {
        max_restarts: state.window.max_restarts(),
        within: state.window.within(),
    };
    error!(error = %failure, "supervisor exceeded restart intensity; shutting down");

    state.stopping = true;
    while let Some(entry) = state.entries.pop() {
        entry.watcher.abort();
        stop_cell(&entry.cell, entry.shutdown_timeout).await;
    }
    let _ = state
        .notify
        .send(MonitorMsg::Escalate(ExitReason::crash(failure.to_string())));
}

fn check_auto_shutdown(state: &mut SupState, removed: &ChildEntry) {
    if !removed.significant {
        return;
    }
    let trigger = match state.auto_shutdown {
        AutoShutdown::Never => false,
        AutoShutdown::AnySignificant => true,
        AutoShutdown::AllSignificant => !state.entries.iter().any(|entry| entry.significant),
    };
    if trigger {
        debug!(child = %removed.id, "significant child terminated; supervisor auto-shutdown");
        state.stopping = true;
        let _ = state
            .notify
            .send(MonitorMsg::StopSelf(ExitReason::Shutdown));
    }
}

async fn start_cell(
    source: &StartSource,
    template: Option<&ChildTemplate>,
) -> Result<ActorCell, ActorError> {
    match source {
        StartSource::Factory(factory) => (factory)().await,
        StartSource::Template(args) => match template {
            Some(template) => (template.factory)(args.clone()).await,
            None => Err(ActorError::InitFailed {
                reason: "dynamic child without a template".into(),
            }),
        },
    }
}

fn child_infos(state: &SupState) -> Vec<ChildInfo> {
    state
        .entries
        .iter()
        .map(|entry| ChildInfo {
            id: entry.id.clone(),
            actor_id: entry.cell.id(),
            status: entry.cell.status(),
            restart_count: entry.restart_count,
            significant: entry.significant,
        })
        .collect()
}

/// Watch one child incarnation and forward its first failure or terminal
/// event to the supervisor.
fn spawn_watcher(
    id: String,
    cell: &ActorCell,
    notify: mpsc::UnboundedSender<MonitorMsg>,
) -> JoinHandle<()> {
    let mut events = cell.subscribe();
    let actor_id = cell.id();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.kind {
                    LifecycleEventKind::Started => {}
                    LifecycleEventKind::Crashed { reason }
                    | LifecycleEventKind::Terminated { reason } => {
                        let _ = notify.send(MonitorMsg::ChildDown {
                            id,
                            actor_id,
                            reason,
                        });
                        return;
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Stop a child gracefully within `grace`, force-terminating on overrun.
pub(crate) async fn stop_cell(cell: &ActorCell, grace: Duration) {
    if cell.status().is_terminal() {
        return;
    }
    if timeout(grace, cell.stop_with(ExitReason::Shutdown)).await.is_err() {
        warn!(
            actor = %cell.id().short(),
            grace = ?grace,
            "child did not stop within its shutdown timeout; force-terminating"
        );
        cell.force_terminate(ExitReason::Shutdown);
        cell.wait_stopped().await;
    }
}
