//! Spawning and the mailbox loop.
//!
//! `spawn` runs the behavior's `init` under the init timeout and, on
//! success, starts a single tokio task that owns the behavior and its state.
//! That task is the only place handler code ever runs, which is what makes
//! the one-message-at-a-time guarantee hold: envelopes are dequeued in FIFO
//! order and the next dequeue cannot happen before the current handler
//! returned (or the actor was killed).

// Layer 1: Standard library imports
use std::mem;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::warn;

// Layer 3: Internal module imports
use super::behavior::Behavior;
use super::error::ActorError;
use super::handle::ActorRef;
use super::lifecycle::{ActorShared, ActorStatus, ControlSignal, LifecycleEventKind};
use super::options::SpawnOptions;
use crate::message::{Envelope, ExitReason};

/// Spawn an actor with default options.
///
/// See [`spawn_with`].
pub async fn spawn<B: Behavior>(behavior: B) -> Result<ActorRef<B>, ActorError> {
    spawn_with(behavior, SpawnOptions::default()).await
}

/// Spawn an actor.
///
/// Invokes `init` under the configured init timeout. On success the actor
/// enters `Running` and a handle is returned; on failure or timeout the
/// actor is finalized as `Stopped` and the spawn fails with an
/// initialization error.
pub async fn spawn_with<B: Behavior>(
    mut behavior: B,
    options: SpawnOptions,
) -> Result<ActorRef<B>, ActorError> {
    let shared = Arc::new(ActorShared::new(mem::size_of::<B::State>()));

    let state = match timeout(options.init_timeout, behavior.init()).await {
        Ok(Ok(state)) => state,
        Ok(Err(err)) => {
            let reason = err.to_string();
            shared.finalize(ActorStatus::Stopped, ExitReason::crash(reason.clone()));
            return Err(ActorError::InitFailed { reason });
        }
        Err(_) => {
            shared.finalize(
                ActorStatus::Stopped,
                ExitReason::crash(format!(
                    "init timed out after {:?}",
                    options.init_timeout
                )),
            );
            return Err(ActorError::InitTimeout {
                timeout: options.init_timeout,
            });
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    shared.set_status(ActorStatus::Running);
    shared.emit(LifecycleEventKind::Started);

    let handle = ActorRef::new(tx, Arc::clone(&shared));
    tokio::spawn(run_loop(behavior, state, rx, shared));
    Ok(handle)
}

/// How the mailbox loop ended.
enum LoopExit {
    /// Graceful stop: drain, run `terminate`, finalize.
    Graceful(ExitReason),

    /// Kill: drain with errors, skip `terminate`, finalize.
    Killed(ExitReason),
}

/// Resolves once the control channel carries a kill signal.
async fn kill_signalled(control: &mut watch::Receiver<ControlSignal>) {
    loop {
        if matches!(&*control.borrow(), ControlSignal::Kill(_)) {
            return;
        }
        if control.changed().await.is_err() {
            // Control sender lives in ActorShared which the loop owns, so
            // this cannot happen while the loop runs; park defensively.
            std::future::pending::<()>().await;
        }
    }
}

async fn run_loop<B: Behavior>(
    mut behavior: B,
    mut state: B::State,
    mut mailbox: mpsc::UnboundedReceiver<Envelope<B>>,
    shared: Arc<ActorShared>,
) {
    let mut control = shared.control_receiver();

    let exit = loop {
        // Observe stop/kill between envelopes; a stop issued while a handler
        // ran takes effect here, before the next dequeue.
        let signal = control.borrow_and_update().clone();
        match signal {
            ControlSignal::Stop(reason) => break LoopExit::Graceful(reason),
            ControlSignal::Kill(reason) => break LoopExit::Killed(reason),
            ControlSignal::None => {}
        }

        let envelope = tokio::select! {
            biased;
            changed = control.changed() => {
                if changed.is_err() {
                    break LoopExit::Graceful(ExitReason::Normal);
                }
                continue;
            }
            maybe = mailbox.recv() => match maybe {
                Some(envelope) => envelope,
                // Every handle is gone; nothing can ever arrive again.
                None => break LoopExit::Graceful(ExitReason::Normal),
            },
        };
        shared.note_dequeued();

        match envelope {
            Envelope::Call { msg, reply } => {
                let result = tokio::select! {
                    biased;
                    _ = kill_signalled(&mut control) => {
                        let reason = shared
                            .exit_reason()
                            .unwrap_or(ExitReason::Shutdown);
                        let _ = reply.send(Err(ActorError::Terminated {
                            reason: reason.clone(),
                        }));
                        break LoopExit::Killed(reason);
                    }
                    result = behavior.handle_call(msg, &mut state) => result,
                };
                shared.note_handled();
                match result {
                    Ok(value) => {
                        // Caller may have timed out and dropped the receiver.
                        let _ = reply.send(Ok(value));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(ActorError::Handler {
                            reason: err.to_string(),
                        }));
                    }
                }
            }
            Envelope::Cast { msg } => {
                let result = tokio::select! {
                    biased;
                    _ = kill_signalled(&mut control) => {
                        let reason = shared
                            .exit_reason()
                            .unwrap_or(ExitReason::Shutdown);
                        break LoopExit::Killed(reason);
                    }
                    result = behavior.handle_cast(msg, &mut state) => result,
                };
                shared.note_handled();
                if let Err(err) = result {
                    warn!(
                        actor = %shared.id().short(),
                        error = %err,
                        "cast handler failed; actor continues"
                    );
                    shared.emit(LifecycleEventKind::Crashed {
                        reason: ExitReason::crash(err.to_string()),
                    });
                }
            }
        }
    };

    match exit {
        LoopExit::Graceful(reason) => {
            drain_mailbox(&mut mailbox, &shared, |_| ActorError::NotRunning {
                id: shared.id(),
            });
            if let Err(err) = behavior.terminate(&reason, &mut state).await {
                warn!(
                    actor = %shared.id().short(),
                    error = %err,
                    "terminate callback failed during shutdown"
                );
            }
            let status = if reason.is_abnormal() {
                ActorStatus::Crashed
            } else {
                ActorStatus::Stopped
            };
            shared.finalize(status, reason);
        }
        LoopExit::Killed(reason) => {
            drain_mailbox(&mut mailbox, &shared, |reason| ActorError::Terminated {
                reason,
            });
            let status = if reason.is_abnormal() {
                ActorStatus::Crashed
            } else {
                ActorStatus::Stopped
            };
            shared.finalize(status, reason);
        }
    }
}

/// Reject everything still queued. Calls receive the error produced by
/// `make_error`; casts are dropped.
fn drain_mailbox<B: Behavior>(
    mailbox: &mut mpsc::UnboundedReceiver<Envelope<B>>,
    shared: &ActorShared,
    make_error: impl Fn(ExitReason) -> ActorError,
) {
    mailbox.close();
    while let Ok(envelope) = mailbox.try_recv() {
        shared.note_dequeued();
        if let Envelope::Call { reply, .. } = envelope {
            let reason = shared.exit_reason().unwrap_or(ExitReason::Shutdown);
            let _ = reply.send(Err(make_error(reason)));
        }
    }
}
