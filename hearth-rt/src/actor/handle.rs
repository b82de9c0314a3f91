//! Actor handles: the typed `ActorRef` and the type-erased `ActorCell`.
//!
//! `ActorRef<B>` is what `spawn` returns: it knows the behavior's message
//! types and offers call/cast. `ActorCell` erases the behavior type so that
//! registries and supervisors can hold heterogeneous actors; it still exposes
//! everything that does not need message types (status, stats, stop, kill,
//! lifecycle subscription) and can be downcast back to an `ActorRef<B>`.

// Layer 1: Standard library imports
use std::any::Any;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;

// Layer 3: Internal module imports
use super::behavior::Behavior;
use super::error::ActorError;
use super::lifecycle::{ActorId, ActorShared, ActorStats, ActorStatus, LifecycleEvent};
use super::options::CallOptions;
use crate::message::{Envelope, ExitReason};

/// Typed handle to a running actor.
///
/// Cheap to clone; all clones address the same mailbox. The handle stays
/// valid after the actor terminates — operations then fail with a
/// not-running error (calls) or are dropped silently (casts).
pub struct ActorRef<B: Behavior> {
    sender: mpsc::UnboundedSender<Envelope<B>>,
    shared: Arc<ActorShared>,
}

impl<B: Behavior> Clone for ActorRef<B> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Behavior> std::fmt::Debug for ActorRef<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.shared.id())
            .field("status", &self.shared.status())
            .finish()
    }
}

impl<B: Behavior> ActorRef<B> {
    pub(crate) fn new(
        sender: mpsc::UnboundedSender<Envelope<B>>,
        shared: Arc<ActorShared>,
    ) -> Self {
        Self { sender, shared }
    }

    /// The actor's unique identifier.
    pub fn id(&self) -> ActorId {
        self.shared.id()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ActorStatus {
        self.shared.status()
    }

    /// Returns `true` while the actor accepts new messages.
    pub fn is_running(&self) -> bool {
        self.shared.status().is_running()
    }

    /// Point-in-time runtime counters.
    pub fn stats(&self) -> ActorStats {
        self.shared.stats()
    }

    /// Subscribe to this actor's lifecycle events.
    ///
    /// Dropping the receiver ends the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.subscribe()
    }

    /// Send a synchronous call and wait for the reply with the default
    /// timeout (5 s).
    pub async fn call(&self, msg: B::Call) -> Result<B::Reply, ActorError> {
        self.call_with(msg, CallOptions::default()).await
    }

    /// Send a synchronous call and wait for the reply.
    ///
    /// Fails with `NotRunning` if the actor has left the running state,
    /// `CallTimeout` if the reply does not arrive in time (the in-flight
    /// handler is not cancelled), `Handler` if the behavior returned an
    /// error for this call, or `Terminated` if the actor died while the
    /// call was queued.
    pub async fn call_with(
        &self,
        msg: B::Call,
        options: CallOptions,
    ) -> Result<B::Reply, ActorError> {
        if !self.shared.status().is_running() {
            return Err(ActorError::NotRunning {
                id: self.shared.id(),
            });
        }
        // A zero timeout can never observe a reply.
        if options.timeout.is_zero() {
            return Err(ActorError::CallTimeout {
                timeout: options.timeout,
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope::Call {
            msg,
            reply: reply_tx,
        };
        if self.sender.send(envelope).is_err() {
            return Err(ActorError::NotRunning {
                id: self.shared.id(),
            });
        }
        self.shared.note_enqueued();

        match timeout(options.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            // Reply sink dropped: the actor terminated with this call pending.
            Ok(Err(_)) => Err(ActorError::Terminated {
                reason: self
                    .shared
                    .exit_reason()
                    .unwrap_or(ExitReason::Normal),
            }),
            Err(_) => Err(ActorError::CallTimeout {
                timeout: options.timeout,
            }),
        }
    }

    /// Send a fire-and-forget cast.
    ///
    /// Never fails visibly: if the actor is not running the message is
    /// dropped silently.
    pub fn cast(&self, msg: B::Cast) {
        if !self.shared.status().is_running() {
            return;
        }
        if self.sender.send(Envelope::Cast { msg }).is_ok() {
            self.shared.note_enqueued();
        }
    }

    /// Initiate a graceful stop with reason `Shutdown` and wait for the
    /// drain and `terminate` callback to complete.
    pub async fn stop(&self) {
        self.stop_with(ExitReason::Shutdown).await;
    }

    /// Initiate a graceful stop with the given reason and wait for
    /// completion. A second stop is a no-op that still waits.
    pub async fn stop_with(&self, reason: ExitReason) {
        self.cell().stop_with(reason).await;
    }

    /// Terminate immediately. Pending callers receive an error carrying the
    /// reason; the `terminate` callback does not run.
    pub fn force_terminate(&self, reason: ExitReason) {
        self.shared.request_kill(reason);
    }

    /// Wait until the actor reaches a terminal status.
    pub async fn wait_stopped(&self) {
        self.cell().wait_stopped().await;
    }

    /// The type-erased cell for this actor.
    pub fn cell(&self) -> ActorCell {
        ActorCell {
            shared: Arc::clone(&self.shared),
            sender: Arc::new(self.sender.clone()),
        }
    }
}

/// Type-erased handle to a running actor.
///
/// Registries and supervisors store cells; consumers that know the behavior
/// type can recover the typed handle with [`ActorCell::downcast`].
#[derive(Clone)]
pub struct ActorCell {
    shared: Arc<ActorShared>,
    sender: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for ActorCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorCell")
            .field("id", &self.shared.id())
            .field("status", &self.shared.status())
            .finish()
    }
}

impl ActorCell {
    /// The actor's unique identifier.
    pub fn id(&self) -> ActorId {
        self.shared.id()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ActorStatus {
        self.shared.status()
    }

    /// Returns `true` while the actor accepts new messages.
    pub fn is_running(&self) -> bool {
        self.shared.status().is_running()
    }

    /// Point-in-time runtime counters.
    pub fn stats(&self) -> ActorStats {
        self.shared.stats()
    }

    /// Subscribe to this actor's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.subscribe()
    }

    /// Recover the typed handle, if `B` matches the behavior this actor was
    /// spawned with.
    pub fn downcast<B: Behavior>(&self) -> Option<ActorRef<B>> {
        self.sender
            .downcast_ref::<mpsc::UnboundedSender<Envelope<B>>>()
            .map(|sender| ActorRef::new(sender.clone(), Arc::clone(&self.shared)))
    }

    /// Initiate a graceful stop (reason `Shutdown`) and wait for completion.
    pub async fn stop(&self) {
        self.stop_with(ExitReason::Shutdown).await;
    }

    /// Initiate a graceful stop with the given reason and wait for
    /// completion. Safe to call repeatedly.
    pub async fn stop_with(&self, reason: ExitReason) {
        self.shared.request_stop(reason);
        self.wait_stopped().await;
    }

    /// Terminate immediately with the given reason.
    pub fn force_terminate(&self, reason: ExitReason) {
        self.shared.request_kill(reason);
    }

    /// Wait until the actor reaches a terminal status.
    pub async fn wait_stopped(&self) {
        let mut done = self.shared.done_receiver();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    /// The reason the actor exited, once terminal.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.shared.exit_reason()
    }

    /// Register a callback invoked exactly once when the actor reaches a
    /// terminal status. Runs immediately if already terminal.
    pub fn on_exit(&self, hook: impl FnOnce(&ExitReason) + Send + 'static) {
        self.shared.on_exit(Box::new(hook));
    }
}
