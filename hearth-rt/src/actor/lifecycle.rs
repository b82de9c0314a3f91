//! Actor lifecycle state machine, events, and runtime counters.
//!
//! Status transitions follow a strict machine:
//!
//! ```text
//!              init succeeds
//! Initializing ──────────────▶ Running ──stop──▶ Stopping ──drain──▶ Stopped
//!     │                           │                                    ▲
//!     │ init fails / times out    │ force_terminate(crash)             │
//!     └─────────▶ Stopped         └──▶ Crashed ───────────────────────-┘
//! ```
//!
//! Every terminal transition is announced exactly once through the actor's
//! lifecycle broadcast. A `Crashed` *event* may additionally be published
//! while the actor keeps running, when a `handle_cast` failure is swallowed;
//! supervisors treat that event as a crash signal.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::message::ExitReason;

/// Capacity of the per-actor lifecycle broadcast channel.
const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Identity of one actor incarnation.
///
/// The runtime mints a fresh id at every spawn and never reuses one: when a
/// supervisor replaces a crashed child, the replacement carries a new id,
/// which is how registries, supervisors, and stale-event checks tell a live
/// incarnation apart from the one it superseded. User code only ever
/// receives ids through handles and lifecycle events.
///
/// The `Display` form is the full UUID; [`ActorId::short`] is the
/// 8-character prefix the runtime uses in log output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(Uuid);

impl ActorId {
    /// Mint the id for a new incarnation.
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Abbreviated form for log output.
    pub fn short(&self) -> String {
        let mut text = self.0.simple().to_string();
        text.truncate(8);
        text
    }

    /// The full underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.short())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actor status in the lifecycle state machine.
///
/// # Examples
///
/// ```rust
/// use hearth_rt::ActorStatus;
///
/// assert!(ActorStatus::Running.is_running());
/// assert!(ActorStatus::Stopped.is_terminal());
/// assert!(!ActorStatus::Stopping.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorStatus {
    /// The behavior's `init` callback is running.
    Initializing = 0,

    /// The actor is processing messages.
    Running = 1,

    /// Graceful stop observed; draining the mailbox and running `terminate`.
    Stopping = 2,

    /// The actor exited cleanly.
    Stopped = 3,

    /// The actor exited abnormally.
    Crashed = 4,
}

impl ActorStatus {
    /// Returns `true` once the actor can never process another message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActorStatus::Stopped | ActorStatus::Crashed)
    }

    /// Returns `true` while the actor accepts new messages.
    pub fn is_running(&self) -> bool {
        matches!(self, ActorStatus::Running)
    }

    fn from_u8(value: u8) -> ActorStatus {
        match value {
            0 => ActorStatus::Initializing,
            1 => ActorStatus::Running,
            2 => ActorStatus::Stopping,
            4 => ActorStatus::Crashed,
            _ => ActorStatus::Stopped,
        }
    }
}

/// A lifecycle announcement for one actor.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// The actor this event belongs to.
    pub actor_id: ActorId,

    /// What happened.
    pub kind: LifecycleEventKind,
}

/// Specific lifecycle event types.
#[derive(Debug, Clone)]
pub enum LifecycleEventKind {
    /// `init` succeeded; the actor entered `Running`.
    Started,

    /// A `handle_cast` failure was swallowed; the actor keeps running.
    ///
    /// Supervisors interpret this as a crash of the child.
    Crashed { reason: ExitReason },

    /// The actor reached a terminal status.
    Terminated { reason: ExitReason },
}

impl LifecycleEventKind {
    /// Returns `true` for events a supervisor treats as a child failure.
    pub fn is_failure(&self) -> bool {
        match self {
            LifecycleEventKind::Started => false,
            LifecycleEventKind::Crashed { .. } => true,
            LifecycleEventKind::Terminated { reason } => reason.is_abnormal(),
        }
    }
}

/// Point-in-time counters for one actor.
#[derive(Debug, Clone)]
pub struct ActorStats {
    /// Envelopes currently queued in the mailbox.
    pub queue_len: usize,

    /// Total envelopes handled since start.
    pub messages_handled: u64,

    /// When the actor was spawned.
    pub started_at: DateTime<Utc>,

    /// Size estimate of the behavior state value, in bytes.
    pub state_size_bytes: usize,
}

/// Control signal delivered out-of-band to the mailbox loop.
///
/// Graceful stops take effect between envelopes; kills interrupt the
/// in-flight handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlSignal {
    None,
    Stop(ExitReason),
    Kill(ExitReason),
}

/// State shared between an actor's handles and its mailbox loop.
pub(crate) struct ActorShared {
    id: ActorId,
    status: AtomicU8,
    queue_len: AtomicUsize,
    messages_handled: AtomicU64,
    started_at: DateTime<Utc>,
    state_size_bytes: usize,
    events: broadcast::Sender<LifecycleEvent>,
    control: watch::Sender<ControlSignal>,
    done: watch::Sender<bool>,
    exit_reason: Mutex<Option<ExitReason>>,
    exit_hooks: Mutex<Vec<Box<dyn FnOnce(&ExitReason) + Send>>>,
    finalized: AtomicBool,
}

impl ActorShared {
    pub(crate) fn new(state_size_bytes: usize) -> Self {
        let (events, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let (control, _) = watch::channel(ControlSignal::None);
        let (done, _) = watch::channel(false);
        Self {
            id: ActorId::generate(),
            status: AtomicU8::new(ActorStatus::Initializing as u8),
            queue_len: AtomicUsize::new(0),
            messages_handled: AtomicU64::new(0),
            started_at: Utc::now(),
            state_size_bytes,
            events,
            control,
            done,
            exit_reason: Mutex::new(None),
            exit_hooks: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ActorId {
        self.id
    }

    pub(crate) fn status(&self) -> ActorStatus {
        ActorStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ActorStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn stats(&self) -> ActorStats {
        ActorStats {
            queue_len: self.queue_len.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            started_at: self.started_at,
            state_size_bytes: self.state_size_bytes,
        }
    }

    pub(crate) fn note_enqueued(&self) {
        self.queue_len.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dequeued(&self) {
        let _ = self
            .queue_len
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                n.checked_sub(1)
            });
    }

    pub(crate) fn note_handled(&self) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, kind: LifecycleEventKind) {
        // No receivers is fine; events are best-effort broadcasts.
        let _ = self.events.send(LifecycleEvent {
            timestamp: Utc::now(),
            actor_id: self.id,
            kind,
        });
    }

    pub(crate) fn control_receiver(&self) -> watch::Receiver<ControlSignal> {
        self.control.subscribe()
    }

    /// Request a graceful stop. Returns `false` if the actor is already
    /// stopping or terminal (second stop is a no-op).
    pub(crate) fn request_stop(&self, reason: ExitReason) -> bool {
        let current = self.status();
        if current.is_terminal() || current == ActorStatus::Stopping {
            return false;
        }
        self.set_status(ActorStatus::Stopping);
        self.control.send_if_modified(|signal| {
            if matches!(signal, ControlSignal::None) {
                *signal = ControlSignal::Stop(reason);
                true
            } else {
                false
            }
        })
    }

    /// Request an immediate kill. The status flips to its terminal value at
    /// once so new calls fail fast; the loop drains and finalizes.
    pub(crate) fn request_kill(&self, reason: ExitReason) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        let terminal = if reason.is_abnormal() {
            ActorStatus::Crashed
        } else {
            ActorStatus::Stopped
        };
        self.set_status(terminal);
        *self.exit_reason.lock() = Some(reason.clone());
        self.control.send_if_modified(|signal| {
            if matches!(signal, ControlSignal::Kill(_)) {
                false
            } else {
                *signal = ControlSignal::Kill(reason);
                true
            }
        })
    }

    /// The reason the actor exited, once known.
    pub(crate) fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason.lock().clone()
    }

    pub(crate) fn done_receiver(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Register a callback to run once when the actor reaches a terminal
    /// status. Runs immediately if the actor is already terminal.
    pub(crate) fn on_exit(&self, hook: Box<dyn FnOnce(&ExitReason) + Send>) {
        if self.finalized.load(Ordering::Acquire) {
            let reason = self.exit_reason().unwrap_or(ExitReason::Normal);
            hook(&reason);
            return;
        }
        let mut hooks = self.exit_hooks.lock();
        // Re-check under the lock so a concurrent finalize cannot miss us.
        if self.finalized.load(Ordering::Acquire) {
            drop(hooks);
            let reason = self.exit_reason().unwrap_or(ExitReason::Normal);
            hook(&reason);
        } else {
            hooks.push(hook);
        }
    }

    /// Perform the terminal transition: set status, record the reason, emit
    /// the terminal event, fire exit hooks, and release waiters. Idempotent.
    pub(crate) fn finalize(&self, status: ActorStatus, reason: ExitReason) {
        debug_assert!(status.is_terminal());
        let hooks = {
            let mut hooks = self.exit_hooks.lock();
            if self
                .finalized
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            self.set_status(status);
            *self.exit_reason.lock() = Some(reason.clone());
            std::mem::take(&mut *hooks)
        };
        self.emit(LifecycleEventKind::Terminated {
            reason: reason.clone(),
        });
        for hook in hooks {
            hook(&reason);
        }
        let _ = self.done.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incarnation_ids_are_never_reused() {
        let first = ActorId::generate();
        let second = ActorId::generate();
        assert_ne!(first, second);
    }

    #[test]
    fn test_short_form_prefixes_the_display_form() {
        let id = ActorId::generate();
        let short = id.short();
        assert_eq!(short.len(), 8);
        // The hyphenated display form opens with the same 8 hex digits.
        assert!(id.to_string().starts_with(&short));
        assert_eq!(format!("{id:?}"), format!("ActorId({short})"));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_id_serializes_as_a_uuid_string() {
        let id = ActorId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));

        let back: ActorId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_status_predicates() {
        assert!(ActorStatus::Running.is_running());
        assert!(!ActorStatus::Stopping.is_running());
        assert!(ActorStatus::Stopped.is_terminal());
        assert!(ActorStatus::Crashed.is_terminal());
        assert!(!ActorStatus::Initializing.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ActorStatus::Initializing,
            ActorStatus::Running,
            ActorStatus::Stopping,
            ActorStatus::Stopped,
            ActorStatus::Crashed,
        ] {
            assert_eq!(ActorStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn test_event_kind_failure_classification() {
        assert!(!LifecycleEventKind::Started.is_failure());
        assert!(LifecycleEventKind::Crashed {
            reason: ExitReason::crash("x")
        }
        .is_failure());
        assert!(!LifecycleEventKind::Terminated {
            reason: ExitReason::Shutdown
        }
        .is_failure());
        assert!(LifecycleEventKind::Terminated {
            reason: ExitReason::crash("x")
        }
        .is_failure());
    }

    #[test]
    fn test_shared_stop_is_idempotent() {
        let shared = ActorShared::new(0);
        shared.set_status(ActorStatus::Running);

        assert!(shared.request_stop(ExitReason::Normal));
        assert!(!shared.request_stop(ExitReason::Normal));
        assert_eq!(shared.status(), ActorStatus::Stopping);
    }

    #[test]
    fn test_shared_kill_sets_terminal_status_immediately() {
        let shared = ActorShared::new(0);
        shared.set_status(ActorStatus::Running);

        assert!(shared.request_kill(ExitReason::crash("boom")));
        assert_eq!(shared.status(), ActorStatus::Crashed);
        assert!(!shared.request_kill(ExitReason::Normal));
    }

    #[test]
    fn test_finalize_runs_hooks_once() {
        let shared = ActorShared::new(0);
        let fired = std::sync::Arc::new(AtomicUsize::new(0));

        let counter = std::sync::Arc::clone(&fired);
        shared.on_exit(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        shared.finalize(ActorStatus::Stopped, ExitReason::Normal);
        shared.finalize(ActorStatus::Stopped, ExitReason::Normal);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Late registration fires immediately with the stored reason.
        let counter = std::sync::Arc::clone(&fired);
        shared.on_exit(Box::new(move |reason| {
            assert_eq!(*reason, ExitReason::Normal);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
