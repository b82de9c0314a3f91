//! Mailbox envelopes and exit reasons.
//!
//! Every message delivered to an actor travels inside an [`Envelope`]: either
//! a call carrying a reply sink back to the waiting caller, or a
//! fire-and-forget cast. The [`ExitReason`] type classifies why an actor left
//! the running state and drives restart-policy decisions in the supervisor.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

// Layer 3: Internal module imports
use crate::actor::behavior::Behavior;
use crate::actor::error::ActorError;

/// Why an actor terminated (or is terminating).
///
/// `Normal` and `Shutdown` are the graceful exits; anything else is a crash.
/// Restart policies distinguish only graceful from abnormal, so the crash
/// payload is a plain description rather than a typed error.
///
/// # Examples
///
/// ```rust
/// use hearth_rt::ExitReason;
///
/// assert!(!ExitReason::Normal.is_abnormal());
/// assert!(!ExitReason::Shutdown.is_abnormal());
/// assert!(ExitReason::Crash("boom".into()).is_abnormal());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExitReason {
    /// The actor finished its work and exited cleanly.
    Normal,

    /// The actor was asked to stop by its owner (supervisor or user code).
    Shutdown,

    /// The actor terminated abnormally.
    Crash(String),
}

impl ExitReason {
    /// Returns `true` for crash exits, `false` for `Normal`/`Shutdown`.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, ExitReason::Crash(_))
    }

    /// Convenience constructor for crash reasons.
    pub fn crash(reason: impl Into<String>) -> Self {
        ExitReason::Crash(reason.into())
    }
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Crash(detail) => write!(f, "crash: {detail}"),
        }
    }
}

/// Reply sink handed to the mailbox loop for a pending call.
pub(crate) type ReplySink<B> =
    oneshot::Sender<Result<<B as Behavior>::Reply, ActorError>>;

/// A queued mailbox entry.
///
/// Calls carry the reply sink of the blocked caller; the mailbox loop either
/// delivers the handler result through it or fails it during drain. Casts
/// carry only the message.
pub(crate) enum Envelope<B: Behavior> {
    Call {
        msg: B::Call,
        reply: ReplySink<B>,
    },
    Cast {
        msg: B::Cast,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_abnormal() {
        assert!(!ExitReason::Normal.is_abnormal());
        assert!(!ExitReason::Shutdown.is_abnormal());
        assert!(ExitReason::crash("worker panicked").is_abnormal());
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::Normal.to_string(), "normal");
        assert_eq!(ExitReason::Shutdown.to_string(), "shutdown");
        assert_eq!(
            ExitReason::crash("io failure").to_string(),
            "crash: io failure"
        );
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_exit_reason_serialization() {
        let json = serde_json::to_string(&ExitReason::crash("oops")).expect("serialize");
        assert!(json.contains("crash"));
        assert!(json.contains("oops"));

        let parsed: ExitReason = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, ExitReason::crash("oops"));
    }
}
