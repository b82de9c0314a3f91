//! Error types for actor operations.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::lifecycle::ActorId;
use crate::message::ExitReason;

/// Errors that can occur when starting or interacting with an actor.
///
/// All variants carry enough context to diagnose the failure without the
/// original call site. Handler errors are transported as strings because the
/// behavior's error type is erased at the mailbox boundary.
///
/// # Examples
///
/// ```rust
/// use hearth_rt::ActorError;
/// use std::time::Duration;
///
/// let err = ActorError::CallTimeout { timeout: Duration::from_secs(5) };
/// assert!(err.is_timeout());
/// assert!(!err.is_not_running());
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActorError {
    /// The behavior's `init` callback returned an error; the actor never
    /// reached the running state.
    #[error("actor initialization failed: {reason}")]
    InitFailed { reason: String },

    /// The behavior's `init` callback did not complete within the init
    /// timeout; the actor never reached the running state.
    #[error("actor initialization timed out after {timeout:?}")]
    InitTimeout { timeout: Duration },

    /// A call did not receive its reply within the caller's timeout.
    ///
    /// The in-flight handler is not cancelled; only the caller is released.
    #[error("call timed out after {timeout:?}")]
    CallTimeout { timeout: Duration },

    /// The target actor has left the running state.
    #[error("actor {id} is not running")]
    NotRunning { id: ActorId },

    /// The behavior's `handle_call` returned an error for this call.
    ///
    /// The actor itself keeps running; only this caller observes the failure.
    #[error("call handler failed: {reason}")]
    Handler { reason: String },

    /// The actor terminated while the call was queued or in flight.
    #[error("actor terminated: {reason}")]
    Terminated { reason: ExitReason },
}

impl ActorError {
    /// Returns `true` for init and call timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ActorError::InitTimeout { .. } | ActorError::CallTimeout { .. }
        )
    }

    /// Returns `true` if the target was (or became) unavailable.
    pub fn is_not_running(&self) -> bool {
        matches!(
            self,
            ActorError::NotRunning { .. } | ActorError::Terminated { .. }
        )
    }

    /// Returns `true` for failures raised before the actor ever ran.
    pub fn is_init_failure(&self) -> bool {
        matches!(
            self,
            ActorError::InitFailed { .. } | ActorError::InitTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_predicates() {
        let call = ActorError::CallTimeout {
            timeout: Duration::from_millis(50),
        };
        assert!(call.is_timeout());
        assert!(!call.is_not_running());
        assert!(!call.is_init_failure());

        let init = ActorError::InitTimeout {
            timeout: Duration::from_secs(5),
        };
        assert!(init.is_timeout());
        assert!(init.is_init_failure());
    }

    #[test]
    fn test_not_running_predicates() {
        let not_running = ActorError::NotRunning {
            id: ActorId::generate(),
        };
        assert!(not_running.is_not_running());

        let terminated = ActorError::Terminated {
            reason: ExitReason::Shutdown,
        };
        assert!(terminated.is_not_running());
        assert!(!terminated.is_timeout());
    }

    #[test]
    fn test_display_contains_context() {
        let err = ActorError::Handler {
            reason: "division by zero".into(),
        };
        assert!(err.to_string().contains("division by zero"));

        let err = ActorError::InitFailed {
            reason: "missing config".into(),
        };
        assert!(err.to_string().contains("missing config"));
    }
}
