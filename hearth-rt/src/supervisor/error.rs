//! Error types for supervisor operations.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::actor::ActorError;

/// Errors that can occur during supervisor operations.
///
/// # Examples
///
/// ```rust
/// use hearth_rt::SupervisorError;
/// use std::time::Duration;
///
/// let err = SupervisorError::MaxRestartsExceeded {
///     max_restarts: 3,
///     within: Duration::from_secs(5),
/// };
/// assert!(err.is_fatal());
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// A child with this id already exists in the supervisor.
    #[error("duplicate child id: {id}")]
    DuplicateChild { id: String },

    /// No child with this id exists in the supervisor.
    #[error("child not found: {id}")]
    ChildNotFound { id: String },

    /// A child factory failed (at startup, `start_child`, or restart).
    #[error("failed to start child '{id}': {source}")]
    ChildStartFailed {
        id: String,
        #[source]
        source: ActorError,
    },

    /// The restart intensity limiter was breached; the supervisor shut down.
    #[error("max restarts exceeded: {max_restarts} restarts within {within:?}")]
    MaxRestartsExceeded { max_restarts: u32, within: Duration },

    /// The supervisor options are inconsistent.
    #[error("invalid supervisor specification: {reason}")]
    InvalidSpec { reason: String },

    /// The supervisor actor has terminated.
    #[error("supervisor is not running")]
    NotRunning,

    /// An unexpected runtime failure inside the supervisor actor.
    #[error("supervisor operation failed: {reason}")]
    Internal { reason: String },
}

impl From<SupervisorError> for ActorError {
    /// Lets a supervisor be started from a child factory: the factory's
    /// `SupervisorError` becomes the child's initialization failure.
    fn from(err: SupervisorError) -> Self {
        ActorError::InitFailed {
            reason: err.to_string(),
        }
    }
}

impl SupervisorError {
    /// Returns `true` for errors that terminate the supervisor itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::MaxRestartsExceeded { .. } | SupervisorError::InvalidSpec { .. }
        )
    }

    /// Returns `true` if this error indicates a missing child.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SupervisorError::ChildNotFound { .. })
    }
}
