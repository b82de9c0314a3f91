//! Spawn and call options with sensible defaults.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
// (none)

/// Default timeout for the `init` callback (5 seconds)
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for synchronous calls (5 seconds)
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for graceful shutdown of a supervised child (5 seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for spawning an actor.
///
/// # Examples
///
/// ```rust
/// use hearth_rt::SpawnOptions;
/// use std::time::Duration;
///
/// let opts = SpawnOptions::default().with_init_timeout(Duration::from_secs(10));
/// assert_eq!(opts.init_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Maximum time the `init` callback may take.
    pub init_timeout: Duration,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

impl SpawnOptions {
    /// Override the init timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }
}

/// Options for a single synchronous call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Maximum time to wait for the reply. Measured at the caller; an expired
    /// timeout releases the caller without cancelling the in-flight handler.
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl CallOptions {
    /// Override the call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(SpawnOptions::default().init_timeout, DEFAULT_INIT_TIMEOUT);
        assert_eq!(CallOptions::default().timeout, DEFAULT_CALL_TIMEOUT);
    }

    #[test]
    fn test_builders() {
        let opts = SpawnOptions::default().with_init_timeout(Duration::from_millis(1));
        assert_eq!(opts.init_timeout, Duration::from_millis(1));

        let opts = CallOptions::default().with_timeout(Duration::ZERO);
        assert!(opts.timeout.is_zero());
    }
}
