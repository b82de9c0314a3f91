//! Cluster configuration with sensible defaults.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::NodeId;

/// Default heartbeat broadcast interval (5 seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of missed heartbeats before a peer is declared down
pub const DEFAULT_HEARTBEAT_MISS_THRESHOLD: u32 = 3;

/// Default initial reconnect backoff delay (1 second)
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default reconnect backoff ceiling (30 seconds)
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default maximum wire frame size (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Default timeout for remote calls and remote spawns (5 seconds)
pub const DEFAULT_REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for one cluster node.
///
/// # Examples
///
/// ```rust
/// use hearth_cluster::ClusterConfig;
/// use std::time::Duration;
///
/// let config = ClusterConfig::builder("api-1", "127.0.0.1", 4000)
///     .with_secret("s3cret")
///     .with_heartbeat_interval(Duration::from_secs(2))
///     .build()
///     .expect("valid config");
/// assert_eq!(config.node_name, "api-1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Node name component of the local node id.
    pub node_name: String,

    /// Host to bind and advertise.
    pub host: String,

    /// Port to bind. `0` binds an OS-assigned port; the local node id is
    /// finalized from the actual port at start.
    pub port: u16,

    /// Shared secret for the transport handshake. `None` disables
    /// authentication.
    pub secret: Option<String>,

    /// Interval between heartbeat broadcasts.
    #[serde(with = "hearth_rt::util::duration_millis")]
    pub heartbeat_interval: Duration,

    /// Missed heartbeats tolerated before a peer is declared down.
    pub heartbeat_miss_threshold: u32,

    /// Initial delay for reconnect backoff.
    #[serde(with = "hearth_rt::util::duration_millis")]
    pub reconnect_base_delay: Duration,

    /// Ceiling for reconnect backoff.
    #[serde(with = "hearth_rt::util::duration_millis")]
    pub reconnect_max_delay: Duration,

    /// Maximum size of one wire frame.
    pub max_frame_bytes: usize,

    /// Default timeout for remote calls and spawns.
    #[serde(with = "hearth_rt::util::duration_millis")]
    pub call_timeout: Duration,
}

impl ClusterConfig {
    /// Create a configuration builder.
    pub fn builder(
        node_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> ClusterConfigBuilder {
        ClusterConfigBuilder {
            config: ClusterConfig {
                node_name: node_name.into(),
                host: host.into(),
                port,
                secret: None,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                heartbeat_miss_threshold: DEFAULT_HEARTBEAT_MISS_THRESHOLD,
                reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
                reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
                max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
                call_timeout: DEFAULT_REMOTE_CALL_TIMEOUT,
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ClusterError> {
        // Reuse the node-id validation for name and host; port 0 is allowed
        // here because it means "bind an ephemeral port".
        let probe_port = if self.port == 0 { 1 } else { self.port };
        NodeId::new(&self.node_name, &self.host, probe_port).map_err(|err| {
            ClusterError::InvalidConfig {
                reason: err.to_string(),
            }
        })?;

        if self.heartbeat_interval.is_zero() {
            return Err(ClusterError::InvalidConfig {
                reason: "heartbeat_interval must be > 0".into(),
            });
        }
        if self.heartbeat_miss_threshold == 0 {
            return Err(ClusterError::InvalidConfig {
                reason: "heartbeat_miss_threshold must be > 0".into(),
            });
        }
        if self.reconnect_base_delay.is_zero() {
            return Err(ClusterError::InvalidConfig {
                reason: "reconnect_base_delay must be > 0".into(),
            });
        }
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(ClusterError::InvalidConfig {
                reason: "reconnect_max_delay must be >= reconnect_base_delay".into(),
            });
        }
        if self.max_frame_bytes == 0 {
            return Err(ClusterError::InvalidConfig {
                reason: "max_frame_bytes must be > 0".into(),
            });
        }
        Ok(())
    }

    /// How long a peer may stay silent before it is declared down.
    pub fn failure_timeout(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_miss_threshold
    }
}

/// Builder for [`ClusterConfig`] with a fluent API.
#[derive(Debug)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    /// Set the shared handshake secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.secret = Some(secret.into());
        self
    }

    /// Override the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Override the miss threshold.
    pub fn with_heartbeat_miss_threshold(mut self, threshold: u32) -> Self {
        self.config.heartbeat_miss_threshold = threshold;
        self
    }

    /// Override the reconnect backoff bounds.
    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.config.reconnect_base_delay = base;
        self.config.reconnect_max_delay = max;
        self
    }

    /// Override the maximum frame size.
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.config.max_frame_bytes = max;
        self
    }

    /// Override the default remote call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<ClusterConfig, ClusterError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ClusterConfig::builder("n", "localhost", 4000)
            .build()
            .expect("valid config");
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(config.heartbeat_miss_threshold, DEFAULT_HEARTBEAT_MISS_THRESHOLD);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(config.secret.is_none());
    }

    #[test]
    fn test_ephemeral_port_is_allowed() {
        assert!(ClusterConfig::builder("n", "127.0.0.1", 0).build().is_ok());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let result = ClusterConfig::builder("9bad", "localhost", 4000).build();
        assert!(matches!(result, Err(ClusterError::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = ClusterConfig::builder("n", "localhost", 4000)
            .with_heartbeat_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ClusterError::InvalidConfig { .. })));
    }

    #[test]
    fn test_backoff_bounds_checked() {
        let result = ClusterConfig::builder("n", "localhost", 4000)
            .with_reconnect_delays(Duration::from_secs(10), Duration::from_secs(1))
            .build();
        assert!(matches!(result, Err(ClusterError::InvalidConfig { .. })));
    }

    #[test]
    fn test_failure_timeout() {
        let config = ClusterConfig::builder("n", "localhost", 4000)
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_heartbeat_miss_threshold(3)
            .build()
            .expect("valid config");
        assert_eq!(config.failure_timeout(), Duration::from_millis(300));
    }
}
