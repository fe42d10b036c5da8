//! Configuration for the peer connection layer.

use {
    serde::{Deserialize, Serialize},
    std::{net::SocketAddr, time::Duration},
};

/// Configuration for the connection worker pool and peer sessions.
///
/// Controls how many workers maintain outbound sessions, how hard each
/// worker retries, and the limits applied to every framed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Local address the inbound listener binds to.
    /// Default: `0.0.0.0:8900`
    pub bind_addr: SocketAddr,

    /// Port assumed for peers listed without one.
    pub default_peer_port: u16,

    /// Number of connection workers. Each holds at most one live session.
    pub worker_count: usize,

    /// Connection attempts granted to a freshly scheduled request,
    /// including the first one.
    pub max_connect_attempts: u32,

    /// Delay before the first retry (ms). Doubles per consumed attempt.
    pub backoff_base_ms: u64,

    /// Upper bound on a single retry delay (ms).
    pub backoff_max_ms: u64,

    /// Capacity of each worker's scheduling inbox. Scheduling into a full
    /// inbox fails instead of blocking.
    pub queue_inbox_capacity: usize,

    /// Initial buffer capacity of each worker's request deque.
    pub initial_queue_capacity: usize,

    /// TCP connect and handshake timeout (ms).
    pub connect_timeout_ms: u64,

    /// Maximum size of a single serialized message in bytes.
    pub max_message_size: usize,

    /// Capacity of the channel delivering inbound messages to consensus.
    pub inbound_channel_capacity: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8900)),
            default_peer_port: 8900,
            worker_count: 8,
            max_connect_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            queue_inbox_capacity: 256,
            initial_queue_capacity: 32,
            connect_timeout_ms: 3_000,
            max_message_size: 1_048_576, // 1 MB
            inbound_channel_capacity: 10_000,
        }
    }
}

impl NetConfig {
    /// Create a config suitable for local testing with shorter timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            default_peer_port: 0,
            worker_count: 2,
            max_connect_attempts: 3,
            backoff_base_ms: 10,
            backoff_max_ms: 100,
            queue_inbox_capacity: 16,
            initial_queue_capacity: 4,
            connect_timeout_ms: 1_000,
            max_message_size: 1_048_576,
            inbound_channel_capacity: 1_000,
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.max_connect_attempts == 0 {
            return Err(ConfigError::NoConnectAttempts);
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::InvalidBackoff {
                base_ms: self.backoff_base_ms,
                max_ms: self.backoff_max_ms,
            });
        }
        if self.queue_inbox_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue_inbox_capacity"));
        }
        if self.inbound_channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("inbound_channel_capacity"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroCapacity("max_message_size"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        Ok(())
    }
}

/// Errors in network configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("worker_count must be > 0")]
    NoWorkers,
    #[error("max_connect_attempts must be > 0")]
    NoConnectAttempts,
    #[error("invalid backoff: base {base_ms}ms must be > 0 and <= max {max_ms}ms")]
    InvalidBackoff { base_ms: u64, max_ms: u64 },
    #[error("{0} must be > 0")]
    ZeroCapacity(&'static str),
    #[error("connect_timeout_ms must be > 0")]
    ZeroConnectTimeout,
}
