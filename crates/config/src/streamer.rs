//! Streaming engine settings
//!
//! Every option the engine recognizes, with defaults tuned for a few hundred
//! dashboard subscribers on a single node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration
///
/// # Example
///
/// ```toml
/// [streamer]
/// max_connections = 1000
/// connection_timeout = "5m"
/// keepalive_interval = "30s"
/// queue_size = 10000
/// batch_size = 100
/// flush_interval = "100ms"
/// filtering_enabled = true
/// max_filters_per_connection = 10
/// rate_limit_per_sec = 100
/// outbound_queue_size = 256
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamerConfig {
    /// Maximum concurrently registered connections
    pub max_connections: usize,

    /// Inactivity after which the health sweep evicts a connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Period of the writer's keepalive probe
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Bound of the ingestion queue
    pub queue_size: usize,

    /// Events per fan-out batch
    pub batch_size: usize,

    /// Flush timer for partial batches
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// When false every connection receives every event
    pub filtering_enabled: bool,

    /// Filters a single connection may hold
    pub max_filters_per_connection: usize,

    /// Token refill rate (messages per second) for each connection
    pub rate_limit_per_sec: u32,

    /// Token bucket capacity (None = same as the rate)
    pub rate_limit_burst: Option<u32>,

    /// Bound of each connection's outbound queue
    pub outbound_queue_size: usize,

    /// Period of the stale-connection sweep
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Period of the metrics updater
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,

    /// Upper bound on the wait for background tasks during stop
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
            keepalive_interval: Duration::from_secs(30),
            queue_size: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_millis(100),
            filtering_enabled: true,
            max_filters_per_connection: 10,
            rate_limit_per_sec: 100,
            rate_limit_burst: None,
            outbound_queue_size: 256,
            health_check_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl StreamerConfig {
    /// Token bucket capacity, falling back to the refill rate
    #[inline]
    pub fn effective_burst(&self) -> u32 {
        self.rate_limit_burst.unwrap_or(self.rate_limit_per_sec)
    }

    /// Reject zero-sized queues, limits and timers
    ///
    /// Runs on TOML load; call it directly when the config is built in code.
    pub fn validate(&self) -> crate::Result<()> {
        crate::validation::validate_streamer(self)
    }
}
