//! Daemon listener settings

use serde::Deserialize;

/// Default address for subscriber connections
pub const DEFAULT_SUBSCRIBER_ADDRESS: &str = "127.0.0.1:8765";

/// Default address for producer (ingest) connections
pub const DEFAULT_INGEST_ADDRESS: &str = "127.0.0.1:8766";

/// Listener configuration for `audit-streamd`
///
/// # Example
///
/// ```toml
/// [server]
/// subscriber_address = "0.0.0.0:8765"
/// ingest_address = "127.0.0.1:8766"
/// max_frame_size = 65536
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address subscribers connect to
    pub subscriber_address: String,

    /// Address producers push newline-delimited events to
    pub ingest_address: String,

    /// Longest accepted inbound line, in bytes
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            subscriber_address: DEFAULT_SUBSCRIBER_ADDRESS.into(),
            ingest_address: DEFAULT_INGEST_ADDRESS.into(),
            max_frame_size: 64 * 1024,
        }
    }
}
