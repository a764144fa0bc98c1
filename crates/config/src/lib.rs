//! Audit Stream Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! An empty file is a valid configuration - only specify what you need to change.
//!
//! # Parsing
//!
//! ```
//! use audit_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[streamer]\nmax_connections = 50").unwrap();
//! assert_eq!(config.streamer.max_connections, 50);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "debug"
//!
//! [streamer]
//! max_connections = 500
//! connection_timeout = "2m"
//! flush_interval = "50ms"
//! rate_limit_per_sec = 200
//!
//! [server]
//! subscriber_address = "0.0.0.0:8765"
//! ingest_address = "127.0.0.1:8766"
//! ```

mod error;
mod logging;
mod server;
mod streamer;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use server::ServerConfig;
pub use streamer::StreamerConfig;

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Streaming engine settings
    pub streamer: StreamerConfig,

    /// Daemon listener settings
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
