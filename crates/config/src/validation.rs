//! Configuration validation
//!
//! Rejects values the engine cannot run with:
//! - Zero-sized queues, batches and limits
//! - Zero-length timers
//! - Both listeners on one address

use std::time::Duration;

use crate::Config;
use crate::error::{ConfigError, Result};
use crate::streamer::StreamerConfig;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_streamer(&config.streamer)?;
    validate_server(config)?;
    Ok(())
}

pub(crate) fn validate_streamer(streamer: &StreamerConfig) -> Result<()> {
    let counts = [
        ("max_connections", streamer.max_connections),
        ("queue_size", streamer.queue_size),
        ("batch_size", streamer.batch_size),
        ("outbound_queue_size", streamer.outbound_queue_size),
        (
            "max_filters_per_connection",
            streamer.max_filters_per_connection,
        ),
        ("rate_limit_per_sec", streamer.rate_limit_per_sec as usize),
    ];
    for (field, value) in counts {
        if value == 0 {
            return Err(ConfigError::invalid_value(
                "streamer",
                field,
                "must be greater than 0",
            ));
        }
    }

    if streamer.rate_limit_burst == Some(0) {
        return Err(ConfigError::invalid_value(
            "streamer",
            "rate_limit_burst",
            "must be greater than 0 when set",
        ));
    }

    let timers = [
        ("connection_timeout", streamer.connection_timeout),
        ("keepalive_interval", streamer.keepalive_interval),
        ("flush_interval", streamer.flush_interval),
        ("health_check_interval", streamer.health_check_interval),
        ("metrics_interval", streamer.metrics_interval),
    ];
    for (field, value) in timers {
        if value == Duration::ZERO {
            return Err(ConfigError::invalid_value(
                "streamer",
                field,
                "must be a non-zero duration",
            ));
        }
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    let server = &config.server;

    if server.subscriber_address == server.ingest_address {
        return Err(ConfigError::AddressConflict {
            address: server.subscriber_address.clone(),
        });
    }

    if server.max_frame_size == 0 {
        return Err(ConfigError::invalid_value(
            "server",
            "max_frame_size",
            "must be greater than 0",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_counts_rejected() {
        let mut config = Config::default();
        config.streamer.max_filters_per_connection = 0;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_filters_per_connection"));
    }

    #[test]
    fn test_zero_burst_rejected() {
        let mut config = Config::default();
        config.streamer.rate_limit_burst = Some(0);

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("rate_limit_burst"));
    }

    #[test]
    fn test_zero_timer_rejected() {
        let mut config = Config::default();
        config.streamer.flush_interval = Duration::ZERO;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("flush_interval"));
    }

    #[test]
    fn test_address_conflict() {
        let mut config = Config::default();
        config.server.ingest_address = config.server.subscriber_address.clone();

        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::AddressConflict { .. })
        ));
    }

    #[test]
    fn test_shutdown_timeout_may_be_zero() {
        // zero means "do not wait", still a valid choice
        let mut config = Config::default();
        config.streamer.shutdown_timeout = Duration::ZERO;
        assert!(validate_config(&config).is_ok());
    }
}
