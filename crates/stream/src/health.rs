//! Periodic eviction of stale connections
//!
//! A connection is stale when it has been idle for longer than
//! `connection_timeout`, or when it is already closing but still
//! registered. Stale connections are closed with reason `timeout` and
//! removed from the registry.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::CloseReason;
use crate::streamer::Shared;

/// One pass over the registry as of `now`, returns the number evicted
pub(crate) fn sweep(shared: &Shared, now: std::time::Instant) -> usize {
    let timeout = shared.config.connection_timeout;
    let mut evicted = 0;

    for connection in shared.registry.snapshot() {
        if !connection.is_stale(now, timeout) {
            continue;
        }

        connection.close(CloseReason::Timeout);
        if shared.registry.unregister(connection.id()).is_some() {
            evicted += 1;
        }
    }

    shared.metrics.record_sweep(evicted, shared.registry.len());
    if evicted > 0 {
        info!(evicted, remaining = shared.registry.len(), "evicted stale connections");
    }
    evicted
}

/// Run [`sweep`] every `health_check_interval` until cancelled
pub(crate) async fn run_health_monitor(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.health_check_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep(&shared, std::time::Instant::now());
            }
        }
    }

    debug!("health monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use audit_config::StreamerConfig;

    use crate::connection::{Connection, ConnectionStatus};

    fn shared_with_timeout(timeout: Duration) -> Shared {
        Shared::new(StreamerConfig {
            connection_timeout: timeout,
            ..StreamerConfig::default()
        })
    }

    fn register(shared: &Shared) -> Arc<Connection> {
        let (connection, _rx) = Connection::new(
            None,
            "mem:health",
            &shared.config,
            CancellationToken::new(),
        );
        let connection = Arc::new(connection);
        connection.activate();
        shared.registry.register(Arc::clone(&connection)).unwrap();
        connection
    }

    #[test]
    fn test_sweep_keeps_fresh_connections() {
        let shared = shared_with_timeout(Duration::from_secs(60));
        register(&shared);
        register(&shared);

        assert_eq!(sweep(&shared, std::time::Instant::now()), 0);
        assert_eq!(shared.registry.len(), 2);
    }

    #[test]
    fn test_sweep_evicts_idle_connections() {
        let shared = shared_with_timeout(Duration::from_secs(60));
        let idle = register(&shared);

        let later = std::time::Instant::now() + Duration::from_secs(120);
        assert_eq!(sweep(&shared, later), 1);

        assert!(shared.registry.is_empty());
        assert_eq!(idle.status(), ConnectionStatus::Closing);
        assert_eq!(idle.close_reason(), Some(CloseReason::Timeout));

        let metrics = shared.metrics.snapshot();
        assert_eq!(metrics.connections_dropped, 1);
        assert_eq!(metrics.active_connections, 0);
    }

    #[test]
    fn test_sweep_removes_inactive_connections() {
        let shared = shared_with_timeout(Duration::from_secs(60));
        let closing = register(&shared);
        register(&shared);
        closing.close(CloseReason::ClientClose);

        assert_eq!(sweep(&shared, std::time::Instant::now()), 1);
        assert_eq!(shared.registry.len(), 1);
        // first teardown reason wins
        assert_eq!(closing.close_reason(), Some(CloseReason::ClientClose));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_cancel() {
        let shared = Arc::new(shared_with_timeout(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_health_monitor(Arc::clone(&shared), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(90)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
