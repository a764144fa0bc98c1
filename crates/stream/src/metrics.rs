//! Streamer metrics
//!
//! One lock-guarded block of counters. Every mutation goes through
//! [`StreamMetrics::update`], so a snapshot never observes a half-applied
//! change (e.g. latency total bumped without the event count).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::streamer::Shared;

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Connections ever registered
    pub total_connections: u64,
    /// Connections currently registered
    pub active_connections: u64,
    /// Highest concurrent registration count
    pub peak_connections: u64,
    /// Connections evicted by the health sweep
    pub connections_dropped: u64,
    /// Connections refused at the capacity ceiling
    pub connections_rejected: u64,
    /// Events accepted into the ingestion queue
    pub events_received: u64,
    /// Events rejected because the ingestion queue was full
    pub events_dropped: u64,
    /// Events fanned out
    pub events_streamed: u64,
    /// Messages written to transports
    pub messages_sent: u64,
    /// Bytes written to transports
    pub bytes_sent: u64,
    /// Per-connection drops (rate limit or full outbound queue)
    pub messages_dropped: u64,
    /// Transport and encoding failures
    pub errors: u64,
    /// Sum of submit-to-fan-out latency, in microseconds
    pub total_latency_us: u64,
}

impl MetricsSnapshot {
    /// Mean submit-to-fan-out latency in milliseconds
    pub fn average_latency_ms(&self) -> f64 {
        if self.events_streamed == 0 {
            return 0.0;
        }
        self.total_latency_us as f64 / self.events_streamed as f64 / 1000.0
    }
}

/// Shared metrics block
#[derive(Debug, Default)]
pub struct StreamMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a mutation under the lock
    #[inline]
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut MetricsSnapshot),
    {
        f(&mut self.inner.lock());
    }

    /// Copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.inner.lock()
    }

    pub fn record_connection_opened(&self, active: usize) {
        self.update(|m| {
            m.total_connections += 1;
            m.active_connections = active as u64;
            m.peak_connections = m.peak_connections.max(m.active_connections);
        });
    }

    pub fn record_connection_closed(&self, active: usize) {
        self.update(|m| m.active_connections = active as u64);
    }

    pub fn record_connection_rejected(&self) {
        self.update(|m| m.connections_rejected += 1);
    }

    pub fn record_event_received(&self) {
        self.update(|m| m.events_received += 1);
    }

    pub fn record_event_dropped(&self) {
        self.update(|m| m.events_dropped += 1);
    }

    /// An event reached fan-out `latency` after it was submitted
    pub fn record_event_streamed(&self, latency: Duration) {
        self.update(|m| {
            m.events_streamed += 1;
            m.total_latency_us += latency.as_micros() as u64;
        });
    }

    pub fn record_message_sent(&self, bytes: usize) {
        self.update(|m| {
            m.messages_sent += 1;
            m.bytes_sent += bytes as u64;
        });
    }

    pub fn record_messages_dropped(&self, count: u64) {
        if count > 0 {
            self.update(|m| m.messages_dropped += count);
        }
    }

    pub fn record_error(&self) {
        self.update(|m| m.errors += 1);
    }

    /// End-of-sweep bookkeeping for the health monitor
    pub fn record_sweep(&self, evicted: usize, active: usize) {
        self.update(|m| {
            m.connections_dropped += evicted as u64;
            m.active_connections = active as u64;
        });
    }

    /// Refresh the active/peak gauges from the registry size
    pub fn set_active_connections(&self, active: usize) {
        self.update(|m| {
            m.active_connections = active as u64;
            m.peak_connections = m.peak_connections.max(m.active_connections);
        });
    }
}

/// Refresh gauges and log a summary every `metrics_interval`
pub(crate) async fn run_metrics_updater(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.metrics_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.metrics.set_active_connections(shared.registry.len());
                let s = shared.metrics.snapshot();
                info!(
                    active = s.active_connections,
                    peak = s.peak_connections,
                    events_received = s.events_received,
                    events_streamed = s.events_streamed,
                    events_dropped = s.events_dropped,
                    messages_sent = s.messages_sent,
                    messages_dropped = s.messages_dropped,
                    errors = s.errors,
                    avg_latency_ms = s.average_latency_ms(),
                    "streamer metrics"
                );
            }
        }
    }

    debug!("metrics updater stopped");
}
