//! AuditStreamer - the service owning every piece of shared state
//!
//! One instance owns the registry, the metrics block and the background
//! tasks. Several instances can coexist (tests create one each).
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──► Starting ──► Running ──stop()──► Stopping ──► Stopped
//! ```
//!
//! `start` spawns the batch task, the health monitor and the metrics
//! updater. `stop` cancels them, closes every connection with reason
//! `server_shutdown` and waits at most `shutdown_timeout` for all tasks,
//! aborting whatever is left.
//!
//! # Usage
//!
//! ```ignore
//! let streamer = AuditStreamer::new(StreamerConfig::default());
//! streamer.start()?;
//!
//! // upgrade boundary
//! let id = streamer.connect(transport, Some("ops".into()))?;
//!
//! // producer
//! streamer.submit(event)?;
//!
//! streamer.stop().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use audit_config::StreamerConfig;

use crate::connection::{CloseReason, Connection, ConnectionId, ConnectionInfo};
use crate::error::{ConnectError, Result, StreamError};
use crate::event::AuditEvent;
use crate::filter::{AuditFilter, FilterChange};
use crate::health::run_health_monitor;
use crate::io::{run_reader, run_writer};
use crate::metrics::{MetricsSnapshot, StreamMetrics, run_metrics_updater};
use crate::pipeline::{self, QueuedEvent, run_batcher};
use crate::protocol::{OutboundMessage, WelcomeInfo};
use crate::registry::ConnectionRegistry;
use crate::transport::Transport;

/// State shared with every background task
#[derive(Debug)]
pub(crate) struct Shared {
    pub config: StreamerConfig,
    pub registry: ConnectionRegistry,
    pub metrics: StreamMetrics,
}

impl Shared {
    pub fn new(config: StreamerConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(config.max_connections),
            metrics: StreamMetrics::new(),
            config,
        }
    }
}

/// Service state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
struct RuntimeState {
    service: ServiceState,
    start_time: Option<DateTime<Utc>>,
    started_at: Option<std::time::Instant>,
    cancel: CancellationToken,
    ingest: Option<mpsc::Sender<QueuedEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Point-in-time view of the whole service
#[derive(Debug, Clone, Serialize)]
pub struct StreamerStatus {
    pub running: bool,
    pub state: ServiceState,
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds since `start`
    pub uptime_secs: Option<u64>,
    pub connections: Vec<ConnectionInfo>,
    pub metrics: MetricsSnapshot,
    pub config: StreamerConfig,
    pub queue_depth: usize,
}

/// Real-time audit event streamer
#[derive(Debug)]
pub struct AuditStreamer {
    shared: Arc<Shared>,
    state: Mutex<RuntimeState>,
}

impl AuditStreamer {
    /// Create a stopped streamer
    pub fn new(config: StreamerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            state: Mutex::new(RuntimeState {
                service: ServiceState::Stopped,
                start_time: None,
                started_at: None,
                cancel: CancellationToken::new(),
                ingest: None,
                tasks: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ServiceState {
        self.state.lock().service
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the background tasks
    ///
    /// Must be called from within a Tokio runtime. Fails with `Validation`
    /// before any state change when the config has zero-sized queues or
    /// timers.
    pub fn start(&self) -> Result<()> {
        self.shared
            .config
            .validate()
            .map_err(|e| StreamError::validation(e.to_string()))?;

        let mut state = self.state.lock();
        if state.service != ServiceState::Stopped {
            return Err(StreamError::AlreadyRunning);
        }
        state.service = ServiceState::Starting;

        let config = &self.shared.config;
        let cancel = CancellationToken::new();
        let (ingest, queue) = mpsc::channel(config.queue_size);

        state.tasks = vec![
            tokio::spawn(run_batcher(queue, Arc::clone(&self.shared), cancel.clone())),
            tokio::spawn(run_health_monitor(Arc::clone(&self.shared), cancel.clone())),
            tokio::spawn(run_metrics_updater(Arc::clone(&self.shared), cancel.clone())),
        ];
        state.cancel = cancel;
        state.ingest = Some(ingest);
        state.start_time = Some(Utc::now());
        state.started_at = Some(std::time::Instant::now());
        state.service = ServiceState::Running;

        info!(
            max_connections = config.max_connections,
            queue_size = config.queue_size,
            batch_size = config.batch_size,
            flush_interval = ?config.flush_interval,
            filtering_enabled = config.filtering_enabled,
            "audit streamer started"
        );
        Ok(())
    }

    /// Stop the service
    ///
    /// No-op unless running. Always returns within roughly
    /// `shutdown_timeout`; tasks still alive at the deadline are aborted.
    pub async fn stop(&self) {
        let (cancel, mut handles) = {
            let mut state = self.state.lock();
            if state.service != ServiceState::Running {
                return;
            }
            state.service = ServiceState::Stopping;
            state.ingest = None;
            (state.cancel.clone(), std::mem::take(&mut state.tasks))
        };

        info!(connections = self.shared.registry.len(), "stopping audit streamer");
        cancel.cancel();

        for connection in self.shared.registry.snapshot() {
            connection.close(CloseReason::ServerShutdown);
            self.remove(&connection);
            handles.extend(connection.take_tasks());
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.shared.config.shutdown_timeout;
        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            warn!(
                timeout = ?timeout,
                "shutdown timeout elapsed, aborting remaining tasks"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        let mut state = self.state.lock();
        state.service = ServiceState::Stopped;
        state.start_time = None;
        state.started_at = None;
        drop(state);

        info!("audit streamer stopped");
    }

    // ========================================================================
    // Producer
    // ========================================================================

    /// Enqueue an event for fan-out without blocking
    ///
    /// Fails with `CapacityExceeded` when the ingestion queue is full (the
    /// event is dropped and counted) and `NotRunning` when stopped.
    pub fn submit(&self, event: impl Into<Arc<AuditEvent>>) -> Result<()> {
        let sender = self
            .state
            .lock()
            .ingest
            .clone()
            .ok_or(StreamError::NotRunning)?;
        pipeline::submit(&sender, &self.shared, event.into())
    }

    /// Events waiting in the ingestion queue
    pub fn queue_depth(&self) -> usize {
        self.state
            .lock()
            .ingest
            .as_ref()
            .map_or(0, pipeline::queue_depth)
    }

    // ========================================================================
    // Upgrade boundary
    // ========================================================================

    /// Register an established channel and start its reader and writer
    ///
    /// On failure the transport is handed back unregistered; the caller
    /// reports the error (e.g. as service unavailable) and closes it.
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        &self,
        transport: Transport,
        identity: Option<String>,
    ) -> std::result::Result<ConnectionId, ConnectError> {
        // held through registration so stop() cannot interleave
        let state = self.state.lock();
        if state.service != ServiceState::Running {
            return Err(ConnectError {
                error: StreamError::NotRunning,
                transport,
            });
        }

        let config = &self.shared.config;
        let (connection, outbound) = Connection::new(
            identity,
            transport.remote_addr(),
            config,
            state.cancel.child_token(),
        );
        let connection = Arc::new(connection);

        match self.shared.registry.register(Arc::clone(&connection)) {
            Ok(active) => self.shared.metrics.record_connection_opened(active),
            Err(error) => {
                self.shared.metrics.record_connection_rejected();
                warn!(
                    remote_addr = %transport.remote_addr(),
                    error = %error,
                    "connection rejected"
                );
                return Err(ConnectError { error, transport });
            }
        }
        connection.activate();

        let welcome = WelcomeInfo {
            connection_id: connection.id().to_string(),
            filtering_enabled: config.filtering_enabled,
            max_filters: config.max_filters_per_connection,
            rate_limit_per_sec: config.rate_limit_per_sec,
            keepalive_interval_secs: config.keepalive_interval.as_secs(),
        };
        match OutboundMessage::welcome(&welcome) {
            Ok(message) => {
                connection.send_control(message);
            }
            Err(e) => warn!(connection_id = %connection.id(), error = %e, "failed to build welcome"),
        }

        let (source, sink, remote_addr) = transport.into_parts();
        connection.attach_task(tokio::spawn(run_reader(
            source,
            Arc::clone(&connection),
            Arc::clone(&self.shared),
        )));
        connection.attach_task(tokio::spawn(run_writer(
            sink,
            outbound,
            Arc::clone(&connection),
            Arc::clone(&self.shared),
        )));
        drop(state);

        info!(
            connection_id = %connection.id(),
            remote_addr = %remote_addr,
            identity = connection.identity().unwrap_or("-"),
            active = self.shared.registry.len(),
            "connection established"
        );
        Ok(connection.id())
    }

    // ========================================================================
    // Administration
    // ========================================================================

    fn lookup(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        if !self.is_running() {
            return Err(StreamError::NotRunning);
        }
        self.shared.registry.lookup(id)
    }

    /// Remove a registry entry, recording the disconnect if this call removed it
    fn remove(&self, connection: &Connection) {
        if self.shared.registry.unregister(connection.id()).is_some() {
            self.shared
                .metrics
                .record_connection_closed(self.shared.registry.len());
        }
    }

    /// Close a connection with reason `admin_close`
    pub fn disconnect(&self, id: ConnectionId) -> Result<()> {
        let connection = self.lookup(id)?;
        connection.close(CloseReason::AdminClose);
        self.remove(&connection);
        Ok(())
    }

    /// Add or replace a filter on a connection
    pub fn add_filter(&self, id: ConnectionId, filter: AuditFilter) -> Result<FilterChange> {
        let connection = self.lookup(id)?;
        let name = filter.name.clone();
        let change = connection.add_filter(filter, self.shared.config.max_filters_per_connection)?;
        debug!(connection_id = %id, filter = %name, ?change, "filter added");
        Ok(change)
    }

    /// Remove a filter from a connection by name
    pub fn remove_filter(&self, id: ConnectionId, name: &str) -> Result<()> {
        let connection = self.lookup(id)?;
        connection.remove_filter(name)?;
        debug!(connection_id = %id, filter = %name, "filter removed");
        Ok(())
    }

    /// Filters currently held by a connection
    pub fn list_filters(&self, id: ConnectionId) -> Result<Vec<AuditFilter>> {
        Ok(self.lookup(id)?.filters())
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    #[inline]
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn status(&self) -> StreamerStatus {
        let (service, start_time, uptime) = {
            let state = self.state.lock();
            (
                state.service,
                state.start_time,
                state.started_at.map(|t| t.elapsed()),
            )
        };

        StreamerStatus {
            running: service == ServiceState::Running,
            state: service,
            start_time,
            uptime_secs: uptime.as_ref().map(Duration::as_secs),
            connections: self
                .shared
                .registry
                .snapshot()
                .iter()
                .map(|c| c.info())
                .collect(),
            metrics: self.metrics(),
            config: self.shared.config.clone(),
            queue_depth: self.queue_depth(),
        }
    }
}

#[cfg(test)]
#[path = "streamer_test.rs"]
mod tests;
