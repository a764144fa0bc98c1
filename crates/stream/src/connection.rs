//! Per-subscriber connection state
//!
//! Each accepted channel gets a `Connection` that tracks:
//! - Unique ID, optional owning identity and remote address
//! - The connection's filter set
//! - A private token bucket gating outbound sends
//! - The sender side of its bounded outbound queue
//! - Counters (messages sent, messages dropped, bytes sent)
//!
//! The reader and writer tasks in [`crate::io`] drive the transport; this
//! type only holds state. All mutable fields sit behind the connection's own
//! lock and are never held across an await.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──register──► Active ──close(reason)──► Closing ──writer exit──► Closed
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use audit_config::StreamerConfig;

use crate::error::Result;
use crate::event::AuditEvent;
use crate::filter::{AuditFilter, FilterChange, FilterSet};
use crate::protocol::OutboundMessage;
use crate::rate_limit::TokenBucket;

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Peer closed or went away
    ClientClose,
    /// Evicted for inactivity
    Timeout,
    /// Transport read/write failure
    Error,
    /// Streamer stopping
    ServerShutdown,
    /// Administrative disconnect
    AdminClose,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClose => "client_close",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::ServerShutdown => "server_shutdown",
            Self::AdminClose => "admin_close",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of offering a message to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Placed on the outbound queue
    Queued,
    /// Token bucket empty
    RateLimited,
    /// Outbound queue at capacity
    QueueFull,
    /// Connection no longer active
    Closed,
}

impl Delivery {
    /// Whether this outcome counts as a dropped message
    #[inline]
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::RateLimited | Self::QueueFull)
    }
}

/// Mutable state guarded by the connection lock
#[derive(Debug)]
struct ConnectionState {
    status: ConnectionStatus,
    filters: FilterSet,
    last_active: Instant,
    last_active_at: DateTime<Utc>,
    sender: Option<mpsc::Sender<Arc<OutboundMessage>>>,
    close_reason: Option<CloseReason>,
}

/// A single subscriber connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Option<String>,
    remote_addr: String,
    created_at: DateTime<Utc>,
    state: Mutex<ConnectionState>,
    limiter: TokenBucket,
    cancel: CancellationToken,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection in the `Connecting` state
    ///
    /// Returns the receiving end of the outbound queue for the writer task.
    /// `cancel` should be a child of the streamer's shutdown token.
    pub fn new(
        identity: Option<String>,
        remote_addr: impl Into<String>,
        config: &StreamerConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Arc<OutboundMessage>>) {
        let (sender, receiver) = mpsc::channel(config.outbound_queue_size);

        let connection = Self {
            id: ConnectionId::new(),
            identity,
            remote_addr: remote_addr.into(),
            created_at: Utc::now(),
            state: Mutex::new(ConnectionState {
                status: ConnectionStatus::Connecting,
                filters: FilterSet::new(),
                last_active: Instant::now(),
                last_active_at: Utc::now(),
                sender: Some(sender),
                close_reason: None,
            }),
            limiter: TokenBucket::new(config.effective_burst(), config.rate_limit_per_sec),
            cancel,
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        };

        (connection, receiver)
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    #[inline]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Token cancelled on teardown
    #[inline]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status() == ConnectionStatus::Active
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.lock().close_reason
    }

    /// `Connecting → Active`, after successful registration
    pub fn activate(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != ConnectionStatus::Connecting {
            return false;
        }
        state.status = ConnectionStatus::Active;
        true
    }

    /// Record inbound activity
    pub fn touch(&self) {
        let mut state = self.state.lock();
        state.last_active = Instant::now();
        state.last_active_at = Utc::now();
    }

    /// Torn down, or active but idle for longer than `timeout` as of `now`
    ///
    /// A connection still `Connecting` is never stale.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        let state = self.state.lock();
        match state.status {
            ConnectionStatus::Connecting => false,
            ConnectionStatus::Closing | ConnectionStatus::Closed => true,
            ConnectionStatus::Active => {
                now.saturating_duration_since(state.last_active) > timeout
            }
        }
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Add or replace a filter, respecting the per-connection cap
    pub fn add_filter(&self, filter: AuditFilter, max: usize) -> Result<FilterChange> {
        self.state.lock().filters.add(filter, max)
    }

    pub fn remove_filter(&self, name: &str) -> Result<AuditFilter> {
        self.state.lock().filters.remove(name)
    }

    /// Copy of the filter list in insertion order
    pub fn filters(&self) -> Vec<AuditFilter> {
        self.state.lock().filters.to_vec()
    }

    pub fn filter_count(&self) -> usize {
        self.state.lock().filters.len()
    }

    /// Whether `event` should be delivered to this connection
    #[inline]
    pub fn matches(&self, event: &AuditEvent, filtering_enabled: bool) -> bool {
        !filtering_enabled || self.state.lock().filters.matches(event)
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn sender(&self) -> Option<mpsc::Sender<Arc<OutboundMessage>>> {
        let state = self.state.lock();
        if state.status != ConnectionStatus::Active {
            return None;
        }
        state.sender.clone()
    }

    /// Offer a fanned-out event, gated by the rate limiter
    ///
    /// Never blocks. Denied or overflowing sends are discarded and counted.
    /// A full outbound queue does not consume a token.
    pub fn deliver(&self, message: &Arc<OutboundMessage>) -> Delivery {
        let Some(sender) = self.sender() else {
            return Delivery::Closed;
        };

        let permit = match sender.try_reserve() {
            Ok(permit) => permit,
            Err(mpsc::error::TrySendError::Full(())) => {
                self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                return Delivery::QueueFull;
            }
            Err(mpsc::error::TrySendError::Closed(())) => return Delivery::Closed,
        };

        if !self.limiter.allow() {
            self.messages_dropped.fetch_add(1, Ordering::Relaxed);
            return Delivery::RateLimited;
        }

        permit.send(Arc::clone(message));
        Delivery::Queued
    }

    /// Queue a protocol message (welcome, ack, pong), bypassing the limiter
    pub fn send_control(&self, message: OutboundMessage) -> Delivery {
        let sender = {
            let state = self.state.lock();
            match state.status {
                ConnectionStatus::Connecting | ConnectionStatus::Active => state.sender.clone(),
                _ => None,
            }
        };
        let Some(sender) = sender else {
            return Delivery::Closed;
        };

        match sender.try_send(Arc::new(message)) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Account for one frame written by the writer task
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Tear the connection down
    ///
    /// Idempotent: only the first call moves the connection to `Closing`,
    /// drops the outbound queue sender and cancels the I/O tasks. Returns
    /// whether this call performed the teardown.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(
                state.status,
                ConnectionStatus::Closing | ConnectionStatus::Closed
            ) {
                return false;
            }
            state.status = ConnectionStatus::Closing;
            state.close_reason = Some(reason);
            state.sender = None;
        }

        self.cancel.cancel();

        info!(
            connection_id = %self.id,
            remote_addr = %self.remote_addr,
            reason = reason.as_str(),
            messages_sent = self.messages_sent(),
            messages_dropped = self.messages_dropped(),
            "connection closing"
        );
        true
    }

    /// `Closing → Closed`, once the transport is released and the entry is
    /// out of the registry
    pub fn mark_closed(&self) {
        let mut state = self.state.lock();
        state.status = ConnectionStatus::Closed;
        state.sender = None;
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub(crate) fn attach_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Take the reader/writer handles for joining
    pub(crate) fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock())
    }

    /// Serializable view for status reporting
    pub fn info(&self) -> ConnectionInfo {
        let state = self.state.lock();
        ConnectionInfo {
            id: self.id,
            identity: self.identity.clone(),
            remote_addr: self.remote_addr.clone(),
            created_at: self.created_at,
            last_active: state.last_active_at,
            state: state.status,
            filters: state.filters.to_vec(),
            messages_sent: self.messages_sent(),
            messages_dropped: self.messages_dropped(),
            bytes_sent: self.bytes_sent(),
            tokens_available: self.limiter.available(),
        }
    }
}

/// Point-in-time description of one connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub remote_addr: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub state: ConnectionStatus,
    pub filters: Vec<AuditFilter>,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub bytes_sent: u64,
    pub tokens_available: u32,
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
