//! Audit Stream - real-time fan-out of audit events to live subscribers
//!
//! This crate is the streaming engine behind audit dashboards. It accepts
//! already-sequenced audit events from a producer and distributes them to
//! many concurrently connected subscribers:
//!
//! - Per-connection filters (AND within a filter, OR across filters)
//! - Per-connection token bucket rate limiting
//! - Bounded queues everywhere; a slow subscriber never stalls the producer
//! - Stale connection eviction and graceful, time-bounded shutdown
//!
//! Delivery is best-effort: full queues and denied sends drop and count.
//!
//! # Architecture
//!
//! ```text
//! producer ──submit()──► ingest queue ──► batch task (size | timer)
//!                                              │
//!                                 registry snapshot, per connection:
//!                                   filters ─► token bucket ─► outbound queue
//!                                                                   │
//!                                                              writer task ──► transport
//!                                                                                  │
//!                 filter / ping control ◄── reader task ◄──────────────────────────┘
//!
//! health monitor ──► evict stale        metrics updater ──► gauges + summary log
//! ```
//!
//! The calling layer performs the handshake and hands the established
//! channel to [`AuditStreamer::connect`] as a [`Transport`].

mod error;
mod health;
mod io;
mod pipeline;
mod streamer;

pub mod connection;
pub mod event;
pub mod filter;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod transport;

pub use connection::{CloseReason, ConnectionId, ConnectionInfo, ConnectionStatus};
pub use error::{ConnectError, ErrorKind, Resource, Result, StreamError};
pub use event::AuditEvent;
pub use filter::{AuditFilter, FilterChange, TimeRange};
pub use metrics::MetricsSnapshot;
pub use protocol::{ControlMessage, MessageType, OutboundMessage};
pub use rate_limit::TokenBucket;
pub use streamer::{AuditStreamer, ServiceState, StreamerStatus};
pub use transport::{ClientHandle, Frame, FrameSink, FrameSource, Transport};
