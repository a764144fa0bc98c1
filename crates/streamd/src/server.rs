//! TCP listeners for subscribers and producers
//!
//! Both listeners speak newline-delimited JSON:
//!
//! - Subscriber port: each accepted socket is wrapped with
//!   [`transport::lines`] and handed to [`AuditStreamer::connect`]. When the
//!   streamer refuses it, one `error` envelope with code
//!   `service_unavailable` is written and the socket closed.
//! - Ingest port: every line is one [`AuditEvent`] passed to
//!   [`AuditStreamer::submit`]. Undecodable lines are logged and skipped.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use audit_stream::transport::{self, Frame};
use audit_stream::{AuditEvent, AuditStreamer, ErrorKind, OutboundMessage};

/// Error code sent to subscribers the streamer cannot take
pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";

/// Per-connection totals for one producer socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Events accepted by the streamer
    pub accepted: u64,
    /// Events refused because the ingestion queue was full
    pub dropped: u64,
    /// Lines that did not decode as an event
    pub malformed: u64,
}

// ============================================================================
// Subscribers
// ============================================================================

/// Accept subscriber connections until cancelled
pub async fn run_subscriber_listener(
    listener: TcpListener,
    streamer: Arc<AuditStreamer>,
    max_frame_size: usize,
    cancel: CancellationToken,
) {
    if let Ok(address) = listener.local_addr() {
        info!(address = %address, "subscriber listener started");
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    accept_subscriber(stream, peer.to_string(), &streamer, max_frame_size);
                }
                Err(e) => warn!(error = %e, "subscriber accept error"),
            },
        }
    }

    info!("subscriber listener stopped");
}

fn accept_subscriber(
    stream: TcpStream,
    peer: String,
    streamer: &AuditStreamer,
    max_frame_size: usize,
) {
    let (reader, writer) = stream.into_split();
    let channel = transport::lines(reader, writer, peer, max_frame_size);

    if let Err(rejected) = streamer.connect(channel, None) {
        let message = OutboundMessage::error(SERVICE_UNAVAILABLE, rejected.error.to_string());
        warn!(
            peer = %rejected.transport.remote_addr(),
            error = %rejected.error,
            "subscriber refused"
        );
        tokio::spawn(async move {
            if let Err(e) = rejected.transport.reject(&message).await {
                debug!(error = %e, "failed to notify refused subscriber");
            }
        });
    }
}

// ============================================================================
// Producers
// ============================================================================

/// Accept producer connections until cancelled
pub async fn run_ingest_listener(
    listener: TcpListener,
    streamer: Arc<AuditStreamer>,
    max_frame_size: usize,
    cancel: CancellationToken,
) {
    if let Ok(address) = listener.local_addr() {
        info!(address = %address, "ingest listener started");
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let streamer = Arc::clone(&streamer);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let peer = peer.to_string();
                        let stats = handle_producer(stream, &peer, &streamer, max_frame_size, cancel).await;
                        debug!(
                            peer = %peer,
                            accepted = stats.accepted,
                            dropped = stats.dropped,
                            malformed = stats.malformed,
                            "producer disconnected"
                        );
                    });
                }
                Err(e) => warn!(error = %e, "ingest accept error"),
            },
        }
    }

    info!("ingest listener stopped");
}

/// Read events from one producer socket until EOF, error or cancellation
pub async fn handle_producer(
    stream: TcpStream,
    peer: &str,
    streamer: &AuditStreamer,
    max_frame_size: usize,
    cancel: CancellationToken,
) -> IngestStats {
    let (reader, writer) = stream.into_split();
    let (mut source, _sink, _) = transport::lines(reader, writer, peer, max_frame_size).into_parts();
    let mut stats = IngestStats::default();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.recv() => frame,
        };

        let line = match frame {
            Some(Ok(Frame::Text(line))) => line,
            Some(Ok(Frame::Close)) | None => break,
            Some(Err(e)) => {
                warn!(peer = %peer, error = %e, "producer read failed");
                break;
            }
        };

        let event: AuditEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                stats.malformed += 1;
                warn!(peer = %peer, error = %e, "skipping malformed event");
                continue;
            }
        };

        match streamer.submit(event) {
            Ok(()) => stats.accepted += 1,
            Err(e) if e.kind() == ErrorKind::CapacityExceeded => stats.dropped += 1,
            Err(e) => {
                debug!(peer = %peer, error = %e, "streamer not accepting events");
                break;
            }
        }
    }

    stats
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
