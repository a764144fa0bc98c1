//! Reader and writer tasks for one connection
//!
//! The reader owns the transport's receive half: every frame refreshes
//! activity, control messages are dispatched and answered through the
//! outbound queue, and a close or error tears the connection down.
//!
//! The writer owns the send half: it drains the outbound queue in FIFO
//! order, emits a keepalive `ping` on a fixed period, and on exit releases
//! the transport, removes the connection from the registry and marks it
//! `Closed`. Both tasks stop as soon as the connection's token is cancelled.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::{CloseReason, Connection};
use crate::error::Result;
use crate::filter::FilterChange;
use crate::protocol::{ControlMessage, OutboundMessage};
use crate::streamer::Shared;
use crate::transport::{Frame, FrameSink, FrameSource};

// ============================================================================
// Reader
// ============================================================================

/// Receive loop for one connection
pub(crate) async fn run_reader(
    mut source: Box<dyn FrameSource>,
    connection: Arc<Connection>,
    shared: Arc<Shared>,
) {
    let cancel = connection.cancel_token().clone();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = source.recv() => frame,
        };

        match frame {
            Some(Ok(Frame::Text(text))) => {
                connection.touch();
                handle_text(&connection, &shared, &text);
            }
            Some(Ok(Frame::Close)) | None => {
                connection.close(CloseReason::ClientClose);
                break;
            }
            Some(Err(e)) => {
                warn!(connection_id = %connection.id(), error = %e, "connection read failed");
                shared.metrics.record_error();
                connection.close(CloseReason::Error);
                break;
            }
        }
    }

    debug!(connection_id = %connection.id(), "reader exited");
}

/// Parse and dispatch one inbound text frame
///
/// Malformed and unrecognized messages are logged and ignored.
pub(crate) fn handle_text(connection: &Connection, shared: &Shared, text: &str) {
    match ControlMessage::parse(text) {
        Ok(message) => dispatch(connection, shared, message),
        Err(e) => {
            warn!(connection_id = %connection.id(), error = %e, "ignoring malformed message");
        }
    }
}

fn dispatch(connection: &Connection, shared: &Shared, message: ControlMessage) {
    trace!(connection_id = %connection.id(), message = message.name(), "control message");

    let reply = match message {
        ControlMessage::AddFilter { filter } => {
            let name = filter.name.clone();
            match connection.add_filter(filter, shared.config.max_filters_per_connection) {
                Ok(change) => {
                    debug!(connection_id = %connection.id(), filter = %name, ?change, "filter added");
                    OutboundMessage::filter_added(&name, change == FilterChange::Replaced)
                }
                Err(e) => {
                    debug!(connection_id = %connection.id(), filter = %name, error = %e, "filter rejected");
                    OutboundMessage::error(e.code(), e.to_string())
                }
            }
        }
        ControlMessage::RemoveFilter { filter_name } => {
            match connection.remove_filter(&filter_name) {
                Ok(_) => {
                    debug!(connection_id = %connection.id(), filter = %filter_name, "filter removed");
                    OutboundMessage::filter_removed(&filter_name)
                }
                Err(e) => OutboundMessage::error(e.code(), e.to_string()),
            }
        }
        ControlMessage::Ping => OutboundMessage::pong(),
        ControlMessage::Pong => return,
        ControlMessage::Unknown => {
            warn!(connection_id = %connection.id(), "ignoring unrecognized message type");
            return;
        }
    };

    if connection.send_control(reply).is_drop() {
        shared.metrics.record_messages_dropped(1);
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Send loop for one connection
///
/// Performs the final teardown step on exit: releases the transport, removes
/// the registry entry (recording the disconnect only if this path removed
/// it) and moves the connection to `Closed`.
pub(crate) async fn run_writer(
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::Receiver<Arc<OutboundMessage>>,
    connection: Arc<Connection>,
    shared: Arc<Shared>,
) {
    let cancel = connection.cancel_token().clone();
    let period = shared.config.keepalive_interval;
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // streamer stopping, or a no-op when close() already ran
                connection.close(CloseReason::ServerShutdown);
                break;
            }
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = keepalive.tick() => Arc::new(OutboundMessage::ping()),
        };

        match write_message(sink.as_mut(), &message, &cancel).await {
            Ok(Some(bytes)) => {
                connection.record_sent(bytes);
                shared.metrics.record_message_sent(bytes);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "connection write failed");
                shared.metrics.record_error();
                connection.close(CloseReason::Error);
                break;
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!(connection_id = %connection.id(), error = %e, "transport close failed");
    }

    if shared.registry.unregister(connection.id()).is_some() {
        shared.metrics.record_connection_closed(shared.registry.len());
    }
    connection.mark_closed();

    debug!(connection_id = %connection.id(), "writer exited");
}

/// Serialize and send one envelope
///
/// Returns `None` if cancellation won the race against a stalled write.
async fn write_message(
    sink: &mut dyn FrameSink,
    message: &OutboundMessage,
    cancel: &CancellationToken,
) -> Result<Option<usize>> {
    let text = message.encode()?;
    let bytes = text.len();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = sink.send(Frame::Text(text)) => result.map(|()| Some(bytes)),
    }
}

#[cfg(test)]
#[path = "io_test.rs"]
mod tests;
