//! Ingestion queue and batch fan-out
//!
//! ```text
//! submit() ──try_send──► [bounded queue] ──► batch task ──► fan_out()
//!    │ full                                   size | timer      │
//!    ▼                                                          ▼
//!  CapacityExceeded                         per connection: filter → limiter → outbound queue
//! ```
//!
//! Producers are never blocked: a full queue drops the event and counts it.
//! Events keep FIFO order within and across batches.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::Delivery;
use crate::error::{Resource, Result, StreamError};
use crate::event::AuditEvent;
use crate::protocol::OutboundMessage;
use crate::streamer::Shared;

/// An event waiting in the ingestion queue
#[derive(Debug, Clone)]
pub(crate) struct QueuedEvent {
    pub event: Arc<AuditEvent>,
    pub enqueued_at: std::time::Instant,
}

impl QueuedEvent {
    pub fn new(event: Arc<AuditEvent>) -> Self {
        Self {
            event,
            enqueued_at: std::time::Instant::now(),
        }
    }
}

/// Non-blocking enqueue
pub(crate) fn submit(
    sender: &mpsc::Sender<QueuedEvent>,
    shared: &Shared,
    event: Arc<AuditEvent>,
) -> Result<()> {
    match sender.try_send(QueuedEvent::new(event)) {
        Ok(()) => {
            shared.metrics.record_event_received();
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(queued)) => {
            shared.metrics.record_event_dropped();
            trace!(event_id = %queued.event.id, "ingest queue full, event dropped");
            Err(StreamError::CapacityExceeded {
                resource: Resource::IngestQueue,
                max: sender.max_capacity(),
            })
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(StreamError::NotRunning),
    }
}

/// Events currently waiting in the queue
pub(crate) fn queue_depth(sender: &mpsc::Sender<QueuedEvent>) -> usize {
    sender.max_capacity() - sender.capacity()
}

/// Outcome of fanning out one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FanOutStats {
    pub events: usize,
    pub delivered: usize,
    pub dropped: usize,
}

/// Batch task: flush at `batch_size` or every `flush_interval`
///
/// On cancellation the queue is closed, drained, and the remaining partial
/// batch is flushed before returning.
pub(crate) async fn run_batcher(
    mut queue: mpsc::Receiver<QueuedEvent>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let batch_size = shared.config.batch_size;
    let period = shared.config.flush_interval;
    let mut batch = Vec::with_capacity(batch_size);

    let mut flush_timer = interval_at(Instant::now() + period, period);
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = queue.recv() => match received {
                Some(queued) => {
                    batch.push(queued);
                    if batch.len() >= batch_size {
                        fan_out(&shared, &mut batch);
                        flush_timer.reset();
                    }
                }
                None => break,
            },
            _ = flush_timer.tick() => {
                if !batch.is_empty() {
                    fan_out(&shared, &mut batch);
                }
            }
        }
    }

    queue.close();
    while let Ok(queued) = queue.try_recv() {
        batch.push(queued);
        if batch.len() >= batch_size {
            fan_out(&shared, &mut batch);
        }
    }
    let flushed = fan_out(&shared, &mut batch);

    debug!(final_batch = flushed.events, "batch task stopped");
}

/// Deliver every event in `batch` to each matching connection
///
/// The envelope is built once per event and shared by all recipients. The
/// registry is snapshotted per event so connections registered mid-batch
/// see the rest of it.
pub(crate) fn fan_out(shared: &Shared, batch: &mut Vec<QueuedEvent>) -> FanOutStats {
    let mut stats = FanOutStats::default();
    let filtering_enabled = shared.config.filtering_enabled;

    for queued in batch.drain(..) {
        let message = match OutboundMessage::audit_event(&queued.event) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                warn!(event_id = %queued.event.id, error = %e, "failed to encode event");
                shared.metrics.record_error();
                continue;
            }
        };

        let mut dropped = 0u64;
        for connection in shared.registry.snapshot() {
            if !connection.matches(&queued.event, filtering_enabled) {
                continue;
            }
            match connection.deliver(&message) {
                Delivery::Queued => stats.delivered += 1,
                delivery if delivery.is_drop() => dropped += 1,
                _ => {}
            }
        }

        shared.metrics.record_messages_dropped(dropped);
        shared.metrics.record_event_streamed(queued.enqueued_at.elapsed());
        stats.dropped += dropped as usize;
        stats.events += 1;
    }

    if stats.events > 0 {
        trace!(
            events = stats.events,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "batch fanned out"
        );
    }
    stats
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
