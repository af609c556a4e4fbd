//! In-memory event aggregator.
//!
//! Ingestion requests publish serialized events onto a bounded channel. A single
//! consumer task decodes them, derives their grouping key and appends them to a
//! lock guarded map of buckets. The persistence flusher periodically swaps the
//! whole map out with [`Aggregator::flush`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::fingerprint::fingerprint;
use super::models::{
    AggregatedEvent, GlobalEventKey, ProjectEvent, ProjectEventMessage, SdkEvent,
};

/// Errors raised by the aggregator's channel operations
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("aggregator channel is closed")]
    ChannelClosed,
    #[error("aggregator already has a subscriber")]
    AlreadySubscribed,
}

/// Reasons an inbound event cannot be grouped
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("event {event_id} has no exception")]
    MissingException { event_id: String },
    #[error("failed to serialize event data: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Read side of the aggregator's channel, handed out once
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Vec<u8>>,
}

type Buckets = HashMap<GlobalEventKey, Vec<AggregatedEvent>>;

/// Publish/subscribe buffer plus the grouping map
#[derive(Debug)]
pub struct Aggregator {
    sender: mpsc::Sender<Vec<u8>>,
    receiver: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    buckets: Mutex<Buckets>,
}

impl Aggregator {
    /// Creates an aggregator whose channel buffers up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Serializes `{project_id, event}` and hands it to the consumer.
    ///
    /// Waits only while the channel buffer is full.
    pub async fn publish(&self, project_id: i32, event: SdkEvent) -> Result<(), AggregatorError> {
        let message = ProjectEventMessage { project_id, event };
        let payload = serde_json::to_vec(&message)?;
        self.sender
            .send(payload)
            .await
            .map_err(|_| AggregatorError::ChannelClosed)?;
        counter!("periscope_aggregator_published_total").increment(1);
        Ok(())
    }

    /// Takes the read side of the channel. Only the first call succeeds.
    pub fn subscribe(&self) -> Result<Subscription, AggregatorError> {
        lock(&self.receiver)
            .take()
            .map(|receiver| Subscription { receiver })
            .ok_or(AggregatorError::AlreadySubscribed)
    }

    /// Consumes published messages until `shutdown` fires, then drains what is
    /// already buffered and returns.
    #[instrument(skip_all)]
    pub async fn consume(&self, mut subscription: Subscription, shutdown: CancellationToken) {
        info!("Starting aggregator consumer");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Aggregator consumer shutdown requested");
                    break;
                }
                message = subscription.receiver.recv() => {
                    match message {
                        Some(payload) => self.handle_message(&payload),
                        None => {
                            info!("Aggregator channel closed");
                            return;
                        }
                    }
                }
            }
        }

        let mut drained = 0usize;
        while let Ok(payload) = subscription.receiver.try_recv() {
            self.handle_message(&payload);
            drained += 1;
        }

        info!(drained, "Aggregator consumer stopped");
    }

    /// Decodes, extracts and enqueues one message. Failures are logged and the
    /// message is dropped.
    fn handle_message(&self, payload: &[u8]) {
        let message: ProjectEventMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "Dropping undecodable aggregator message");
                counter!("periscope_aggregator_dropped_total", "reason" => "decode").increment(1);
                return;
            }
        };

        match extract(message.project_id, &message.event) {
            Ok(project_event) => self.enqueue(AggregatedEvent {
                aggregation_key: GlobalEventKey {
                    project_id: project_event.project_id,
                    hash: project_event.fingerprint.clone(),
                },
                project_event,
            }),
            Err(err) => {
                warn!(
                    error = %err,
                    project_id = message.project_id,
                    event_id = %message.event.event_id,
                    "Dropping event that could not be extracted"
                );
                counter!("periscope_aggregator_dropped_total", "reason" => "extract").increment(1);
            }
        }
    }

    /// Appends to the bucket for the event's key, creating it on first insert.
    pub fn enqueue(&self, event: AggregatedEvent) {
        let mut buckets = lock(&self.buckets);
        buckets
            .entry(event.aggregation_key.clone())
            .or_default()
            .push(event);
        gauge!("periscope_aggregator_buckets").set(buckets.len() as f64);
        counter!("periscope_aggregator_enqueued_total").increment(1);
    }

    /// Swaps out every bucket and returns them as batches, one per key.
    pub fn flush(&self) -> Vec<Vec<AggregatedEvent>> {
        let drained = std::mem::take(&mut *lock(&self.buckets));
        gauge!("periscope_aggregator_buckets").set(0.0);

        let batches: Vec<Vec<AggregatedEvent>> = drained.into_values().collect();
        if !batches.is_empty() {
            debug!(batches = batches.len(), "Aggregator flushed");
        }
        batches
    }

    /// Puts a batch that could not be persisted back in front of anything
    /// enqueued for the same key since the flush.
    pub fn requeue(&self, batch: Vec<AggregatedEvent>) {
        let Some(first) = batch.first() else {
            return;
        };
        let key = first.aggregation_key.clone();
        let mut buckets = lock(&self.buckets);
        let bucket = buckets.entry(key).or_default();
        bucket.splice(0..0, batch);
        gauge!("periscope_aggregator_buckets").set(buckets.len() as f64);
    }

    /// Number of events currently buffered across all buckets.
    pub fn pending(&self) -> usize {
        lock(&self.buckets).values().map(Vec::len).sum()
    }
}

/// Derives the normalized [`ProjectEvent`] from an SDK event.
pub fn extract(project_id: i32, event: &SdkEvent) -> Result<ProjectEvent, ExtractError> {
    let first = event
        .exception
        .first()
        .ok_or_else(|| ExtractError::MissingException {
            event_id: event.event_id.clone(),
        })?;

    Ok(ProjectEvent {
        project_id,
        event_id: event.event_id.clone(),
        fingerprint: fingerprint(&event.fingerprint),
        raw_fingerprint: serde_json::to_value(&event.fingerprint)?,
        trace: serde_json::to_value(&first.stacktrace)?,
        raw_event: serde_json::to_value(event)?,
        title: first.value.clone(),
        occurred_at: event.occurred_at(),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
