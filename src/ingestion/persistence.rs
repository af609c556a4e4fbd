//! Periodic persistence of aggregated batches.
//!
//! Every interval the flusher swaps the aggregator's buckets out and writes each
//! batch as one transaction. A flush cycle runs under a deadline; batches it
//! could not reach, and batches whose write failed, are requeued for the next
//! cycle. A batch whose write keeps failing is dropped after
//! [`MAX_BATCH_PERSIST_ATTEMPTS`] cycles. Batches for unknown projects are
//! dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::repositories::{EventRepository, NewEvent, ProjectRepository, RepositoryError};

use super::aggregator::Aggregator;
use super::models::{AggregatedEvent, GlobalEventKey};

/// Failed write attempts after which a batch is dropped instead of requeued.
pub const MAX_BATCH_PERSIST_ATTEMPTS: u32 = 5;

/// Flush cycles attempted at shutdown while batches keep being requeued.
const FINAL_DRAIN_ATTEMPTS: usize = 3;

/// Counters for one flush cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub batches: usize,
    pub events_persisted: usize,
    pub groups_created: usize,
    pub batches_skipped: usize,
    pub batches_requeued: usize,
    pub batches_dropped: usize,
}

/// Drains the aggregator into storage on a fixed interval
pub struct PersistenceFlusher {
    aggregator: Arc<Aggregator>,
    projects: ProjectRepository,
    events: EventRepository,
    interval: Duration,
    flush_timeout: Duration,
    failures: Mutex<HashMap<GlobalEventKey, u32>>,
}

impl PersistenceFlusher {
    pub fn new(
        aggregator: Arc<Aggregator>,
        projects: ProjectRepository,
        events: EventRepository,
        interval: Duration,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            projects,
            events,
            interval,
            flush_timeout,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Flushes every interval until `shutdown` fires, then drains what is left.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting persistence flusher"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Persistence flusher shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    let started = std::time::Instant::now();
                    self.flush().await;
                    histogram!("periscope_flush_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        let lost = self.drain().await;
        info!(events_lost = lost, "Persistence flusher stopped after final drain");
    }

    /// Flushes until nothing is requeued, giving up after a few cycles.
    ///
    /// Returns the number of events still buffered, which are lost once the
    /// process exits.
    #[instrument(skip_all)]
    pub async fn drain(&self) -> usize {
        for attempt in 1..=FINAL_DRAIN_ATTEMPTS {
            let stats = self.flush().await;
            if stats.batches_requeued == 0 {
                break;
            }
            if attempt < FINAL_DRAIN_ATTEMPTS {
                warn!(
                    attempt,
                    batches_requeued = stats.batches_requeued,
                    "Final drain requeued batches, retrying"
                );
            }
        }

        let pending = self.aggregator.pending();
        if pending > 0 {
            error!(
                events_lost = pending,
                "Final drain gave up, buffered events will be lost"
            );
            counter!("periscope_flush_events_lost_total").increment(pending as u64);
        }
        pending
    }

    /// Runs one flush cycle.
    #[instrument(skip_all)]
    pub async fn flush(&self) -> FlushStats {
        let mut stats = FlushStats::default();
        let mut batches = self.aggregator.flush().into_iter();
        let deadline = Instant::now() + self.flush_timeout;

        while let Some(batch) = batches.next() {
            if batch.is_empty() {
                continue;
            }
            stats.batches += 1;

            match timeout_at(deadline, self.persist(&batch)).await {
                Ok(Ok(BatchResult::Persisted {
                    events,
                    group_created,
                })) => {
                    self.clear_failures(&batch);
                    stats.events_persisted += events;
                    if group_created {
                        stats.groups_created += 1;
                    }
                }
                Ok(Ok(BatchResult::Skipped)) => {
                    self.clear_failures(&batch);
                    stats.batches_skipped += 1;
                }
                Ok(Err(err)) => {
                    let attempts = self.record_failure(&batch);
                    if attempts >= MAX_BATCH_PERSIST_ATTEMPTS {
                        error!(
                            error = %err,
                            attempts,
                            events_dropped = batch.len(),
                            "Failed to persist event batch, dropping it"
                        );
                        self.clear_failures(&batch);
                        stats.batches_dropped += 1;
                    } else {
                        error!(
                            error = %err,
                            attempts,
                            "Failed to persist event batch, requeueing"
                        );
                        self.aggregator.requeue(batch);
                        stats.batches_requeued += 1;
                    }
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.flush_timeout.as_millis() as u64,
                        "Flush deadline reached, requeueing remaining batches"
                    );
                    self.aggregator.requeue(batch);
                    stats.batches_requeued += 1;
                    for remaining in batches.by_ref() {
                        self.aggregator.requeue(remaining);
                        stats.batches_requeued += 1;
                    }
                }
            }
        }

        counter!("periscope_flush_events_persisted_total")
            .increment(stats.events_persisted as u64);
        counter!("periscope_flush_groups_created_total").increment(stats.groups_created as u64);
        counter!("periscope_flush_batches_skipped_total").increment(stats.batches_skipped as u64);
        counter!("periscope_flush_batches_requeued_total")
            .increment(stats.batches_requeued as u64);
        counter!("periscope_flush_batches_dropped_total").increment(stats.batches_dropped as u64);

        if stats.batches > 0 {
            debug!(
                batches = stats.batches,
                events_persisted = stats.events_persisted,
                groups_created = stats.groups_created,
                batches_skipped = stats.batches_skipped,
                batches_requeued = stats.batches_requeued,
                batches_dropped = stats.batches_dropped,
                "Flush cycle completed"
            );
        }

        stats
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<GlobalEventKey, u32>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_failure(&self, batch: &[AggregatedEvent]) -> u32 {
        let Some(first) = batch.first() else {
            return 0;
        };
        let mut failures = self.failures();
        let attempts = failures.entry(first.aggregation_key.clone()).or_insert(0);
        *attempts += 1;
        *attempts
    }

    fn clear_failures(&self, batch: &[AggregatedEvent]) {
        if let Some(first) = batch.first() {
            self.failures().remove(&first.aggregation_key);
        }
    }

    async fn persist(&self, batch: &[AggregatedEvent]) -> Result<BatchResult, RepositoryError> {
        let Some(first) = batch.first() else {
            return Ok(BatchResult::Skipped);
        };
        let project_id = first.aggregation_key.project_id;

        // One lookup per batch; a failed lookup only skips this batch.
        match self.projects.find_project(project_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(project_id, "Skipping batch for unknown project");
                return Ok(BatchResult::Skipped);
            }
            Err(err) => {
                error!(project_id, error = %err, "Project lookup failed, skipping batch");
                return Ok(BatchResult::Skipped);
            }
        }

        let events = batch
            .iter()
            .map(|aggregated| {
                let event = &aggregated.project_event;
                NewEvent {
                    event_id: event.event_id.clone(),
                    title: event.title.clone(),
                    raw_fingerprint: event.raw_fingerprint.clone(),
                    stack_trace: event.trace.clone(),
                    payload: event.raw_event.clone(),
                    occurred_at: event.occurred_at,
                }
            })
            .collect();

        let outcome = self
            .events
            .persist_batch(project_id, &first.aggregation_key.hash, events)
            .await?;

        if let Some(alert_id) = outcome.alert_id {
            info!(
                project_id,
                event_group_id = outcome.event_group_id,
                alert_id,
                "New event group raised an alert"
            );
        }

        Ok(BatchResult::Persisted {
            events: outcome.events_inserted,
            group_created: outcome.group_created,
        })
    }
}

enum BatchResult {
    Persisted { events: usize, group_created: bool },
    Skipped,
}
