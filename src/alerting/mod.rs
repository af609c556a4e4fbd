//! # Alerting Scheduler
//!
//! Periodic task with two independent steps per tick:
//!
//! 1. advance the oldest open alert to `notified`, creating one notification row
//!    per destination configured for its project;
//! 2. claim the stalest pending notification and emit it through the channel
//!    registered for its destination type.
//!
//! A notification is claimed at most [`MAX_NOTIFICATION_ATTEMPTS`] times. When the
//! last permitted attempt fails the row is marked failed and never retried.

use std::time::Duration;

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::models::alert_destination_notification;
use crate::notification::{
    ALERT_EVENT_TYPE, ChannelError, ChannelRegistry, EventAttributes, NotificationEvent,
    RegistryError,
};
use crate::repositories::{
    AlertRepository, DestinationRepository, EventRepository, NotificationRepository,
    RepositoryError, with_deadline,
};

/// Attempt ceiling for a single notification row
pub const MAX_NOTIFICATION_ATTEMPTS: i32 = 10;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Result of the dispatch step for one claimed notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered {
        notification_id: i32,
    },
    Failed {
        notification_id: i32,
        attempts: i32,
        exhausted: bool,
    },
}

/// What one tick did. `None` means the step found nothing to do or was abandoned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub advanced_alert_id: Option<i32>,
    pub notifications_created: usize,
    pub dispatch: Option<DispatchOutcome>,
}

pub struct AlertingScheduler {
    alerts: AlertRepository,
    notifications: NotificationRepository,
    destinations: DestinationRepository,
    events: EventRepository,
    registry: ChannelRegistry,
    tick_interval: Duration,
    storage_timeout: Duration,
}

impl AlertingScheduler {
    pub fn new(
        alerts: AlertRepository,
        notifications: NotificationRepository,
        destinations: DestinationRepository,
        events: EventRepository,
        registry: ChannelRegistry,
        tick_interval: Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            alerts,
            notifications,
            destinations,
            events,
            registry,
            tick_interval,
            storage_timeout,
        }
    }

    /// Ticks until `shutdown` fires. The tick in progress is finished first.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Starting alerting scheduler"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Alerting scheduler shutdown requested");
                    break;
                }
                _ = sleep(self.tick_interval) => {
                    let started = std::time::Instant::now();
                    self.tick().await;
                    histogram!("periscope_alerting_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Alerting scheduler stopped");
    }

    /// Runs both steps once. A failure in one step does not skip the other.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        match with_deadline(
            "advance alert",
            self.storage_timeout,
            self.alerts.advance_oldest_open(),
        )
        .await
        {
            Ok(Some(advanced)) => {
                info!(
                    alert_id = advanced.alert.id,
                    project_id = advanced.alert.project_id,
                    notifications = advanced.notifications_created,
                    "Alert marked notified"
                );
                counter!("periscope_alerts_notified_total").increment(1);
                report.advanced_alert_id = Some(advanced.alert.id);
                report.notifications_created = advanced.notifications_created;
            }
            Ok(None) => debug!("No open alerts"),
            Err(err) => error!(error = %err, "Failed to advance alert"),
        }

        match self.dispatch_next().await {
            Ok(outcome) => report.dispatch = outcome,
            Err(err) => error!(error = %err, "Notification dispatch step abandoned"),
        }

        report
    }

    async fn dispatch_next(&self) -> Result<Option<DispatchOutcome>, RepositoryError> {
        let claimed = with_deadline(
            "claim notification",
            self.storage_timeout,
            self.notifications.claim_next(MAX_NOTIFICATION_ATTEMPTS),
        )
        .await?;

        let Some(notification) = claimed else {
            debug!("No pending notifications");
            return Ok(None);
        };

        let outcome = match self.deliver(&notification).await {
            Ok(()) => {
                with_deadline(
                    "complete notification",
                    self.storage_timeout,
                    self.notifications.mark_completed(notification.id),
                )
                .await?;
                info!(
                    notification_id = notification.id,
                    alert_id = notification.alert_id,
                    attempts = notification.total_attempts,
                    "Notification delivered"
                );
                counter!("periscope_notifications_delivered_total").increment(1);
                DispatchOutcome::Delivered {
                    notification_id: notification.id,
                }
            }
            // Storage trouble abandons the step; a vanished row counts as a failed attempt.
            Err(DispatchError::Repository(
                err @ (RepositoryError::Database(_) | RepositoryError::Timeout { .. }),
            )) => return Err(err),
            Err(err) => self.record_failure(&notification, &err).await?,
        };

        Ok(Some(outcome))
    }

    /// Resolves everything the channel needs and emits.
    async fn deliver(
        &self,
        notification: &alert_destination_notification::Model,
    ) -> Result<(), DispatchError> {
        let destination = with_deadline(
            "load destination",
            self.storage_timeout,
            self.destinations
                .find_with_type(notification.project_alert_destination_id),
        )
        .await?
        .ok_or_else(|| {
            RepositoryError::not_found(
                "project alert destination",
                notification.project_alert_destination_id,
            )
        })?;

        let alert = with_deadline(
            "load alert",
            self.storage_timeout,
            self.alerts.find_by_id(notification.alert_id),
        )
        .await?
        .ok_or_else(|| RepositoryError::not_found("alert", notification.alert_id))?;

        let latest = with_deadline(
            "load latest event",
            self.storage_timeout,
            self.events
                .latest_for_group(alert.project_id, alert.event_group_id),
        )
        .await?;

        let event = NotificationEvent {
            id: notification.id.to_string(),
            event_type: ALERT_EVENT_TYPE.to_string(),
            data: latest
                .and_then(|event| event.payload)
                .unwrap_or(serde_json::Value::Null),
            attributes: EventAttributes {
                alert_id: alert.id.to_string(),
                title: alert.title.clone(),
                project_id: alert.project_id.to_string(),
                event_group_id: alert.event_group_id.to_string(),
            },
        };

        let channel = self
            .registry
            .resolve(&destination.destination_type.key, &destination.destination)?;
        channel.emit(&event).await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        notification: &alert_destination_notification::Model,
        err: &DispatchError,
    ) -> Result<DispatchOutcome, RepositoryError> {
        counter!("periscope_notifications_failed_attempts_total").increment(1);
        let exhausted = notification.total_attempts >= MAX_NOTIFICATION_ATTEMPTS;

        if exhausted {
            with_deadline(
                "fail notification",
                self.storage_timeout,
                self.notifications.mark_failed(notification.id),
            )
            .await?;
            warn!(
                notification_id = notification.id,
                alert_id = notification.alert_id,
                attempts = notification.total_attempts,
                error = %err,
                "Notification failed on final attempt"
            );
            counter!("periscope_notifications_exhausted_total").increment(1);
        } else {
            warn!(
                notification_id = notification.id,
                alert_id = notification.alert_id,
                attempts = notification.total_attempts,
                error = %err,
                "Notification attempt failed, will retry"
            );
        }

        Ok(DispatchOutcome::Failed {
            notification_id: notification.id,
            attempts: notification.total_attempts,
            exhausted,
        })
    }
}
