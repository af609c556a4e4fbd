//! # Event Repository
//!
//! Persists flushed batches as event groups, alerts and events.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde_json::Value as JsonValue;

use crate::clock::{Clock, system_clock};
use crate::models::{alert, event, event_group};

use super::RepositoryError;

/// Rows per INSERT statement. Each event row binds 11 parameters.
const EVENT_INSERT_CHUNK: usize = 500;

/// One occurrence to be appended to a group
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_id: String,
    pub title: String,
    pub raw_fingerprint: JsonValue,
    pub stack_trace: JsonValue,
    pub payload: JsonValue,
    /// Client timestamp, when the SDK supplied one
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Result of persisting one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub event_group_id: i32,
    /// True when this batch created the group (and its alert)
    pub group_created: bool,
    pub alert_id: Option<i32>,
    pub events_inserted: usize,
}

/// Repository for event groups and events
#[derive(Clone)]
pub struct EventRepository {
    db: DatabaseConnection,
    clock: Clock,
}

impl EventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Finds or creates the group for `(project_id, aggregation_key)` and appends `events`.
    ///
    /// A new group starts with `total_count = events.len()` and gets exactly one alert.
    /// An existing group has its count incremented atomically and `event_received_at`
    /// refreshed. Everything happens in one transaction.
    pub async fn persist_batch(
        &self,
        project_id: i32,
        aggregation_key: &str,
        events: Vec<NewEvent>,
    ) -> Result<BatchOutcome, RepositoryError> {
        let Some(first) = events.first() else {
            return Err(RepositoryError::not_found("event batch", aggregation_key));
        };
        let now = (self.clock)().fixed_offset();
        let batch_size = events.len() as i64;
        let txn = self.db.begin().await?;

        let existing = event_group::Entity::find()
            .filter(event_group::Column::ProjectId.eq(project_id))
            .filter(event_group::Column::AggregationKey.eq(aggregation_key))
            .one(&txn)
            .await?;

        let (event_group_id, group_created, alert_id) = match existing {
            Some(group) => {
                event_group::Entity::update_many()
                    .col_expr(
                        event_group::Column::TotalCount,
                        Expr::col(event_group::Column::TotalCount).add(batch_size),
                    )
                    .col_expr(event_group::Column::EventReceivedAt, Expr::value(now))
                    .col_expr(event_group::Column::UpdatedAt, Expr::value(now))
                    .filter(event_group::Column::Id.eq(group.id))
                    .exec(&txn)
                    .await?;
                (group.id, false, None)
            }
            None => {
                let group = event_group::ActiveModel {
                    project_id: Set(project_id),
                    aggregation_key: Set(aggregation_key.to_string()),
                    total_count: Set(batch_size),
                    event_received_at: Set(now),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;

                let alert = alert::ActiveModel {
                    project_id: Set(project_id),
                    event_group_id: Set(group.id),
                    title: Set(first.title.clone()),
                    description: Set(Some(alert_description(aggregation_key, &first.stack_trace))),
                    triggered_at: Set(now),
                    notified_at: Set(None),
                    escalated_at: Set(None),
                    acknowledged_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;

                (group.id, true, Some(alert.id))
            }
        };

        let events_inserted = events.len();
        let mut rows = events.into_iter().map(|new_event| event::ActiveModel {
            event_id: Set(new_event.event_id),
            title: Set(new_event.title),
            fingerprint: Set(aggregation_key.to_string()),
            raw_fingerprint: Set(Some(new_event.raw_fingerprint)),
            stack_trace: Set(Some(new_event.stack_trace)),
            payload: Set(Some(new_event.payload)),
            event_group_id: Set(event_group_id),
            project_id: Set(project_id),
            emitted_at: Set(new_event
                .occurred_at
                .map(|at| at.fixed_offset())
                .unwrap_or(now)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        });
        // Bounded statements keep large batches under the bind parameter limit.
        loop {
            let chunk: Vec<_> = rows.by_ref().take(EVENT_INSERT_CHUNK).collect();
            if chunk.is_empty() {
                break;
            }
            event::Entity::insert_many(chunk).exec(&txn).await?;
        }

        txn.commit().await?;

        Ok(BatchOutcome {
            event_group_id,
            group_created,
            alert_id,
            events_inserted,
        })
    }

    /// Most recently persisted event of a group, used as notification content.
    pub async fn latest_for_group(
        &self,
        project_id: i32,
        event_group_id: i32,
    ) -> Result<Option<event::Model>, RepositoryError> {
        Ok(event::Entity::find()
            .filter(event::Column::ProjectId.eq(project_id))
            .filter(event::Column::EventGroupId.eq(event_group_id))
            .order_by_desc(event::Column::CreatedAt)
            .order_by_desc(event::Column::Id)
            .one(&self.db)
            .await?)
    }

    pub async fn find_group(
        &self,
        project_id: i32,
        aggregation_key: &str,
    ) -> Result<Option<event_group::Model>, RepositoryError> {
        Ok(event_group::Entity::find()
            .filter(event_group::Column::ProjectId.eq(project_id))
            .filter(event_group::Column::AggregationKey.eq(aggregation_key))
            .one(&self.db)
            .await?)
    }
}

fn alert_description(aggregation_key: &str, stack_trace: &JsonValue) -> String {
    format!("{}\n{}", aggregation_key, stack_trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, PaginatorTrait};
    use serde_json::json;

    use crate::repositories::ProjectRepository;

    async fn setup() -> (DatabaseConnection, i32) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        let project = ProjectRepository::new(db.clone())
            .create("events-test")
            .await
            .expect("create project");
        (db, project.project.id)
    }

    fn new_event(event_id: &str, title: &str) -> NewEvent {
        NewEvent {
            event_id: event_id.to_string(),
            title: title.to_string(),
            raw_fingerprint: json!(["test"]),
            stack_trace: json!({ "frames": [] }),
            payload: json!({ "event_id": event_id }),
            occurred_at: None,
        }
    }

    #[tokio::test]
    async fn repeated_batches_share_one_group_and_alert() {
        let (db, project_id) = setup().await;
        let repo = EventRepository::new(db.clone());

        let first = repo
            .persist_batch(
                project_id,
                "abc",
                vec![new_event("e1", "boom"), new_event("e2", "boom again")],
            )
            .await
            .expect("first batch");
        assert!(first.group_created);
        assert!(first.alert_id.is_some());

        let second = repo
            .persist_batch(project_id, "abc", vec![new_event("e3", "boom")])
            .await
            .expect("second batch");
        assert!(!second.group_created);
        assert_eq!(second.alert_id, None);
        assert_eq!(second.event_group_id, first.event_group_id);

        let group = repo
            .find_group(project_id, "abc")
            .await
            .expect("lookup")
            .expect("group exists");
        assert_eq!(group.total_count, 3);

        assert_eq!(alert::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(event::Entity::find().count(&db).await.unwrap(), 3);

        let alert = alert::Entity::find().one(&db).await.unwrap().unwrap();
        assert_eq!(alert.title, "boom");
        assert!(alert.notified_at.is_none());
    }

    #[tokio::test]
    async fn latest_for_group_returns_newest_event() {
        let (db, project_id) = setup().await;
        let repo = EventRepository::new(db);

        let outcome = repo
            .persist_batch(
                project_id,
                "xyz",
                vec![new_event("first", "a"), new_event("second", "b")],
            )
            .await
            .expect("persist");

        let latest = repo
            .latest_for_group(project_id, outcome.event_group_id)
            .await
            .expect("lookup")
            .expect("event exists");
        assert_eq!(latest.event_id, "second");

        assert!(
            repo.latest_for_group(project_id, outcome.event_group_id + 100)
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn client_timestamp_is_used_for_emitted_at() {
        let (db, project_id) = setup().await;
        let repo = EventRepository::new(db);
        let occurred_at = DateTime::parse_from_rfc3339("2025-03-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut occurrence = new_event("timed", "late");
        occurrence.occurred_at = Some(occurred_at);
        let outcome = repo
            .persist_batch(project_id, "timed", vec![occurrence])
            .await
            .expect("persist");

        let stored = repo
            .latest_for_group(project_id, outcome.event_group_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.emitted_at.with_timezone(&Utc), occurred_at);
    }
}
