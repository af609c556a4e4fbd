//! # Alert Repository
//!
//! Moves open alerts to `notified` and fans them out into one notification row
//! per configured destination.

use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};

use crate::clock::{Clock, system_clock};
use crate::models::{alert, alert_destination_notification, project_alert_destination};

use super::RepositoryError;

/// An alert that was just marked notified, with the number of rows created for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedAlert {
    pub alert: alert::Model,
    pub notifications_created: usize,
}

/// Repository for alert lifecycle operations
#[derive(Clone)]
pub struct AlertRepository {
    db: DatabaseConnection,
    clock: Clock,
}

impl AlertRepository {
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

    /// Advances the oldest open alert (by `triggered_at`, then id).
    ///
    /// Sets `notified_at` and inserts one pending notification per destination of the
    /// alert's project, all in one transaction. Returns `Ok(None)` when nothing is open.
    pub async fn advance_oldest_open(&self) -> Result<Option<AdvancedAlert>, RepositoryError> {
        let now = (self.clock)().fixed_offset();
        let txn = self.db.begin().await?;

        let Some(candidate) = alert::Entity::find()
            .filter(alert::Column::NotifiedAt.is_null())
            .order_by_asc(alert::Column::TriggeredAt)
            .order_by_asc(alert::Column::Id)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(None);
        };

        let updated = alert::Entity::update_many()
            .col_expr(alert::Column::NotifiedAt, Expr::value(now))
            .col_expr(alert::Column::UpdatedAt, Expr::value(now))
            .filter(alert::Column::Id.eq(candidate.id))
            .filter(alert::Column::NotifiedAt.is_null())
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            // Another worker advanced it between select and update.
            txn.rollback().await?;
            return Ok(None);
        }

        let destinations = project_alert_destination::Entity::find()
            .filter(project_alert_destination::Column::ProjectId.eq(candidate.project_id))
            .order_by_asc(project_alert_destination::Column::Id)
            .all(&txn)
            .await?;

        let notifications_created = destinations.len();
        if !destinations.is_empty() {
            let rows = destinations
                .iter()
                .map(|destination| alert_destination_notification::ActiveModel {
                    alert_id: Set(candidate.id),
                    project_alert_destination_id: Set(destination.id),
                    total_attempts: Set(0),
                    attempted_at: Set(None),
                    completed_at: Set(None),
                    failed_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                });
            alert_destination_notification::Entity::insert_many(rows)
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;

        let alert = alert::Model {
            notified_at: Some(now),
            updated_at: now,
            ..candidate
        };

        Ok(Some(AdvancedAlert {
            alert,
            notifications_created,
        }))
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<alert::Model>, RepositoryError> {
        Ok(alert::Entity::find_by_id(id).one(&self.db).await?)
    }

    /// Alerts of a project, most recently triggered first.
    pub async fn list_for_project(
        &self,
        project_id: i32,
    ) -> Result<Vec<alert::Model>, RepositoryError> {
        Ok(alert::Entity::find()
            .filter(alert::Column::ProjectId.eq(project_id))
            .order_by_desc(alert::Column::TriggeredAt)
            .order_by_desc(alert::Column::Id)
            .all(&self.db)
            .await?)
    }
}
