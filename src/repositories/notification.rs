//! # Notification Repository
//!
//! Claims pending alert destination notifications for dispatch and records
//! their outcome.

use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};

use crate::clock::{Clock, system_clock};
use crate::models::alert_destination_notification;

use super::RepositoryError;

/// Repository for alert destination notifications
#[derive(Clone)]
pub struct NotificationRepository {
    db: DatabaseConnection,
    clock: Clock,
}

impl NotificationRepository {
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

    /// Claims the stalest pending notification with fewer than `max_attempts` attempts.
    ///
    /// The attempt counter, `attempted_at` and `updated_at` are bumped in the same
    /// transaction as the selection; the returned model reflects the bumped values.
    pub async fn claim_next(
        &self,
        max_attempts: i32,
    ) -> Result<Option<alert_destination_notification::Model>, RepositoryError> {
        use alert_destination_notification::{Column, Entity};

        let now = (self.clock)().fixed_offset();
        let txn = self.db.begin().await?;

        let Some(candidate) = Entity::find()
            .filter(Column::CompletedAt.is_null())
            .filter(Column::FailedAt.is_null())
            .filter(Column::TotalAttempts.lt(max_attempts))
            .order_by_asc(Column::UpdatedAt)
            .order_by_asc(Column::Id)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(None);
        };

        let claimed = Entity::update_many()
            .col_expr(
                Column::TotalAttempts,
                Expr::col(Column::TotalAttempts).add(1),
            )
            .col_expr(Column::AttemptedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(candidate.id))
            .filter(Column::CompletedAt.is_null())
            .filter(Column::TotalAttempts.lt(max_attempts))
            .exec(&txn)
            .await?;

        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        let refreshed = Entity::find_by_id(candidate.id)
            .one(&txn)
            .await?
            .ok_or_else(|| RepositoryError::not_found("alert destination notification", candidate.id))?;

        txn.commit().await?;
        Ok(Some(refreshed))
    }

    /// Records a successful emission. A row is completed at most once.
    pub async fn mark_completed(&self, id: i32) -> Result<bool, RepositoryError> {
        use alert_destination_notification::{Column, Entity};

        let now = (self.clock)().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::CompletedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Parks a row whose final permitted attempt failed.
    pub async fn mark_failed(&self, id: i32) -> Result<bool, RepositoryError> {
        use alert_destination_notification::{Column, Entity};

        let now = (self.clock)().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::FailedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::CompletedAt.is_null())
            .filter(Column::FailedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn find_by_id(
        &self,
        id: i32,
    ) -> Result<Option<alert_destination_notification::Model>, RepositoryError> {
        Ok(alert_destination_notification::Entity::find_by_id(id)
            .one(&self.db)
            .await?)
    }

    pub async fn list_for_alert(
        &self,
        alert_id: i32,
    ) -> Result<Vec<alert_destination_notification::Model>, RepositoryError> {
        Ok(alert_destination_notification::Entity::find()
            .filter(alert_destination_notification::Column::AlertId.eq(alert_id))
            .order_by_asc(alert_destination_notification::Column::Id)
            .all(&self.db)
            .await?)
    }
}
