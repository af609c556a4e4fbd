//! # Repository Layer
//!
//! Repositories wrap SeaORM operations for each aggregate. Lookups that find
//! nothing return `Ok(None)`; only genuine storage failures are errors.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub mod alert;
pub mod cache;
pub mod destination;
pub mod event;
pub mod notification;
pub mod project;

pub use alert::{AdvancedAlert, AlertRepository};
pub use cache::ProjectCache;
pub use destination::{DestinationRepository, DestinationWithType};
pub use event::{BatchOutcome, EventRepository, NewEvent};
pub use notification::NotificationRepository;
pub use project::{ProjectRepository, ProjectWithKeys};

/// Errors raised by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("storage operation '{operation}' timed out")]
    Timeout { operation: &'static str },
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Runs a storage future under a deadline.
///
/// A transaction still open when the deadline fires is dropped, which rolls it back.
pub async fn with_deadline<T, F>(
    operation: &'static str,
    limit: Duration,
    future: F,
) -> Result<T, RepositoryError>
where
    F: Future<Output = Result<T, RepositoryError>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| RepositoryError::Timeout { operation })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_deadline_reports_timeout() {
        let result: Result<(), RepositoryError> =
            with_deadline("slow operation", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(RepositoryError::Timeout {
                operation: "slow operation"
            })
        ));
    }

    #[tokio::test]
    async fn with_deadline_passes_through_result() {
        let value = with_deadline("fast operation", Duration::from_secs(1), async {
            Ok::<_, RepositoryError>(7)
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
    }
}
