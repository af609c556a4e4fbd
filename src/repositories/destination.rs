//! # Destination Repository
//!
//! Destination types and per-project alert destinations.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::clock::{Clock, system_clock};
use crate::models::project_alert_destination::WebhookConfiguration;
use crate::models::{alert_destination_type, project_alert_destination};

use super::RepositoryError;

/// A project destination together with its type
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationWithType {
    pub destination: project_alert_destination::Model,
    pub destination_type: alert_destination_type::Model,
}

/// Repository for destination types and project destinations
#[derive(Clone)]
pub struct DestinationRepository {
    db: DatabaseConnection,
    clock: Clock,
}

impl DestinationRepository {
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

    pub async fn find_type_by_key(
        &self,
        key: &str,
    ) -> Result<Option<alert_destination_type::Model>, RepositoryError> {
        Ok(alert_destination_type::Entity::find()
            .filter(alert_destination_type::Column::Key.eq(key))
            .one(&self.db)
            .await?)
    }

    /// Returns the type with `key`, inserting it when missing. Existing titles are left alone.
    pub async fn ensure_type(
        &self,
        key: &str,
        title: &str,
    ) -> Result<(alert_destination_type::Model, bool), RepositoryError> {
        if let Some(existing) = self.find_type_by_key(key).await? {
            return Ok((existing, false));
        }

        let now = (self.clock)().fixed_offset();
        let created = alert_destination_type::ActiveModel {
            key: Set(key.to_string()),
            title: Set(title.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        Ok((created, true))
    }

    /// Configures a destination of type `type_key` for a project.
    pub async fn create(
        &self,
        project_id: i32,
        type_key: &str,
        configuration: Option<WebhookConfiguration>,
    ) -> Result<DestinationWithType, RepositoryError> {
        let destination_type = self
            .find_type_by_key(type_key)
            .await?
            .ok_or_else(|| RepositoryError::not_found("alert destination type", type_key))?;

        let configuration = configuration
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| sea_orm::DbErr::Custom(format!("invalid configuration: {}", err)))?;

        let now = (self.clock)().fixed_offset();
        let destination = project_alert_destination::ActiveModel {
            project_id: Set(project_id),
            alert_destination_type_id: Set(destination_type.id),
            configuration: Set(configuration),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            project_id,
            destination_id = destination.id,
            destination_type = %destination_type.key,
            "Alert destination configured"
        );

        Ok(DestinationWithType {
            destination,
            destination_type,
        })
    }

    pub async fn find_with_type(
        &self,
        id: i32,
    ) -> Result<Option<DestinationWithType>, RepositoryError> {
        let found = project_alert_destination::Entity::find_by_id(id)
            .find_also_related(alert_destination_type::Entity)
            .one(&self.db)
            .await?;

        match found {
            Some((destination, Some(destination_type))) => Ok(Some(DestinationWithType {
                destination,
                destination_type,
            })),
            Some((destination, None)) => Err(RepositoryError::not_found(
                "alert destination type",
                destination.alert_destination_type_id,
            )),
            None => Ok(None),
        }
    }

    pub async fn list_for_project(
        &self,
        project_id: i32,
    ) -> Result<Vec<DestinationWithType>, RepositoryError> {
        let rows = project_alert_destination::Entity::find()
            .filter(project_alert_destination::Column::ProjectId.eq(project_id))
            .order_by_asc(project_alert_destination::Column::Id)
            .find_also_related(alert_destination_type::Entity)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(destination, destination_type)| {
                destination_type.map(|destination_type| DestinationWithType {
                    destination,
                    destination_type,
                })
            })
            .collect())
    }
}
