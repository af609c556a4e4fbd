//! ProjectAlertDestination entity model

use std::collections::BTreeMap;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A delivery target configured for a project
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "project_alert_destinations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,
    pub alert_destination_type_id: i32,
    /// Channel specific settings, see [`WebhookConfiguration`]
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub configuration: Option<JsonValue>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

/// Configuration stored for webhook based destinations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfiguration {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Model {
    /// Decodes the webhook configuration, if one is stored.
    pub fn webhook_configuration(&self) -> Option<WebhookConfiguration> {
        self.configuration
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(
        belongs_to = "super::alert_destination_type::Entity",
        from = "Column::AlertDestinationTypeId",
        to = "super::alert_destination_type::Column::Id"
    )]
    AlertDestinationType,
    #[sea_orm(has_many = "super::alert_destination_notification::Entity")]
    Notifications,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::alert_destination_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlertDestinationType.def()
    }
}

impl Related<super::alert_destination_notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notifications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
