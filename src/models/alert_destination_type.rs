//! AlertDestinationType entity model

use sea_orm::entity::prelude::*;

/// Key of the structured-log destination type
pub const KEY_INTERNAL_LOGGER: &str = "internal.logger";
/// Key of the generic JSON webhook destination type
pub const KEY_GENERIC_WEBHOOK: &str = "webhook.generic";
/// Key of the Slack incoming-webhook destination type
pub const KEY_SLACK_WEBHOOK: &str = "webhook.slack";

/// Catalogue entry describing how a destination is delivered
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_destination_types")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Stable key used to select the notification channel
    #[sea_orm(unique)]
    pub key: String,
    pub title: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::project_alert_destination::Entity")]
    ProjectAlertDestinations,
}

impl Related<super::project_alert_destination::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProjectAlertDestinations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
