//! AlertDestinationNotification entity model
//!
//! One row per (alert, destination). `total_attempts` only grows; a row is
//! eligible for dispatch while `completed_at` is null and the attempt ceiling
//! has not been reached.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_destination_notifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub alert_id: i32,
    pub project_alert_destination_id: i32,
    pub total_attempts: i32,
    /// Time of the most recent dispatch claim
    pub attempted_at: Option<DateTimeWithTimeZone>,
    /// Set once, on successful emission
    pub completed_at: Option<DateTimeWithTimeZone>,
    /// Set when the final permitted attempt fails
    pub failed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::alert::Entity",
        from = "Column::AlertId",
        to = "super::alert::Column::Id"
    )]
    Alert,
    #[sea_orm(
        belongs_to = "super::project_alert_destination::Entity",
        from = "Column::ProjectAlertDestinationId",
        to = "super::project_alert_destination::Column::Id"
    )]
    ProjectAlertDestination,
}

impl Related<super::alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Alert.def()
    }
}

impl Related<super::project_alert_destination::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProjectAlertDestination.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
