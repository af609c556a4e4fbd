//! Alert entity model
//!
//! An alert is raised once per event group. Lifecycle: open (`notified_at` null)
//! then notified. Escalation and acknowledgement are recorded by operators.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,
    pub event_group_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub triggered_at: DateTimeWithTimeZone,
    pub notified_at: Option<DateTimeWithTimeZone>,
    pub escalated_at: Option<DateTimeWithTimeZone>,
    pub acknowledged_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
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
        belongs_to = "super::event_group::Entity",
        from = "Column::EventGroupId",
        to = "super::event_group::Column::Id"
    )]
    EventGroup,
    #[sea_orm(has_many = "super::alert_destination_notification::Entity")]
    Notifications,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::event_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EventGroup.def()
    }
}

impl Related<super::alert_destination_notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notifications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
