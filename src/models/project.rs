//! Project entity model

use sea_orm::entity::prelude::*;

/// A project groups the events, alerts and alert destinations of one client application
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Human readable project name (unique)
    pub name: String,

    /// Opaque identifier used by SDK clients in the ingestion URL
    pub public_id: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::project_ingestion_api_key::Entity")]
    IngestionApiKeys,
    #[sea_orm(has_many = "super::event_group::Entity")]
    EventGroups,
    #[sea_orm(has_many = "super::alert::Entity")]
    Alerts,
    #[sea_orm(has_many = "super::project_alert_destination::Entity")]
    AlertDestinations,
}

impl Related<super::project_ingestion_api_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IngestionApiKeys.def()
    }
}

impl Related<super::event_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EventGroups.def()
    }
}

impl Related<super::alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Alerts.def()
    }
}

impl Related<super::project_alert_destination::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlertDestinations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
