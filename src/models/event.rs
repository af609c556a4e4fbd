//! Event entity model
//!
//! One row per persisted occurrence, appended by the persistence flusher.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Client supplied event identifier
    pub event_id: String,

    /// Message of the first exception
    pub title: String,

    /// Fingerprint hash (the group's aggregation key)
    pub fingerprint: String,

    /// Fingerprint elements as sent by the client
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub raw_fingerprint: Option<JsonValue>,

    /// Stack trace of the first exception
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub stack_trace: Option<JsonValue>,

    /// Full SDK event
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub payload: Option<JsonValue>,

    pub event_group_id: i32,
    pub project_id: i32,

    /// Client timestamp when present, otherwise the persistence time
    pub emitted_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::event_group::Entity",
        from = "Column::EventGroupId",
        to = "super::event_group::Column::Id"
    )]
    EventGroup,
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
}

impl Related<super::event_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EventGroup.def()
    }
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
