//! ProjectIngestionApiKey entity model

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use subtle::ConstantTimeEq;

/// Key presented by SDK clients (`sentry_key=`) when posting events
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "project_ingestion_api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,
    pub key: String,
    /// Keys without an expiry never expire
    pub expires_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Returns true when `candidate` matches this key and the key has not expired at `now`.
    pub fn grants(&self, candidate: &str, now: DateTime<Utc>) -> bool {
        let matches: bool = self.key.as_bytes().ct_eq(candidate.as_bytes()).into();
        matches
            && self
                .expires_at
                .is_none_or(|expires_at| expires_at.with_timezone(&Utc) > now)
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
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
