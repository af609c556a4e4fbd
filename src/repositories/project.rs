//! # Project Repository
//!
//! Project and ingestion API key persistence.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};

use crate::clock::{Clock, system_clock};
use crate::models::{project, project_ingestion_api_key};

use super::RepositoryError;

const PUBLIC_ID_LENGTH: usize = 8;
const INGESTION_KEY_LENGTH: usize = 36;

/// A project together with its ingestion API keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectWithKeys {
    pub project: project::Model,
    pub keys: Vec<project_ingestion_api_key::Model>,
}

impl ProjectWithKeys {
    /// True when `key` matches one of the project's unexpired ingestion keys.
    pub fn has_access(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.keys.iter().any(|candidate| candidate.grants(key, now))
    }
}

/// Repository for project database operations
#[derive(Clone)]
pub struct ProjectRepository {
    db: DatabaseConnection,
    clock: Clock,
}

impl ProjectRepository {
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

    /// Creates a project with a random public id and one ingestion API key.
    pub async fn create(&self, name: &str) -> Result<ProjectWithKeys, RepositoryError> {
        let now = (self.clock)().fixed_offset();
        let txn = self.db.begin().await?;

        let project = project::ActiveModel {
            name: Set(name.to_string()),
            public_id: Set(random_public_id()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let key = project_ingestion_api_key::ActiveModel {
            project_id: Set(project.id),
            key: Set(random_ingestion_key()),
            expires_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        tracing::info!(
            project_id = project.id,
            public_id = %project.public_id,
            "Project created"
        );

        Ok(ProjectWithKeys {
            project,
            keys: vec![key],
        })
    }

    /// Looks up a project without its keys.
    pub async fn find_project(&self, id: i32) -> Result<Option<project::Model>, RepositoryError> {
        Ok(project::Entity::find_by_id(id).one(&self.db).await?)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<ProjectWithKeys>, RepositoryError> {
        let Some(project) = project::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        self.attach_keys(project).await.map(Some)
    }

    pub async fn find_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<ProjectWithKeys>, RepositoryError> {
        let Some(project) = project::Entity::find()
            .filter(project::Column::PublicId.eq(public_id))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        self.attach_keys(project).await.map(Some)
    }

    async fn attach_keys(
        &self,
        project: project::Model,
    ) -> Result<ProjectWithKeys, RepositoryError> {
        let keys = project_ingestion_api_key::Entity::find()
            .filter(project_ingestion_api_key::Column::ProjectId.eq(project.id))
            .order_by_asc(project_ingestion_api_key::Column::Id)
            .all(&self.db)
            .await?;
        Ok(ProjectWithKeys { project, keys })
    }
}

fn random_public_id() -> String {
    let mut rng = rand::thread_rng();
    (0..PUBLIC_ID_LENGTH)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

fn random_ingestion_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INGESTION_KEY_LENGTH)
        .map(char::from)
        .collect()
}
