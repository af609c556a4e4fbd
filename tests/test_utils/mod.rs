//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite databases with migrations and seeds applied, plus
//! builders for projects, destinations and SDK events.

#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::json;

use periscope::config::AppConfig;
use periscope::ingestion::{Aggregator, SdkEvent};
use periscope::models::project_alert_destination::WebhookConfiguration;
use periscope::repositories::{
    DestinationRepository, DestinationWithType, ProjectCache, ProjectRepository, ProjectWithKeys,
};
use periscope::seeds::seed_destination_types;
use periscope::server::AppState;

pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// Sets up an in-memory SQLite database with migrations and destination types.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    seed_destination_types(&db).await?;
    Ok(db)
}

pub async fn create_project(db: &DatabaseConnection, name: &str) -> Result<ProjectWithKeys> {
    Ok(ProjectRepository::new(db.clone()).create(name).await?)
}

pub async fn add_destination(
    db: &DatabaseConnection,
    project_id: i32,
    type_key: &str,
    url: Option<String>,
) -> Result<DestinationWithType> {
    let configuration = url.map(|url| WebhookConfiguration {
        url,
        headers: Default::default(),
    });
    Ok(DestinationRepository::new(db.clone())
        .create(project_id, type_key, configuration)
        .await?)
}

/// SDK event with one exception and a two-frame stack trace.
pub fn sdk_event(event_id: &str, fingerprint: &[&str], message: &str) -> SdkEvent {
    serde_json::from_value(json!({
        "event_id": event_id,
        "level": "error",
        "platform": "python",
        "fingerprint": fingerprint,
        "exception": {
            "values": [{
                "type": "ValueError",
                "value": message,
                "stacktrace": {
                    "frames": [
                        { "function": "handler", "module": "app.views", "lineno": 10 },
                        { "function": "parse", "module": "app.util", "lineno": 42 }
                    ]
                }
            }]
        }
    }))
    .expect("valid sdk event")
}

pub fn test_config() -> AppConfig {
    AppConfig {
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        ..AppConfig::default()
    }
}

pub fn test_state(db: DatabaseConnection, aggregator: Arc<Aggregator>) -> AppState {
    AppState {
        config: Arc::new(test_config()),
        projects: ProjectCache::new(
            ProjectRepository::new(db.clone()),
            NonZeroUsize::new(16).expect("non-zero"),
            Duration::from_secs(60),
        ),
        db,
        aggregator,
    }
}
