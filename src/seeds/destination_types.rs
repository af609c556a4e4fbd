//! Destination type seeding
//!
//! Ensures the catalogue of alert destination types exists. Each type key
//! selects a notification channel at dispatch time.

use anyhow::{Context, Result};
use sea_orm::DatabaseConnection;

use crate::models::alert_destination_type::{
    KEY_GENERIC_WEBHOOK, KEY_INTERNAL_LOGGER, KEY_SLACK_WEBHOOK,
};
use crate::repositories::DestinationRepository;

/// Key and display title of every built-in destination type
const DESTINATION_TYPES: &[(&str, &str)] = &[
    (KEY_INTERNAL_LOGGER, "Internal Logger"),
    (KEY_GENERIC_WEBHOOK, "Generic Webhook"),
    (KEY_SLACK_WEBHOOK, "Slack Webhook"),
];

/// Inserts any missing destination type. Safe to run on every startup.
pub async fn seed_destination_types(db: &DatabaseConnection) -> Result<()> {
    let repo = DestinationRepository::new(db.clone());

    for (key, title) in DESTINATION_TYPES {
        let (_, created) = repo
            .ensure_type(key, title)
            .await
            .with_context(|| format!("failed to seed destination type '{}'", key))?;

        if created {
            log::info!("Created alert destination type: {}", key);
        } else {
            log::info!("Alert destination type '{}' already exists, skipping", key);
        }
    }

    log::info!("Destination type seeding completed successfully");
    Ok(())
}
