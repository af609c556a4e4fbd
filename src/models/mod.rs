//! # Data Models
//!
//! SeaORM entities for projects, event groups, events, alerts and alert
//! destinations, plus small API response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod alert;
pub mod alert_destination_notification;
pub mod alert_destination_type;
pub mod event;
pub mod event_group;
pub mod project;
pub mod project_alert_destination;
pub mod project_ingestion_api_key;

pub use alert::Entity as Alert;
pub use alert_destination_notification::Entity as AlertDestinationNotification;
pub use alert_destination_type::Entity as AlertDestinationType;
pub use event::Entity as Event;
pub use event_group::Entity as EventGroup;
pub use project::Entity as Project;
pub use project_alert_destination::Entity as ProjectAlertDestination;
pub use project_ingestion_api_key::Entity as ProjectIngestionApiKey;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "periscope".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
