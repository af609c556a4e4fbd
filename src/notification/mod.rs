//! # Notification Channels
//!
//! Delivery variants for alert notifications. Every channel turns a
//! [`NotificationEvent`] into bytes and emits it; the dispatcher picks a channel
//! through the [`ChannelRegistry`] by destination type key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod logger;
pub mod registry;
pub mod slack;
pub mod webhook;

pub use logger::LogChannel;
pub use registry::{ChannelRegistry, RegistryError};
pub use slack::SlackWebhookChannel;
pub use webhook::GenericWebhookChannel;

/// Event type carried by alert notifications
pub const ALERT_EVENT_TYPE: &str = "alert";

/// Channel independent description of one alert notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Notification row id
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Raw SDK payload of the latest occurrence, or null
    pub data: Value,
    pub attributes: EventAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttributes {
    pub alert_id: String,
    pub title: String,
    pub project_id: String,
    pub event_group_id: String,
}

/// Delivery failures
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("destination responded with status {status}")]
    UnexpectedStatus { status: u16 },
    #[error("invalid header '{name}'")]
    InvalidHeader { name: String },
}

/// A delivery mechanism for notification events
#[async_trait]
pub trait Channel: Send + Sync {
    /// Renders the wire body this channel would send.
    fn serialize(&self, event: &NotificationEvent) -> Result<Vec<u8>, ChannelError>;

    /// Delivers the event. Returns an error when delivery did not succeed.
    async fn emit(&self, event: &NotificationEvent) -> Result<(), ChannelError>;
}
