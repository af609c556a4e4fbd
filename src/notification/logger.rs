//! Structured-log channel.

use async_trait::async_trait;

use super::{Channel, ChannelError, NotificationEvent};

/// Writes notifications to the operational log. Never fails to emit.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl Channel for LogChannel {
    fn serialize(&self, event: &NotificationEvent) -> Result<Vec<u8>, ChannelError> {
        Ok(serde_json::to_vec(event)?)
    }

    async fn emit(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        let body = self
            .serialize(event)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        tracing::info!(
            notification_id = %event.id,
            alert_id = %event.attributes.alert_id,
            project_id = %event.attributes.project_id,
            event_group_id = %event.attributes.event_group_id,
            title = %event.attributes.title,
            event = %body,
            "Alert notification"
        );
        Ok(())
    }
}
