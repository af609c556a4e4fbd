//! Generic JSON webhook channel.
//!
//! Posts a versioned envelope to the configured URL. Only a `200 OK` response
//! counts as delivered.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;

use super::{ALERT_EVENT_TYPE, Channel, ChannelError, NotificationEvent};

/// User agent sent with every webhook delivery
pub const WEBHOOK_USER_AGENT: &str = "periscope/1.0";
/// Envelope schema version
pub const WEBHOOK_ENVELOPE_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
struct WebhookEnvelope<'a> {
    id: String,
    event: &'static str,
    timestamp: String,
    version: &'static str,
    data: &'a NotificationEvent,
}

pub struct GenericWebhookChannel {
    client: Client,
    url: String,
    headers: BTreeMap<String, String>,
    clock: Clock,
}

impl GenericWebhookChannel {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        clock: Clock,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            headers,
            clock,
        }
    }

    /// Fixed headers first, configured headers after so they can override them.
    fn request_headers(&self) -> Result<HeaderMap, ChannelError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(WEBHOOK_USER_AGENT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &self.headers {
            let invalid = || ChannelError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header_name, header_value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl Channel for GenericWebhookChannel {
    fn serialize(&self, event: &NotificationEvent) -> Result<Vec<u8>, ChannelError> {
        let envelope = WebhookEnvelope {
            id: Uuid::new_v4().to_string(),
            event: ALERT_EVENT_TYPE,
            timestamp: (self.clock)().to_rfc3339_opts(SecondsFormat::Secs, true),
            version: WEBHOOK_ENVELOPE_VERSION,
            data: event,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    async fn emit(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        let body = self.serialize(event)?;
        let response = self
            .client
            .post(&self.url)
            .headers(self.request_headers()?)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(
                notification_id = %event.id,
                status = status.as_u16(),
                "Webhook destination rejected notification"
            );
            return Err(ChannelError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        tracing::debug!(notification_id = %event.id, "Webhook notification delivered");
        Ok(())
    }
}
