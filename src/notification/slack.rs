//! Slack incoming-webhook channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{Channel, ChannelError, NotificationEvent};

const TEXT_PREFIX: &str = "[Periscope Alert]";
const DETAILS_BLOCK_ID: &str = "periscope-event-details";
/// Slack rejects section text longer than this
const SECTION_TEXT_LIMIT: usize = 3000;
const CODE_FENCE: &str = "```";
const TRUNCATION_MARKER: &str = "\n...";

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: String,
    blocks: Vec<SlackBlock>,
}

#[derive(Debug, Serialize)]
struct SlackBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    block_id: &'static str,
    text: SlackText,
}

#[derive(Debug, Serialize)]
struct SlackText {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

/// Posts a short summary plus the pretty-printed event as a code block
pub struct SlackWebhookChannel {
    client: Client,
    url: String,
}

impl SlackWebhookChannel {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn message(&self, event: &NotificationEvent) -> Result<SlackMessage, ChannelError> {
        let pretty = serde_json::to_string_pretty(event)?;
        Ok(SlackMessage {
            text: format!("{} {}", TEXT_PREFIX, event.attributes.title),
            blocks: vec![SlackBlock {
                kind: "section",
                block_id: DETAILS_BLOCK_ID,
                text: SlackText {
                    kind: "mrkdwn",
                    text: fenced(&pretty),
                },
            }],
        })
    }
}

/// Wraps `body` in a code fence, truncating so the result fits a section block.
fn fenced(body: &str) -> String {
    let budget = SECTION_TEXT_LIMIT - 2 * CODE_FENCE.len() - 2;
    let body = if body.chars().count() > budget {
        let keep = budget - TRUNCATION_MARKER.len();
        let mut truncated: String = body.chars().take(keep).collect();
        truncated.push_str(TRUNCATION_MARKER);
        truncated
    } else {
        body.to_string()
    };
    format!("{CODE_FENCE}\n{body}\n{CODE_FENCE}")
}

#[async_trait]
impl Channel for SlackWebhookChannel {
    fn serialize(&self, event: &NotificationEvent) -> Result<Vec<u8>, ChannelError> {
        Ok(serde_json::to_vec(&self.message(event)?)?)
    }

    async fn emit(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.message(event)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                notification_id = %event.id,
                status = status.as_u16(),
                "Slack webhook rejected notification"
            );
            return Err(ChannelError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
