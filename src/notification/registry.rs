//! Destination type to channel lookup.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;

use crate::clock::Clock;
use crate::models::alert_destination_type::{
    KEY_GENERIC_WEBHOOK, KEY_INTERNAL_LOGGER, KEY_SLACK_WEBHOOK,
};
use crate::models::project_alert_destination;

use super::{Channel, GenericWebhookChannel, LogChannel, SlackWebhookChannel};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no channel registered for destination type '{0}'")]
    UnknownDestinationType(String),
    #[error("destination {destination_id} is misconfigured: {reason}")]
    InvalidConfiguration {
        destination_id: i32,
        reason: &'static str,
    },
}

/// Builds a channel for one configured destination
pub type ChannelBuilder = Arc<
    dyn Fn(&project_alert_destination::Model) -> Result<Arc<dyn Channel>, RegistryError>
        + Send
        + Sync,
>;

/// Maps destination type keys to channel builders
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    builders: HashMap<String, ChannelBuilder>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the log, generic webhook and Slack channels.
    pub fn with_defaults(client: Client, clock: Clock) -> Self {
        let mut registry = Self::new();

        registry.register(KEY_INTERNAL_LOGGER, |_| Ok(Arc::new(LogChannel)));

        let webhook_client = client.clone();
        registry.register(KEY_GENERIC_WEBHOOK, move |destination| {
            let configuration = webhook_configuration(destination)?;
            Ok(Arc::new(GenericWebhookChannel::new(
                webhook_client.clone(),
                configuration.url,
                configuration.headers,
                clock.clone(),
            )))
        });

        registry.register(KEY_SLACK_WEBHOOK, move |destination| {
            let configuration = webhook_configuration(destination)?;
            Ok(Arc::new(SlackWebhookChannel::new(
                client.clone(),
                configuration.url,
            )))
        });

        registry
    }

    /// Registers or replaces the builder for `key`.
    pub fn register<F>(&mut self, key: impl Into<String>, builder: F)
    where
        F: Fn(&project_alert_destination::Model) -> Result<Arc<dyn Channel>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(key.into(), Arc::new(builder));
    }

    pub fn resolve(
        &self,
        type_key: &str,
        destination: &project_alert_destination::Model,
    ) -> Result<Arc<dyn Channel>, RegistryError> {
        let builder = self
            .builders
            .get(type_key)
            .ok_or_else(|| RegistryError::UnknownDestinationType(type_key.to_string()))?;
        builder(destination)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }
}

fn webhook_configuration(
    destination: &project_alert_destination::Model,
) -> Result<project_alert_destination::WebhookConfiguration, RegistryError> {
    let configuration =
        destination
            .webhook_configuration()
            .ok_or(RegistryError::InvalidConfiguration {
                destination_id: destination.id,
                reason: "missing webhook configuration",
            })?;
    if configuration.url.is_empty() {
        return Err(RegistryError::InvalidConfiguration {
            destination_id: destination.id,
            reason: "empty webhook url",
        });
    }
    Ok(configuration)
}
