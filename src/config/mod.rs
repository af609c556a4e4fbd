//! Configuration loading for Periscope.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PERISCOPE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "PERISCOPE_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `PERISCOPE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default = "default_aggregator_channel_capacity")]
    pub aggregator_channel_capacity: usize,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default = "default_project_cache_capacity")]
    pub project_cache_capacity: usize,
    #[serde(default = "default_project_cache_ttl_seconds")]
    pub project_cache_ttl_seconds: u64,
}

/// Persistence flusher timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PersistenceConfig {
    /// Environment variable: `PERISCOPE_PERSISTENCE_FLUSH_INTERVAL_MS`
    #[serde(default = "default_persistence_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Deadline for one whole flush cycle.
    ///
    /// Environment variable: `PERISCOPE_PERSISTENCE_FLUSH_TIMEOUT_MS`
    #[serde(default = "default_persistence_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

/// Alerting scheduler timing and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AlertingConfig {
    /// Environment variable: `PERISCOPE_ALERTING_TICK_INTERVAL_MS`
    #[serde(default = "default_alerting_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Deadline applied to each storage call made by a tick.
    ///
    /// Environment variable: `PERISCOPE_ALERTING_STORAGE_TIMEOUT_MS`
    #[serde(default = "default_alerting_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    /// Environment variable: `PERISCOPE_WEBHOOK_TIMEOUT_MS`
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            aggregator_channel_capacity: default_aggregator_channel_capacity(),
            persistence: PersistenceConfig::default(),
            alerting: AlertingConfig::default(),
            project_cache_capacity: default_project_cache_capacity(),
            project_cache_ttl_seconds: default_project_cache_ttl_seconds(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_persistence_flush_interval_ms(),
            flush_timeout_ms: default_persistence_flush_timeout_ms(),
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_alerting_tick_interval_ms(),
            storage_timeout_ms: default_alerting_storage_timeout_ms(),
            webhook_timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

impl PersistenceConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_millis("PERSISTENCE_FLUSH_INTERVAL_MS", self.flush_interval_ms)?;
        check_millis("PERSISTENCE_FLUSH_TIMEOUT_MS", self.flush_timeout_ms)
    }
}

impl AlertingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_millis("ALERTING_TICK_INTERVAL_MS", self.tick_interval_ms)?;
        check_millis("ALERTING_STORAGE_TIMEOUT_MS", self.storage_timeout_ms)?;
        check_millis("WEBHOOK_TIMEOUT_MS", self.webhook_timeout_ms)
    }
}

/// Interval and timeout settings must fall between 10 ms and one hour.
fn check_millis(key: &'static str, value: u64) -> Result<(), ConfigError> {
    const MIN_MS: u64 = 10;
    const MAX_MS: u64 = 3_600_000;
    if (MIN_MS..=MAX_MS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidDuration {
            key,
            value,
            min: MIN_MS,
            max: MAX_MS,
        })
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.db_acquire_timeout_ms)
    }

    pub fn project_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.project_cache_ttl_seconds)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec![REDACTED.to_string()];
        }
        config.database_url = redact_url_password(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections);
        }

        if self.aggregator_channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity);
        }

        if self.project_cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }

        if self.project_cache_ttl_seconds == 0 {
            return Err(ConfigError::InvalidCacheTtl);
        }

        self.persistence.validate()?;
        self.alerting.validate()?;

        Ok(())
    }
}

/// Replaces the password of a connection URL, leaving other parts intact.
fn redact_url_password(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some(REDACTED)).is_ok() {
                parsed.to_string()
            } else {
                raw.to_string()
            }
        }
        _ => raw.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://periscope.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_aggregator_channel_capacity() -> usize {
    1024
}

fn default_persistence_flush_interval_ms() -> u64 {
    5000
}

fn default_persistence_flush_timeout_ms() -> u64 {
    5000
}

fn default_alerting_tick_interval_ms() -> u64 {
    5000
}

fn default_alerting_storage_timeout_ms() -> u64 {
    2000
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

fn default_project_cache_capacity() -> usize {
    1024
}

fn default_project_cache_ttl_seconds() -> u64 {
    3600
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error(
        "no operator tokens configured; set PERISCOPE_OPERATOR_TOKEN or PERISCOPE_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be positive")]
    InvalidDbMaxConnections,
    #[error("aggregator channel capacity must be positive")]
    InvalidChannelCapacity,
    #[error("project cache capacity must be positive")]
    InvalidCacheCapacity,
    #[error("project cache TTL must be positive")]
    InvalidCacheTtl,
    #[error("{key} must be between {min} and {max} milliseconds, got {value}")]
    InvalidDuration {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Loads configuration using layered `.env` files and `PERISCOPE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, validates and returns the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);

        // Handle operator tokens - support both single token and comma-separated list
        let operator_tokens = if let Some(tokens) = take_string(&mut layered, "OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = take_string(&mut layered, "OPERATOR_TOKEN") {
            vec![token.trim().to_string()]
        } else {
            Vec::new()
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections: take_number(&mut layered, "DB_MAX_CONNECTIONS")?
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: take_number(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
                .unwrap_or_else(default_db_acquire_timeout_ms),
            operator_tokens,
            aggregator_channel_capacity: take_number(&mut layered, "AGGREGATOR_CHANNEL_CAPACITY")?
                .unwrap_or_else(default_aggregator_channel_capacity),
            persistence: PersistenceConfig {
                flush_interval_ms: take_number(&mut layered, "PERSISTENCE_FLUSH_INTERVAL_MS")?
                    .unwrap_or_else(default_persistence_flush_interval_ms),
                flush_timeout_ms: take_number(&mut layered, "PERSISTENCE_FLUSH_TIMEOUT_MS")?
                    .unwrap_or_else(default_persistence_flush_timeout_ms),
            },
            alerting: AlertingConfig {
                tick_interval_ms: take_number(&mut layered, "ALERTING_TICK_INTERVAL_MS")?
                    .unwrap_or_else(default_alerting_tick_interval_ms),
                storage_timeout_ms: take_number(&mut layered, "ALERTING_STORAGE_TIMEOUT_MS")?
                    .unwrap_or_else(default_alerting_storage_timeout_ms),
                webhook_timeout_ms: take_number(&mut layered, "WEBHOOK_TIMEOUT_MS")?
                    .unwrap_or_else(default_webhook_timeout_ms),
            },
            project_cache_capacity: take_number(&mut layered, "PROJECT_CACHE_CAPACITY")?
                .unwrap_or_else(default_project_cache_capacity),
            project_cache_ttl_seconds: take_number(&mut layered, "PROJECT_CACHE_TTL_SECONDS")?
                .unwrap_or_else(default_project_cache_ttl_seconds),
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered.remove(key).filter(|v| !v.trim().is_empty())
}

fn take_number<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(None),
    }
}
