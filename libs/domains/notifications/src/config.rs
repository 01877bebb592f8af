//! Provider and dispatch configuration.
//!
//! Loaded from a TOML file with `[providers]` and `[worker]` sections, then
//! selectively overridden from environment variables.
//!
//! ```toml
//! [providers]
//! enabled = ["primary_smtp", "sendgrid"]
//! load_balancing = "weighted"
//!
//! [providers.smtp.primary_smtp]
//! host = "smtp.example.com"
//! port = 587
//! username = "mailer"
//! password = "secret"
//! priority = 2
//!
//! [providers.api.sendgrid]
//! kind = "sendgrid"
//! token = "SG.xxx"
//! from = "news@example.com"
//! priority = 1
//! bulk_enabled = true
//! ```

use core_config::{env_list, env_parse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

use crate::error::{NotificationError, NotificationResult};

/// Strategy used by the registry to pick and partition providers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(from = "String", into = "String")]
#[strum(serialize_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Weighted,
    LeastLoad,
}

impl From<String> for LoadBalancingStrategy {
    /// Unknown names fall back to round robin.
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl From<LoadBalancingStrategy> for String {
    fn from(value: LoadBalancingStrategy) -> Self {
        value.to_string()
    }
}

/// Payload shape of an HTTP API provider.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApiKind {
    #[default]
    Generic,
    Sendgrid,
    Mailtrap,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpProviderConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub priority: i32,
    pub max_emails_per_hour: u32,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiProviderConfig {
    pub kind: ApiKind,
    pub endpoint: String,
    pub token: String,
    pub from: String,
    pub priority: i32,
    pub max_emails_per_hour: u32,
    pub bulk_enabled: bool,
    pub max_batch_size: usize,
}

/// Which providers to build and how to balance between them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Ordered provider names. Names are looked up in `smtp` first, then `api`.
    pub enabled: Vec<String>,
    pub load_balancing: LoadBalancingStrategy,
    pub smtp: BTreeMap<String, SmtpProviderConfig>,
    pub api: BTreeMap<String, ApiProviderConfig>,
}

impl ProvidersConfig {
    /// Apply `PROVIDERS_ENABLED` (comma separated) and `PROVIDERS_LOAD_BALANCING`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(enabled) = env_list("PROVIDERS_ENABLED") {
            self.enabled = enabled;
        }
        if let Ok(strategy) = std::env::var("PROVIDERS_LOAD_BALANCING") {
            self.load_balancing = LoadBalancingStrategy::from(strategy);
        }
    }
}

/// Tuning knobs for the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on concurrent sends per dispatch.
    pub max_async_process: usize,
    /// Recipient count above which a bulk send is attempted.
    pub bulk_threshold: usize,
    /// Failed records with `retry_count` below this are retried.
    pub max_retry_count: i32,
    pub send_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    /// Concurrent sends when a batch is flushed one by one.
    pub batch_concurrency: usize,
    pub smtp_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_async_process: 10,
            bulk_threshold: 10,
            max_retry_count: 3,
            send_timeout_secs: 30,
            batch_timeout_secs: 30,
            batch_concurrency: 5,
            smtp_batch_size: 50,
        }
    }
}

impl DispatchConfig {
    /// Apply `WORKER_MAX_ASYNC_PROCESS`. Invalid values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(Some(value)) = env_parse::<usize>("WORKER_MAX_ASYNC_PROCESS") {
            self.max_async_process = value;
        }
    }

    /// Concurrency bound, never below one.
    pub fn concurrency(&self) -> usize {
        self.max_async_process.max(1)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

/// The `[providers]` and `[worker]` sections of the service config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub providers: ProvidersConfig,
    pub worker: DispatchConfig,
}

impl NotificationsConfig {
    pub fn from_toml_str(raw: &str) -> NotificationResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read the file at `path` and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> NotificationResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NotificationError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.providers.apply_env_overrides();
        config.worker.apply_env_overrides();
        Ok(config)
    }
}
