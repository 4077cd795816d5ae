//! Billing collector configuration
//!
//! Loaded once at startup from defaults overlaid with environment variables
//! (an optional `.env` file is read first) and then shared read-only.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use billing_common::{
    BillingError, InputError, Result, DEFAULT_COMPLETENESS_DELAY_SECS, DEFAULT_LOOKBACK_SECS,
    DEFAULT_SCRAPE_INTERVAL_SECS, DEFAULT_WORKSPACE_PREFIX,
};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::dispatch::RetryConfig;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Billing collector configuration
///
/// Field names match the environment variables that set them, lowercased
/// (`SCRAPE_INTERVAL_SEC` sets `scrape_interval_sec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Prometheus base URL
    pub prometheus_url: String,
    /// NATS server URL
    pub nats_url: String,
    /// Subject billing events are published on
    pub billing_subject: String,
    /// Namespace prefix that marks a workspace; also stripped from event workspace names
    pub workspace_namespace_prefix: String,
    /// Window length in seconds
    pub scrape_interval_sec: u64,
    /// Safety margin before a window is considered fully aggregated
    pub data_completeness_delay_sec: u64,
    /// How far back a normal-mode start begins
    pub default_lookback_sec: u64,
    /// HTTP timeout for metrics queries
    pub query_timeout_sec: u64,
    /// Retries for transient publish failures
    pub publish_max_retries: u32,
    /// First retry backoff
    pub publish_initial_backoff_ms: u64,
    /// Backoff ceiling
    pub publish_max_backoff_ms: u64,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "http://localhost:9090".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            billing_subject: "billing-events".to_string(),
            workspace_namespace_prefix: DEFAULT_WORKSPACE_PREFIX.to_string(),
            scrape_interval_sec: DEFAULT_SCRAPE_INTERVAL_SECS,
            data_completeness_delay_sec: DEFAULT_COMPLETENESS_DELAY_SECS,
            default_lookback_sec: DEFAULT_LOOKBACK_SECS,
            query_timeout_sec: 30,
            publish_max_retries: 3,
            publish_initial_backoff_ms: 100,
            publish_max_backoff_ms: 10_000,
            log_format: LogFormat::Text,
        }
    }
}

impl BillingConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();
        Self::load_from(None)
    }

    /// Load configuration from an explicit variable map instead of the
    /// process environment.
    pub fn load_from(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let defaults = Self::default();

        let settings = Config::builder()
            .set_default("prometheus_url", defaults.prometheus_url)
            .and_then(|b| b.set_default("nats_url", defaults.nats_url))
            .and_then(|b| b.set_default("billing_subject", defaults.billing_subject))
            .and_then(|b| {
                b.set_default("workspace_namespace_prefix", defaults.workspace_namespace_prefix)
            })
            .and_then(|b| b.set_default("scrape_interval_sec", defaults.scrape_interval_sec as i64))
            .and_then(|b| {
                b.set_default(
                    "data_completeness_delay_sec",
                    defaults.data_completeness_delay_sec as i64,
                )
            })
            .and_then(|b| b.set_default("default_lookback_sec", defaults.default_lookback_sec as i64))
            .and_then(|b| b.set_default("query_timeout_sec", defaults.query_timeout_sec as i64))
            .and_then(|b| b.set_default("publish_max_retries", defaults.publish_max_retries as i64))
            .and_then(|b| {
                b.set_default(
                    "publish_initial_backoff_ms",
                    defaults.publish_initial_backoff_ms as i64,
                )
            })
            .and_then(|b| {
                b.set_default("publish_max_backoff_ms", defaults.publish_max_backoff_ms as i64)
            })
            .and_then(|b| b.set_default("log_format", "text"))
            .map_err(|e| BillingError::Config(e.to_string()))?
            .add_source(Environment::default().try_parsing(true).source(vars))
            .build()
            .map_err(|e| BillingError::Config(e.to_string()))?;

        let cfg: Self = settings
            .try_deserialize()
            .map_err(|e| BillingError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scrape_interval_sec == 0 {
            return Err(invalid("SCRAPE_INTERVAL_SEC", "must be greater than zero"));
        }
        if self.default_lookback_sec == 0 {
            return Err(invalid("DEFAULT_LOOKBACK_SEC", "must be greater than zero"));
        }
        if self.query_timeout_sec == 0 {
            return Err(invalid("QUERY_TIMEOUT_SEC", "must be greater than zero"));
        }
        if self.prometheus_url.trim().is_empty() {
            return Err(invalid("PROMETHEUS_URL", "must not be empty"));
        }
        if self.nats_url.trim().is_empty() {
            return Err(invalid("NATS_URL", "must not be empty"));
        }
        if self.billing_subject.trim().is_empty() {
            return Err(invalid("BILLING_SUBJECT", "must not be empty"));
        }
        Ok(())
    }

    /// Window length
    pub fn scrape_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.scrape_interval_sec as i64)
    }

    /// Completeness delay
    pub fn completeness_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.data_completeness_delay_sec as i64)
    }

    /// Normal-mode lookback
    pub fn default_lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_lookback_sec as i64)
    }

    /// Metrics HTTP timeout
    pub fn query_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.query_timeout_sec)
    }

    /// Publish retry policy
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.publish_max_retries,
            initial_backoff: StdDuration::from_millis(self.publish_initial_backoff_ms),
            max_backoff: StdDuration::from_millis(self.publish_max_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

fn invalid(key: &str, reason: &str) -> BillingError {
    BillingError::Input(InputError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}
