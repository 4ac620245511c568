//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/syncd.sqlite"
//!
//! [service]
//! poll_interval_secs = 60
//! heartbeat_interval_secs = 60
//!
//! [sync]
//! batch_size = 100
//!
//! [elasticsearch]
//! api_key = "..."
//! hosts = ["http://localhost:9200"]
//!
//! [[connectors]]
//! id = "docs"
//! service_type = "filesystem"
//! index_name = "search-docs"
//!
//! [connectors.configuration]
//! root = "./docs"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sync_harness_core::filtering::FilteringConfig;
use sync_harness_core::models::{ConnectorSettings, DEFAULT_POLL_INTERVAL_SECS};

use crate::errors::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Scheduler tick. Also the default per-connector sync interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            log_level: default_log_level(),
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_heartbeat_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub hosts: Option<Vec<String>>,
    #[serde(default = "default_job_index")]
    pub job_index: String,
    #[serde(default = "default_connectors_index")]
    pub connectors_index: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_job_index() -> String {
    ".elastic-connectors-sync-jobs".to_string()
}
fn default_connectors_index() -> String {
    ".elastic-connectors".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Where the search engine lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    CloudId(String),
    Hosts(Vec<String>),
}

impl ElasticsearchConfig {
    /// Resolve the configured endpoint. Exactly one of `cloud_id` and
    /// `hosts` must be set; an empty `hosts` list counts as unset.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let hosts = self.hosts.as_ref().filter(|h| !h.is_empty());
        match (&self.cloud_id, hosts) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingEndpoints),
            (Some(cloud_id), None) => Ok(Endpoint::CloudId(cloud_id.clone())),
            (None, Some(hosts)) => Ok(Endpoint::Hosts(hosts.clone())),
            (None, None) => Err(ConfigError::MissingEndpoint),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectorConfig {
    pub id: String,
    pub service_type: String,
    pub index_name: String,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(default)]
    pub filtering: FilteringConfig,
}

impl Config {
    /// Connector settings for every configured connector, in file order.
    pub fn connector_settings(&self) -> Vec<ConnectorSettings> {
        self.connectors
            .iter()
            .map(|c| {
                ConnectorSettings::new(&c.id, &c.service_type, &c.index_name)
                    .with_poll_interval(
                        c.poll_interval_secs
                            .unwrap_or(self.service.poll_interval_secs),
                    )
                    .with_configuration(c.configuration.clone())
                    .with_filtering(c.filtering.clone())
            })
            .collect()
    }

    pub fn find_connector(&self, id: &str) -> Option<ConnectorSettings> {
        self.connector_settings().into_iter().find(|s| s.id() == id)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate service
    if config.service.poll_interval_secs == 0 {
        anyhow::bail!("service.poll_interval_secs must be > 0");
    }
    if config.service.heartbeat_interval_secs == 0 {
        anyhow::bail!("service.heartbeat_interval_secs must be > 0");
    }

    // Validate sync
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }
    if config.sync.max_backoff_ms < config.sync.retry_backoff_ms {
        anyhow::bail!("sync.max_backoff_ms must be >= sync.retry_backoff_ms");
    }

    // Validate elasticsearch
    config
        .elasticsearch
        .endpoint()
        .context("Invalid [elasticsearch] configuration")?;

    // Validate connectors
    if config.connectors.is_empty() {
        anyhow::bail!("at least one [[connectors]] entry must be configured");
    }
    let mut seen = HashSet::new();
    for connector in &config.connectors {
        if connector.id.trim().is_empty() {
            anyhow::bail!("connectors.id must not be empty");
        }
        if !seen.insert(connector.id.as_str()) {
            anyhow::bail!("duplicate connector id: '{}'", connector.id);
        }
        if connector.index_name.trim().is_empty() {
            anyhow::bail!("connectors.index_name must not be empty for '{}'", connector.id);
        }
        if connector.poll_interval_secs == Some(0) {
            anyhow::bail!("connectors.poll_interval_secs must be > 0 for '{}'", connector.id);
        }
    }

    Ok(config)
}
