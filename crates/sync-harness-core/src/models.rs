//! Core data models used throughout Sync Harness.
//!
//! These types describe the connectors the service synchronizes, the jobs
//! it runs for them, and the liveness records it emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::filtering::FilteringConfig;

/// A record produced by a connector: a flat mapping from field name to value.
pub type Document = Map<String, Value>;

/// Opaque, connector-defined marker of sync progress.
pub type Cursor = Value;

/// Default interval between two syncs of the same connector.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Lifecycle state of a connector as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    #[default]
    Configured,
    Syncing,
    Idle,
    Error,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Configured => "configured",
            ConnectorStatus::Syncing => "syncing",
            ConnectorStatus::Idle => "idle",
            ConnectorStatus::Error => "error",
        }
    }

    /// Whether a new job may be dispatched for a connector in this state.
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self, ConnectorStatus::Syncing)
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "configured" => Ok(ConnectorStatus::Configured),
            "syncing" => Ok(ConnectorStatus::Syncing),
            "idle" => Ok(ConnectorStatus::Idle),
            "error" => Ok(ConnectorStatus::Error),
            other => anyhow::bail!("unknown connector status: '{}'", other),
        }
    }
}

/// Configuration and mutable runtime state for one source.
///
/// `id`, `service_type` and `index_name` are fixed at construction and only
/// exposed through accessors. The cursor is replaced only when a job
/// completes; `status` is owned by the connector board while the service
/// is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSettings {
    id: String,
    service_type: String,
    index_name: String,
    pub poll_interval_seconds: u64,
    /// Free-form settings handed to the connector factory.
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(default)]
    pub filtering: FilteringConfig,
    #[serde(default)]
    pub last_sync_cursor: Option<Cursor>,
    #[serde(default)]
    pub status: ConnectorStatus,
}

impl ConnectorSettings {
    pub fn new(
        id: impl Into<String>,
        service_type: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_type: service_type.into(),
            index_name: index_name.into(),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
            configuration: Map::new(),
            filtering: FilteringConfig::default(),
            last_sync_cursor: None,
            status: ConnectorStatus::Configured,
        }
    }

    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    pub fn with_configuration(mut self, configuration: Map<String, Value>) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_filtering(mut self, filtering: FilteringConfig) -> Self {
        self.filtering = filtering;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Overlay persisted runtime state onto freshly configured settings.
    pub fn apply_state(&mut self, state: ConnectorState) {
        self.status = state.status;
        self.last_sync_cursor = state.last_sync_cursor;
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState {
            status: self.status,
            last_sync_cursor: self.last_sync_cursor.clone(),
        }
    }
}

/// The persisted, mutable part of [`ConnectorSettings`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectorState {
    pub status: ConnectorStatus,
    pub last_sync_cursor: Option<Cursor>,
}

/// Status of a single sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => anyhow::bail!("unknown job status: '{}'", other),
        }
    }
}

/// Per-job document counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub indexed: u64,
    pub skipped: u64,
    pub errored: u64,
}

/// One execution attempt of a connector's synchronization.
///
/// State only moves `pending → in_progress → {completed | failed | canceled}`.
/// Transition methods return `false` and leave the job untouched when the
/// move is not allowed, so a terminal job can never change again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    id: String,
    connector_id: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    stats: JobStats,
    error: Option<String>,
}

impl Job {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            connector_id: connector_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            stats: JobStats::default(),
            error: None,
        }
    }

    /// Rebuild a job from its persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: String,
        connector_id: String,
        status: JobStatus,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        stats: JobStats,
        error: Option<String>,
    ) -> Self {
        Self {
            id,
            connector_id,
            status,
            created_at,
            started_at,
            completed_at,
            stats,
            error,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn stats(&self) -> JobStats {
        self.stats
    }

    /// Present only when the job failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::InProgress;
        self.started_at = Some(at);
        true
    }

    pub fn complete(&mut self, at: DateTime<Utc>, stats: JobStats) -> bool {
        self.finish(JobStatus::Completed, at, stats, None)
    }

    pub fn fail(&mut self, at: DateTime<Utc>, stats: JobStats, error: impl Into<String>) -> bool {
        self.finish(JobStatus::Failed, at, stats, Some(error.into()))
    }

    pub fn cancel(&mut self, at: DateTime<Utc>, stats: JobStats) -> bool {
        self.finish(JobStatus::Canceled, at, stats, None)
    }

    fn finish(
        &mut self,
        status: JobStatus,
        at: DateTime<Utc>,
        stats: JobStats,
        error: Option<String>,
    ) -> bool {
        if self.status != JobStatus::InProgress {
            return false;
        }
        self.status = status;
        self.completed_at = Some(at);
        self.stats = stats;
        self.error = error;
        true
    }
}

/// Liveness signal for one connector. Overwritten on every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatRecord {
    pub connector_id: String,
    pub service_type: String,
    pub last_seen_at: DateTime<Utc>,
}

impl HeartbeatRecord {
    pub fn new(
        connector_id: impl Into<String>,
        service_type: impl Into<String>,
        last_seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            service_type: service_type.into(),
            last_seen_at,
        }
    }
}
