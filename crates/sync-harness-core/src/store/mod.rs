//! Persistence abstraction for Sync Harness.
//!
//! The [`Store`] trait records job history, heartbeats, and the mutable
//! part of each connector's settings (status and cursor) so they survive
//! restarts and can be queried from outside the service.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ConnectorSettings, ConnectorState, HeartbeatRecord, Job};

/// Abstract storage backend for jobs, heartbeats and connector state.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_job`](Store::save_job) | Insert or update a job record |
/// | [`get_job`](Store::get_job) | Look up a job by ID |
/// | [`jobs_for_connector`](Store::jobs_for_connector) | Job history, newest first |
/// | [`save_heartbeat`](Store::save_heartbeat) | Overwrite a connector's heartbeat |
/// | [`get_heartbeat`](Store::get_heartbeat) | Latest heartbeat for a connector |
/// | [`save_connector_state`](Store::save_connector_state) | Persist status and cursor |
/// | [`load_connector_state`](Store::load_connector_state) | Read persisted status and cursor |
/// | [`fail_interrupted_jobs`](Store::fail_interrupted_jobs) | Close jobs orphaned by a crash |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a job, keyed by its ID.
    async fn save_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// All jobs recorded for a connector, most recently created first.
    async fn jobs_for_connector(&self, connector_id: &str) -> Result<Vec<Job>>;

    /// Overwrite the heartbeat for `record.connector_id`. No history is kept.
    async fn save_heartbeat(&self, record: &HeartbeatRecord) -> Result<()>;

    async fn get_heartbeat(&self, connector_id: &str) -> Result<Option<HeartbeatRecord>>;

    async fn save_connector_state(&self, settings: &ConnectorSettings) -> Result<()>;

    async fn load_connector_state(&self, connector_id: &str) -> Result<Option<ConnectorState>>;

    /// Mark every job still `pending` or `in_progress` as failed with
    /// `reason`. Returns the number of jobs updated.
    async fn fail_interrupted_jobs(&self, reason: &str) -> Result<u64>;
}
