//! In-memory [`Store`] implementation for testing.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{ConnectorSettings, ConnectorState, HeartbeatRecord, Job, JobStatus};

use super::Store;

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<String, Job>>,
    heartbeats: RwLock<HashMap<String, HeartbeatRecord>>,
    connectors: RwLock<HashMap<String, ConnectorState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs recorded, across all connectors.
    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        self.jobs
            .write()
            .unwrap()
            .insert(job.id().to_string(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().unwrap().get(id).cloned())
    }

    async fn jobs_for_connector(&self, connector_id: &str) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.connector_id() == connector_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| std::cmp::Reverse(j.created_at()));
        Ok(jobs)
    }

    async fn save_heartbeat(&self, record: &HeartbeatRecord) -> Result<()> {
        self.heartbeats
            .write()
            .unwrap()
            .insert(record.connector_id.clone(), record.clone());
        Ok(())
    }

    async fn get_heartbeat(&self, connector_id: &str) -> Result<Option<HeartbeatRecord>> {
        Ok(self.heartbeats.read().unwrap().get(connector_id).cloned())
    }

    async fn save_connector_state(&self, settings: &ConnectorSettings) -> Result<()> {
        self.connectors
            .write()
            .unwrap()
            .insert(settings.id().to_string(), settings.state());
        Ok(())
    }

    async fn load_connector_state(&self, connector_id: &str) -> Result<Option<ConnectorState>> {
        Ok(self.connectors.read().unwrap().get(connector_id).cloned())
    }

    async fn fail_interrupted_jobs(&self, reason: &str) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap();
        let mut updated = 0;
        for job in jobs.values_mut() {
            if job.status().is_terminal() {
                continue;
            }
            let now = Utc::now();
            let stats = job.stats();
            if job.status() == JobStatus::Pending {
                job.start(now);
            }
            job.fail(now, stats, reason);
            updated += 1;
        }
        Ok(updated)
    }
}
