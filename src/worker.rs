//! The long-running sync service.
//!
//! Startup order:
//!
//! 1. Recover: jobs left `pending`/`in_progress` by a previous process are
//!    marked failed, and each connector's persisted status and cursor are
//!    loaded onto the board.
//! 2. Pre-flight every connector. Any failure aborts startup.
//! 3. Spawn one heartbeat task per connector.
//! 4. Run the scheduler until the cancellation token fires, then wait for
//!    in-flight jobs and heartbeats to stop.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use sync_harness_core::models::{ConnectorSettings, Job};
use sync_harness_core::store::Store;

use crate::board::ConnectorBoard;
use crate::config::Config;
use crate::engine::{IndexLifecycle, SearchEngine};
use crate::errors::{PreflightError, SyncError};
use crate::heartbeat::Heartbeat;
use crate::job_runner::{SyncJobRunner, SyncOptions};
use crate::preflight::PreflightChecker;
use crate::registry::ConnectorRegistry;
use crate::scheduler::Scheduler;

pub const INTERRUPTED_JOB_REASON: &str = "interrupted by service restart";

pub struct Worker {
    registry: Arc<ConnectorRegistry>,
    indices: Arc<dyn IndexLifecycle>,
    store: Arc<dyn Store>,
    board: Arc<ConnectorBoard>,
    runner: Arc<SyncJobRunner>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    job_index: String,
    connectors_index: String,
}

impl Worker {
    pub fn new<E>(
        config: &Config,
        registry: ConnectorRegistry,
        engine: Arc<E>,
        store: Arc<dyn Store>,
    ) -> Self
    where
        E: IndexLifecycle + SearchEngine + 'static,
    {
        let registry = Arc::new(registry);
        let indices: Arc<dyn IndexLifecycle> = engine.clone();
        let search: Arc<dyn SearchEngine> = engine;
        let runner = SyncJobRunner::new(
            Arc::clone(&registry),
            search,
            Arc::clone(&store),
            SyncOptions::from_config(&config.sync),
        );

        Self {
            registry,
            indices,
            store,
            board: Arc::new(ConnectorBoard::new(config.connector_settings())),
            runner: Arc::new(runner),
            poll_interval: config.service.poll_interval(),
            heartbeat_interval: config.service.heartbeat_interval(),
            job_index: config.elasticsearch.job_index.clone(),
            connectors_index: config.elasticsearch.connectors_index.clone(),
        }
    }

    pub fn board(&self) -> &Arc<ConnectorBoard> {
        &self.board
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Close jobs orphaned by a previous process and load persisted
    /// connector state.
    pub async fn recover(&self) -> Result<()> {
        let failed = self
            .store
            .fail_interrupted_jobs(INTERRUPTED_JOB_REASON)
            .await
            .context("Failed to close interrupted jobs")?;
        if failed > 0 {
            tracing::warn!(jobs = failed, "marked interrupted jobs as failed");
        }

        for settings in self.board.snapshot() {
            if let Some(state) = self
                .store
                .load_connector_state(settings.id())
                .await
                .with_context(|| format!("Failed to load state for '{}'", settings.id()))?
            {
                self.board.restore(settings.id(), state);
            }
        }
        Ok(())
    }

    fn preflight_checker(&self) -> PreflightChecker<'_> {
        PreflightChecker::new(
            &self.registry,
            self.indices.as_ref(),
            self.job_index.as_str(),
            self.connectors_index.as_str(),
        )
    }

    pub async fn preflight(&self) -> Result<(), PreflightError> {
        self.preflight_checker()
            .check_all(&self.board.snapshot())
            .await
    }

    pub async fn preflight_one(&self, settings: &ConnectorSettings) -> Result<(), PreflightError> {
        self.preflight_checker().check(settings).await
    }

    /// Run one job for `connector_id` right away, ignoring its interval.
    pub async fn sync_once(
        &self,
        connector_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Job, SyncError> {
        self.runner.execute(&self.board, connector_id, cancel).await
    }

    /// Run the service until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.recover().await?;
        self.preflight().await?;

        let heartbeat = Heartbeat::new(Arc::clone(&self.store), self.heartbeat_interval);
        let heartbeats: Vec<_> = self
            .board
            .snapshot()
            .iter()
            .map(|s| heartbeat.start(s.id(), s.service_type(), cancel.child_token()))
            .collect();

        let scheduler = Scheduler::new(Arc::clone(&self.board), self.poll_interval);
        let runner = Arc::clone(&self.runner);
        let job_cancel = cancel.clone();
        scheduler
            .run(cancel.clone(), move |lease| {
                let runner = Arc::clone(&runner);
                let cancel = job_cancel.clone();
                async move {
                    runner.run_claimed(lease, &cancel).await;
                }
            })
            .await;

        for handle in heartbeats {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "heartbeat task aborted");
            }
        }
        tracing::info!("worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::engine::memory::MemorySearchEngine;
    use serde_json::json;
    use sync_harness_core::models::{ConnectorStatus, JobStatus};
    use sync_harness_core::store::memory::InMemoryStore;

    const CONFIG: &str = r#"
[db]
path = "/tmp/unused.sqlite"

[service]
poll_interval_secs = 5
heartbeat_interval_secs = 5

[elasticsearch]
hosts = ["http://localhost:9200"]

[[connectors]]
id = "hello"
service_type = "hello_world"
index_name = "search-hello"
"#;

    #[tokio::test]
    async fn recover_fails_orphans_and_unsticks_connectors() {
        let config = parse_config(CONFIG).unwrap();
        let store = Arc::new(InMemoryStore::new());

        let mut orphan = Job::new("hello");
        orphan.start(chrono::Utc::now());
        store.save_job(&orphan).await.unwrap();

        let mut persisted = ConnectorSettings::new("hello", "hello_world", "search-hello");
        persisted.status = ConnectorStatus::Syncing;
        persisted.last_sync_cursor = Some(json!(1));
        store.save_connector_state(&persisted).await.unwrap();

        let worker = Worker::new(
            &config,
            ConnectorRegistry::with_builtins(),
            Arc::new(MemorySearchEngine::new()),
            store.clone(),
        );
        worker.recover().await.unwrap();

        let job = store.get_job(orphan.id()).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some(INTERRUPTED_JOB_REASON));

        let settings = worker.board().settings("hello").unwrap();
        assert_eq!(settings.status, ConnectorStatus::Error);
        assert_eq!(settings.last_sync_cursor, Some(json!(1)));
    }

    #[tokio::test]
    async fn run_aborts_on_preflight_failure() {
        let config = parse_config(&CONFIG.replace("hello_world", "unknown")).unwrap();
        let worker = Worker::new(
            &config,
            ConnectorRegistry::with_builtins(),
            Arc::new(MemorySearchEngine::new()),
            Arc::new(InMemoryStore::new()),
        );

        let err = worker.run(CancellationToken::new()).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("service type 'unknown' is not a supported connector"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_syncs_and_beats_until_canceled() {
        let config = parse_config(CONFIG).unwrap();
        let engine = Arc::new(MemorySearchEngine::new());
        let store = Arc::new(InMemoryStore::new());
        let worker = Arc::new(Worker::new(
            &config,
            ConnectorRegistry::with_builtins(),
            engine.clone(),
            store.clone(),
        ));
        let cancel = CancellationToken::new();

        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(engine.document_count("search-hello"), 1);
        assert!(store.get_heartbeat("hello").await.unwrap().is_some());
        let jobs = store.jobs_for_connector("hello").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status(), JobStatus::Completed);
        assert_eq!(
            worker.board().status("hello"),
            Some(ConnectorStatus::Idle)
        );
    }
}
