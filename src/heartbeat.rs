//! Connector liveness signal.
//!
//! One task per connector writes a [`HeartbeatRecord`] on a fixed cadence,
//! independent of sync activity. A failed write is logged and the next
//! tick tries again; it never stops the task or the scheduler.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use sync_harness_core::models::HeartbeatRecord;
use sync_harness_core::store::Store;

#[derive(Clone)]
pub struct Heartbeat {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Write a single heartbeat for `connector_id`.
    pub async fn beat(&self, connector_id: &str, service_type: &str) -> Result<()> {
        let record = HeartbeatRecord::new(connector_id, service_type, Utc::now());
        self.store.save_heartbeat(&record).await
    }

    /// Spawn the heartbeat loop. The first beat is immediate; the task
    /// exits when `cancel` fires.
    pub fn start(
        &self,
        connector_id: impl Into<String>,
        service_type: impl Into<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let heartbeat = self.clone();
        let connector_id = connector_id.into();
        let service_type = service_type.into();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(connector_id = %connector_id, "heartbeat stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = heartbeat.beat(&connector_id, &service_type).await {
                            tracing::warn!(
                                connector_id = %connector_id,
                                error = %format!("{:#}", e),
                                "heartbeat write failed"
                            );
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sync_harness_core::models::{ConnectorSettings, ConnectorState, Job};
    use sync_harness_core::store::memory::InMemoryStore;

    /// Fails every other heartbeat write.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn save_job(&self, job: &Job) -> Result<()> {
            self.inner.save_job(job).await
        }
        async fn get_job(&self, id: &str) -> Result<Option<Job>> {
            self.inner.get_job(id).await
        }
        async fn jobs_for_connector(&self, connector_id: &str) -> Result<Vec<Job>> {
            self.inner.jobs_for_connector(connector_id).await
        }
        async fn save_heartbeat(&self, record: &HeartbeatRecord) -> Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                anyhow::bail!("database is locked");
            }
            self.inner.save_heartbeat(record).await
        }
        async fn get_heartbeat(&self, connector_id: &str) -> Result<Option<HeartbeatRecord>> {
            self.inner.get_heartbeat(connector_id).await
        }
        async fn save_connector_state(&self, settings: &ConnectorSettings) -> Result<()> {
            self.inner.save_connector_state(settings).await
        }
        async fn load_connector_state(&self, id: &str) -> Result<Option<ConnectorState>> {
            self.inner.load_connector_state(id).await
        }
        async fn fail_interrupted_jobs(&self, reason: &str) -> Result<u64> {
            self.inner.fail_interrupted_jobs(reason).await
        }
    }

    #[tokio::test]
    async fn beat_overwrites_record() {
        let store = Arc::new(InMemoryStore::new());
        let heartbeat = Heartbeat::new(store.clone(), Duration::from_secs(60));

        heartbeat.beat("docs", "filesystem").await.unwrap();
        let first = store.get_heartbeat("docs").await.unwrap().unwrap();
        heartbeat.beat("docs", "filesystem").await.unwrap();
        let second = store.get_heartbeat("docs").await.unwrap().unwrap();

        assert_eq!(second.service_type, "filesystem");
        assert!(second.last_seen_at >= first.last_seen_at);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_are_retried_next_tick() {
        let store = Arc::new(FlakyStore::default());
        let heartbeat = Heartbeat::new(store.clone(), Duration::from_secs(10));
        let cancel = CancellationToken::new();

        let handle = heartbeat.start("docs", "filesystem", cancel.clone());

        // First tick fails; the task keeps running.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get_heartbeat("docs").await.unwrap().is_none());
        assert!(!handle.is_finished());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.get_heartbeat("docs").await.unwrap().is_some());
        assert!(store.attempts.load(Ordering::SeqCst) >= 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
