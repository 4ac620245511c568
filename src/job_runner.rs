//! Sync job runner: drives one synchronization of one connector.
//!
//! # Pipeline
//!
//! ```text
//! SyncLease ─► registry.build(settings) ─► fetch_documents(cursor, filter)
//!                                                  │
//!          ┌───────────────────────────────────────┘
//!          ▼
//!   next_document() ──► filter.decide() ──exclude──► stats.skipped
//!          │                   │
//!          │                include
//!          │                   ▼
//!          │             batch (batch_size) ──► bulk_index ──► stats.indexed / stats.errored
//!          ▼
//!   exhausted ──► cursor persisted, job completed, connector idle
//! ```
//!
//! Transport errors from the source (opening the stream or pulling the
//! next document) and from bulk requests are retried with exponential
//! backoff. A document the source cannot read, or one rejected by the
//! engine, is counted in `stats.errored` and the job continues. The cursor is only stored when
//! the whole stream has been indexed.
//!
//! Cancellation is checked between documents and while waiting out a
//! backoff. An in-flight bulk request is always allowed to finish.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use sync_harness_core::filtering::{active_filter, EffectiveFilter, Policy};
use sync_harness_core::models::{
    ConnectorSettings, ConnectorStatus, Cursor, Document, Job, JobStats,
};
use sync_harness_core::store::Store;

use crate::board::{ConnectorBoard, SyncLease};
use crate::config::SyncConfig;
use crate::engine::{IndexOutcome, IndexRequest, SearchEngine};
use crate::errors::{EngineError, SourceError, SyncError};
use crate::registry::ConnectorRegistry;
use crate::traits::{Connector, DocumentStream};

/// Bounded exponential backoff for transient errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): the initial backoff
    /// doubled per attempt, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(5);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Result of a step that may be interrupted by cancellation.
enum Step<T> {
    Ready(T),
    Canceled,
}

pub struct SyncJobRunner {
    registry: Arc<ConnectorRegistry>,
    engine: Arc<dyn SearchEngine>,
    store: Arc<dyn Store>,
    options: SyncOptions,
}

impl SyncJobRunner {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        engine: Arc<dyn SearchEngine>,
        store: Arc<dyn Store>,
        options: SyncOptions,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            options,
        }
    }

    /// Claim `connector_id` on the board and run one job for it.
    ///
    /// Fails with [`SyncError::AlreadySyncing`] without creating a job if
    /// another job owns the connector.
    pub async fn execute(
        &self,
        board: &Arc<ConnectorBoard>,
        connector_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Job, SyncError> {
        let lease = board.try_claim(connector_id)?;
        Ok(self.run_claimed(lease, cancel).await)
    }

    /// Run one job for an already-claimed connector. The returned job is
    /// always in a terminal state and the lease is finished.
    pub async fn run_claimed(&self, lease: SyncLease, cancel: &CancellationToken) -> Job {
        let mut job = Job::new(lease.connector_id());
        job.start(Utc::now());
        self.persist_job(&job).await;
        self.persist_state(lease.settings()).await;
        let mut guard = UnfinishedJob::new(Arc::clone(&self.store), &job, lease.settings());

        tracing::info!(
            connector_id = %lease.connector_id(),
            job_id = %job.id(),
            service_type = %lease.settings().service_type(),
            "sync started"
        );

        let mut stats = JobStats::default();
        let result = self.sync(lease.settings(), &mut stats, cancel).await;
        let now = Utc::now();

        let settings = match result {
            Ok(Step::Ready(cursor)) => {
                job.complete(now, stats);
                tracing::info!(
                    connector_id = %lease.connector_id(),
                    job_id = %job.id(),
                    indexed = stats.indexed,
                    skipped = stats.skipped,
                    errored = stats.errored,
                    "sync completed"
                );
                lease.complete(cursor)
            }
            Ok(Step::Canceled) => {
                job.cancel(now, stats);
                tracing::info!(
                    connector_id = %lease.connector_id(),
                    job_id = %job.id(),
                    indexed = stats.indexed,
                    "sync canceled"
                );
                lease.release()
            }
            Err(e) => {
                job.fail(now, stats, e.to_string());
                tracing::error!(
                    connector_id = %lease.connector_id(),
                    job_id = %job.id(),
                    error = %e,
                    "sync failed"
                );
                lease.fail()
            }
        };

        guard.disarm();
        self.persist_state(&settings).await;
        self.persist_job(&job).await;
        job
    }

    async fn sync(
        &self,
        settings: &ConnectorSettings,
        stats: &mut JobStats,
        cancel: &CancellationToken,
    ) -> Result<Step<Option<Cursor>>, SyncError> {
        let connector = self.registry.build(settings)?;
        let filter = active_filter(settings);
        let cursor = settings.last_sync_cursor.as_ref();

        let mut stream = match self
            .open_stream(connector.as_ref(), cursor, &filter, settings.id(), cancel)
            .await?
        {
            Step::Ready(stream) => stream,
            Step::Canceled => return Ok(Step::Canceled),
        };

        let index = settings.index_name();
        let mut batch: Vec<IndexRequest> = Vec::with_capacity(self.options.batch_size);

        loop {
            if cancel.is_cancelled() {
                return Ok(Step::Canceled);
            }

            let doc = match self
                .next_document(stream.as_mut(), settings.id(), stats, cancel)
                .await?
            {
                Step::Ready(Some(doc)) => doc,
                Step::Ready(None) => break,
                Step::Canceled => return Ok(Step::Canceled),
            };

            if filter.decide(&doc) == Policy::Exclude {
                stats.skipped += 1;
                continue;
            }

            batch.push(IndexRequest::from_document(doc));
            if batch.len() >= self.options.batch_size {
                if let Step::Canceled = self.flush(index, &mut batch, stats, cancel).await? {
                    return Ok(Step::Canceled);
                }
            }
        }

        if let Step::Canceled = self.flush(index, &mut batch, stats, cancel).await? {
            return Ok(Step::Canceled);
        }

        Ok(Step::Ready(stream.cursor()))
    }

    async fn open_stream(
        &self,
        connector: &dyn Connector,
        cursor: Option<&Cursor>,
        filter: &EffectiveFilter,
        connector_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Step<Box<dyn DocumentStream>>, SyncError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(Step::Canceled),
                result = connector.fetch_documents(cursor, filter) => result,
            };
            match result {
                Ok(stream) => return Ok(Step::Ready(stream)),
                Err(e) => {
                    attempt += 1;
                    if let Step::Canceled = self
                        .source_backoff(e, attempt, connector_id, cancel)
                        .await?
                    {
                        return Ok(Step::Canceled);
                    }
                }
            }
        }
    }

    async fn next_document(
        &self,
        stream: &mut dyn DocumentStream,
        connector_id: &str,
        stats: &mut JobStats,
        cancel: &CancellationToken,
    ) -> Result<Step<Option<Document>>, SyncError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(Step::Canceled),
                result = stream.next_document() => result,
            };
            match result {
                Ok(doc) => return Ok(Step::Ready(doc)),
                Err(SourceError::Document(reason)) => {
                    stats.errored += 1;
                    attempt = 0;
                    tracing::warn!(
                        connector_id = %connector_id,
                        reason = %reason,
                        "document skipped"
                    );
                }
                Err(e) => {
                    attempt += 1;
                    if let Step::Canceled = self
                        .source_backoff(e, attempt, connector_id, cancel)
                        .await?
                    {
                        return Ok(Step::Canceled);
                    }
                }
            }
        }
    }

    /// Decide what to do after a source error: fail the job, or wait out
    /// the backoff before the next attempt.
    async fn source_backoff(
        &self,
        error: SourceError,
        attempt: u32,
        connector_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Step<()>, SyncError> {
        match error {
            SourceError::Unauthorized(msg) => return Err(SyncError::Authorization(msg)),
            e if !e.is_transient() => return Err(SyncError::Source(e)),
            e if attempt > self.options.retry.max_retries => {
                return Err(SyncError::SourceExhausted {
                    attempts: attempt,
                    source: e,
                })
            }
            e => {
                let delay = self.options.retry.backoff(attempt);
                tracing::warn!(
                    connector_id = %connector_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "source fetch failed, retrying"
                );
                Ok(wait(delay, cancel).await)
            }
        }
    }

    /// Write `batch` and drain it, retrying transient bulk failures.
    async fn flush(
        &self,
        index: &str,
        batch: &mut Vec<IndexRequest>,
        stats: &mut JobStats,
        cancel: &CancellationToken,
    ) -> Result<Step<()>, SyncError> {
        if batch.is_empty() {
            return Ok(Step::Ready(()));
        }

        let mut attempt = 0;
        let outcomes = loop {
            match self.engine.bulk_index(index, batch).await {
                Ok(outcomes) => break outcomes,
                Err(EngineError::Unauthorized(msg)) => {
                    return Err(SyncError::Authorization(msg))
                }
                Err(e) if !e.is_transient() => return Err(SyncError::Engine(e)),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.retry.max_retries {
                        return Err(SyncError::EngineExhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.options.retry.backoff(attempt);
                    tracing::warn!(
                        index = %index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "bulk index failed, retrying"
                    );
                    if let Step::Canceled = wait(delay, cancel).await {
                        return Ok(Step::Canceled);
                    }
                }
            }
        };

        for (request, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                IndexOutcome::Indexed => stats.indexed += 1,
                IndexOutcome::Failed(reason) => {
                    stats.errored += 1;
                    tracing::warn!(
                        index = %index,
                        document_id = %request.id,
                        reason = %reason,
                        "document failed to index"
                    );
                }
            }
        }
        batch.clear();
        Ok(Step::Ready(()))
    }

    async fn persist_job(&self, job: &Job) {
        if let Err(e) = self.store.save_job(job).await {
            tracing::warn!(job_id = %job.id(), error = %format!("{:#}", e), "failed to record job");
        }
    }

    async fn persist_state(&self, settings: &ConnectorSettings) {
        if let Err(e) = self.store.save_connector_state(settings).await {
            tracing::warn!(
                connector_id = %settings.id(),
                error = %format!("{:#}", e),
                "failed to record connector state"
            );
        }
    }
}

pub(crate) const PANICKED_JOB_REASON: &str = "sync task panicked";

/// Records a job as failed if its task unwinds before finishing.
///
/// The board side is covered by the lease's own drop; this puts the
/// persisted job and connector rows in the same state.
struct UnfinishedJob {
    store: Arc<dyn Store>,
    job: Option<Job>,
    settings: ConnectorSettings,
}

impl UnfinishedJob {
    fn new(store: Arc<dyn Store>, job: &Job, settings: &ConnectorSettings) -> Self {
        Self {
            store,
            job: Some(job.clone()),
            settings: settings.clone(),
        }
    }

    fn disarm(&mut self) {
        self.job = None;
    }
}

impl Drop for UnfinishedJob {
    fn drop(&mut self) {
        let Some(mut job) = self.job.take() else {
            return;
        };
        job.fail(Utc::now(), JobStats::default(), PANICKED_JOB_REASON);
        let mut settings = self.settings.clone();
        settings.status = ConnectorStatus::Error;
        tracing::error!(
            connector_id = %settings.id(),
            job_id = %job.id(),
            "sync task ended without finishing its job"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        handle.spawn(async move {
            if let Err(e) = store.save_job(&job).await {
                tracing::warn!(job_id = %job.id(), error = %format!("{:#}", e), "failed to record job");
            }
            if let Err(e) = store.save_connector_state(&settings).await {
                tracing::warn!(
                    connector_id = %settings.id(),
                    error = %format!("{:#}", e),
                    "failed to record connector state"
                );
            }
        });
    }
}

async fn wait(delay: Duration, cancel: &CancellationToken) -> Step<()> {
    tokio::select! {
        _ = cancel.cancelled() => Step::Canceled,
        _ = tokio::time::sleep(delay) => Step::Ready(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(30), Duration::from_millis(1_000));
    }

    #[test]
    fn options_follow_config() {
        let options = SyncOptions::default();
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.retry.initial_backoff, Duration::from_secs(1));
    }
}
