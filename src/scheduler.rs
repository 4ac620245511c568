//! Polling scheduler.
//!
//! One control task owns the tick timer. On every tick it asks the
//! [`ConnectorBoard`] for the connectors that are due; the board marks
//! them `syncing` in the same critical section, so a connector whose job
//! is still running is never handed out again. Each claimed lease is passed
//! to `on_due`, and the returned future is spawned into a [`JoinSet`]
//! without blocking the loop.
//!
//! When the cancellation token fires the loop stops ticking and waits for
//! every in-flight job to reach a terminal state before returning.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::board::{ConnectorBoard, SyncLease};

pub struct Scheduler {
    board: Arc<ConnectorBoard>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(board: Arc<ConnectorBoard>, poll_interval: Duration) -> Self {
        Self {
            board,
            poll_interval,
        }
    }

    pub async fn run<F, Fut>(&self, cancel: CancellationToken, on_due: F)
    where
        F: Fn(SyncLease) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut jobs = JoinSet::new();

        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    for lease in self.board.claim_due(Instant::now()) {
                        tracing::debug!(connector_id = %lease.connector_id(), "connector due");
                        jobs.spawn(on_due(lease));
                    }
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "sync task aborted");
                    }
                }
            }
        }

        tracing::info!(in_flight = jobs.len(), "scheduler stopping");
        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "sync task aborted");
            }
        }
    }
}
