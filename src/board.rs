//! Connector state board.
//!
//! The board is the only writer of [`ConnectorSettings::status`] while the
//! service runs. All entries sit behind one mutex, so checking whether a
//! connector is due and marking it `syncing` happen in a single critical
//! section. Two scheduler ticks, or a tick racing a manual `syncd sync`,
//! can therefore never both claim the same connector.
//!
//! A successful claim hands out a [`SyncLease`]. The lease is the job's
//! ownership of the connector and must be finished exactly once:
//!
//! | Method | Status after | Cursor |
//! |--------|--------------|--------|
//! | [`SyncLease::complete`] | `idle` | replaced when a new one is given |
//! | [`SyncLease::fail`] | `error` | unchanged |
//! | [`SyncLease::release`] | status before the claim | unchanged |
//! | dropped unfinished | `error` | unchanged |

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

use sync_harness_core::models::{ConnectorSettings, ConnectorState, ConnectorStatus, Cursor};

use crate::errors::SyncError;

struct Entry {
    settings: ConnectorSettings,
    last_attempt: Option<Instant>,
}

impl Entry {
    fn is_due(&self, now: Instant) -> bool {
        if !self.settings.status.is_dispatchable() {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(at) => {
                now.saturating_duration_since(at)
                    >= Duration::from_secs(self.settings.poll_interval_seconds)
            }
        }
    }
}

pub struct ConnectorBoard {
    entries: Mutex<Vec<Entry>>,
}

impl ConnectorBoard {
    pub fn new(settings: impl IntoIterator<Item = ConnectorSettings>) -> Self {
        Self {
            entries: Mutex::new(
                settings
                    .into_iter()
                    .map(|settings| Entry {
                        settings,
                        last_attempt: None,
                    })
                    .collect(),
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply persisted state for `connector_id`. A connector that was
    /// `syncing` when the service stopped comes back as `error`: the job
    /// that owned it no longer exists.
    pub fn restore(&self, connector_id: &str, mut state: ConnectorState) -> bool {
        if state.status == ConnectorStatus::Syncing {
            state.status = ConnectorStatus::Error;
        }
        let mut entries = self.lock();
        match entries.iter_mut().find(|e| e.settings.id() == connector_id) {
            Some(entry) => {
                entry.settings.apply_state(state);
                true
            }
            None => false,
        }
    }

    /// Claim every connector that is due at `now`.
    pub fn claim_due(self: &Arc<Self>, now: Instant) -> Vec<SyncLease> {
        let mut entries = self.lock();
        entries
            .iter_mut()
            .filter(|entry| entry.is_due(now))
            .map(|entry| self.claim_entry(entry, now))
            .collect()
    }

    /// Claim one connector regardless of its interval.
    pub fn try_claim(self: &Arc<Self>, connector_id: &str) -> Result<SyncLease, SyncError> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.settings.id() == connector_id)
            .ok_or_else(|| SyncError::UnknownConnector(connector_id.to_string()))?;

        if !entry.settings.status.is_dispatchable() {
            return Err(SyncError::AlreadySyncing(connector_id.to_string()));
        }
        Ok(self.claim_entry(entry, Instant::now()))
    }

    fn claim_entry(self: &Arc<Self>, entry: &mut Entry, now: Instant) -> SyncLease {
        let previous = entry.settings.status;
        entry.settings.status = ConnectorStatus::Syncing;
        entry.last_attempt = Some(now);
        SyncLease {
            board: Arc::clone(self),
            settings: entry.settings.clone(),
            previous,
            finished: false,
        }
    }

    fn finish(
        &self,
        connector_id: &str,
        status: ConnectorStatus,
        cursor: Option<Cursor>,
    ) -> Option<ConnectorSettings> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.settings.id() == connector_id)?;
        entry.settings.status = status;
        if let Some(cursor) = cursor {
            entry.settings.last_sync_cursor = Some(cursor);
        }
        Some(entry.settings.clone())
    }

    pub fn status(&self, connector_id: &str) -> Option<ConnectorStatus> {
        self.lock()
            .iter()
            .find(|e| e.settings.id() == connector_id)
            .map(|e| e.settings.status)
    }

    pub fn settings(&self, connector_id: &str) -> Option<ConnectorSettings> {
        self.lock()
            .iter()
            .find(|e| e.settings.id() == connector_id)
            .map(|e| e.settings.clone())
    }

    /// Current settings of every connector, in registration order.
    pub fn snapshot(&self) -> Vec<ConnectorSettings> {
        self.lock().iter().map(|e| e.settings.clone()).collect()
    }
}

/// Exclusive ownership of one connector for the duration of a job.
pub struct SyncLease {
    board: Arc<ConnectorBoard>,
    settings: ConnectorSettings,
    previous: ConnectorStatus,
    finished: bool,
}

impl SyncLease {
    /// Settings as they were when the claim was made.
    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    pub fn connector_id(&self) -> &str {
        self.settings.id()
    }

    /// Mark the connector `idle`, storing `cursor` if one is given.
    /// Returns the settings to persist.
    pub fn complete(mut self, cursor: Option<Cursor>) -> ConnectorSettings {
        self.finish(ConnectorStatus::Idle, cursor)
    }

    /// Mark the connector `error`. The cursor is left untouched.
    pub fn fail(mut self) -> ConnectorSettings {
        self.finish(ConnectorStatus::Error, None)
    }

    /// Give the connector back in the state it had before the claim.
    pub fn release(mut self) -> ConnectorSettings {
        let previous = self.previous;
        self.finish(previous, None)
    }

    fn finish(&mut self, status: ConnectorStatus, cursor: Option<Cursor>) -> ConnectorSettings {
        self.finished = true;
        match self.board.finish(self.settings.id(), status, cursor.clone()) {
            Some(settings) => settings,
            None => {
                let mut settings = self.settings.clone();
                settings.status = status;
                if cursor.is_some() {
                    settings.last_sync_cursor = cursor;
                }
                settings
            }
        }
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                connector_id = %self.settings.id(),
                "sync lease dropped without finishing; marking connector as error"
            );
            self.board
                .finish(self.settings.id(), ConnectorStatus::Error, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn board() -> Arc<ConnectorBoard> {
        Arc::new(ConnectorBoard::new(vec![
            ConnectorSettings::new("a", "stub_connector", "idx-a").with_poll_interval(60),
            ConnectorSettings::new("b", "stub_connector", "idx-b").with_poll_interval(300),
        ]))
    }

    #[tokio::test(start_paused = true)]
    async fn syncing_connectors_are_never_claimed_twice() {
        let board = board();
        let now = Instant::now();

        let leases = board.claim_due(now);
        assert_eq!(leases.len(), 2);
        assert_eq!(board.status("a"), Some(ConnectorStatus::Syncing));

        // Long past both intervals, but still syncing.
        assert!(board.claim_due(now + Duration::from_secs(3600)).is_empty());
        assert!(matches!(
            board.try_claim("a"),
            Err(SyncError::AlreadySyncing(_))
        ));
        for lease in leases {
            lease.release();
        }
        assert_eq!(board.status("a"), Some(ConnectorStatus::Configured));
    }

    #[tokio::test(start_paused = true)]
    async fn due_after_interval_elapses() {
        let board = board();
        let start = Instant::now();

        for lease in board.claim_due(start) {
            lease.complete(None);
        }

        assert!(board.claim_due(start + Duration::from_secs(30)).is_empty());

        let leases = board.claim_due(start + Duration::from_secs(60));
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].connector_id(), "a");
        for lease in leases {
            lease.fail();
        }
        assert_eq!(board.status("a"), Some(ConnectorStatus::Error));

        // error is dispatchable once the interval passes again
        assert_eq!(board.claim_due(start + Duration::from_secs(300)).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lease_outcomes() {
        let board = board();

        let lease = board.try_claim("a").unwrap();
        let settings = lease.complete(Some(json!(7)));
        assert_eq!(settings.status, ConnectorStatus::Idle);
        assert_eq!(settings.last_sync_cursor, Some(json!(7)));

        let lease = board.try_claim("a").unwrap();
        let settings = lease.fail();
        assert_eq!(settings.status, ConnectorStatus::Error);
        assert_eq!(settings.last_sync_cursor, Some(json!(7)));

        let lease = board.try_claim("a").unwrap();
        assert_eq!(lease.release().status, ConnectorStatus::Error);

        let lease = board.try_claim("b").unwrap();
        drop(lease);
        assert_eq!(board.status("b"), Some(ConnectorStatus::Error));

        assert!(matches!(
            board.try_claim("missing"),
            Err(SyncError::UnknownConnector(_))
        ));
    }

    #[test]
    fn restore_turns_syncing_into_error() {
        let board = ConnectorBoard::new(vec![ConnectorSettings::new("a", "x", "i")]);
        assert!(board.restore(
            "a",
            ConnectorState {
                status: ConnectorStatus::Syncing,
                last_sync_cursor: Some(json!("c")),
            }
        ));
        let settings = board.settings("a").unwrap();
        assert_eq!(settings.status, ConnectorStatus::Error);
        assert_eq!(settings.last_sync_cursor, Some(json!("c")));
        assert!(!board.restore("missing", ConnectorState::default()));
    }
}
