//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation to queries against the `connectors`,
//! `sync_jobs` and `heartbeats` tables created by
//! [`migrate::apply_schema`](crate::migrate::apply_schema).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use sync_harness_core::models::{
    ConnectorSettings, ConnectorState, ConnectorStatus, HeartbeatRecord, Job, JobStats, JobStatus,
};
use sync_harness_core::store::Store;

use crate::config::Config;
use crate::db;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database. The schema must already exist
    /// (`syncd init`).
    pub async fn connect(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {}", ms))
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let status: String = row.try_get("status")?;
    let started_at: Option<i64> = row.try_get("started_at")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    let indexed: i64 = row.try_get("indexed")?;
    let skipped: i64 = row.try_get("skipped")?;
    let errored: i64 = row.try_get("errored")?;

    Ok(Job::restore(
        row.try_get("id")?,
        row.try_get("connector_id")?,
        status.parse::<JobStatus>()?,
        from_millis(row.try_get("created_at")?)?,
        started_at.map(from_millis).transpose()?,
        completed_at.map(from_millis).transpose()?,
        JobStats {
            indexed: indexed as u64,
            skipped: skipped as u64,
            errored: errored as u64,
        },
        row.try_get("error")?,
    ))
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let stats = job.stats();
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (id, connector_id, status, created_at, started_at,
                                   completed_at, indexed, skipped, errored, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                indexed = excluded.indexed,
                skipped = excluded.skipped,
                errored = excluded.errored,
                error = excluded.error
            "#,
        )
        .bind(job.id())
        .bind(job.connector_id())
        .bind(job.status().as_str())
        .bind(to_millis(job.created_at()))
        .bind(job.started_at().map(to_millis))
        .bind(job.completed_at().map(to_millis))
        .bind(stats.indexed as i64)
        .bind(stats.skipped as i64)
        .bind(stats.errored as i64)
        .bind(job.error())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn jobs_for_connector(&self, connector_id: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_jobs WHERE connector_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    async fn save_heartbeat(&self, record: &HeartbeatRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (connector_id, service_type, last_seen_at)
            VALUES (?, ?, ?)
            ON CONFLICT(connector_id) DO UPDATE SET
                service_type = excluded.service_type,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(&record.connector_id)
        .bind(&record.service_type)
        .bind(to_millis(record.last_seen_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_heartbeat(&self, connector_id: &str) -> Result<Option<HeartbeatRecord>> {
        let row = sqlx::query(
            "SELECT connector_id, service_type, last_seen_at FROM heartbeats WHERE connector_id = ?",
        )
        .bind(connector_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(HeartbeatRecord::new(
                row.try_get::<String, _>("connector_id")?,
                row.try_get::<String, _>("service_type")?,
                from_millis(row.try_get("last_seen_at")?)?,
            ))),
            None => Ok(None),
        }
    }

    async fn save_connector_state(&self, settings: &ConnectorSettings) -> Result<()> {
        let cursor = settings
            .last_sync_cursor
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO connectors (id, service_type, index_name, status, last_sync_cursor, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                service_type = excluded.service_type,
                index_name = excluded.index_name,
                status = excluded.status,
                last_sync_cursor = excluded.last_sync_cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(settings.id())
        .bind(settings.service_type())
        .bind(settings.index_name())
        .bind(settings.status.as_str())
        .bind(cursor)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_connector_state(&self, connector_id: &str) -> Result<Option<ConnectorState>> {
        let row = sqlx::query("SELECT status, last_sync_cursor FROM connectors WHERE id = ?")
            .bind(connector_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        let cursor: Option<String> = row.try_get("last_sync_cursor")?;
        Ok(Some(ConnectorState {
            status: status.parse::<ConnectorStatus>()?,
            last_sync_cursor: cursor
                .map(|c| serde_json::from_str(&c))
                .transpose()
                .context("Failed to decode stored cursor")?,
        }))
    }

    async fn fail_interrupted_jobs(&self, reason: &str) -> Result<u64> {
        let now = to_millis(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'failed',
                error = ?,
                started_at = COALESCE(started_at, ?),
                completed_at = ?
            WHERE status IN ('pending', 'in_progress')
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        apply_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    #[tokio::test]
    async fn job_round_trips() {
        let (_tmp, store) = store().await;

        let mut job = Job::new("docs");
        job.start(Utc::now());
        store.save_job(&job).await.unwrap();

        let stats = JobStats {
            indexed: 10,
            skipped: 2,
            errored: 1,
        };
        job.fail(Utc::now(), stats, "boom");
        store.save_job(&job).await.unwrap();

        let loaded = store.get_job(job.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), JobStatus::Failed);
        assert_eq!(loaded.stats(), stats);
        assert_eq!(loaded.error(), Some("boom"));
        assert!(loaded.completed_at().is_some());

        let jobs = store.jobs_for_connector("docs").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(store.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupted_jobs_are_failed() {
        let (_tmp, store) = store().await;

        let mut running = Job::new("docs");
        running.start(Utc::now());
        store.save_job(&running).await.unwrap();

        let mut done = Job::new("docs");
        done.start(Utc::now());
        done.complete(Utc::now(), JobStats::default());
        store.save_job(&done).await.unwrap();

        let updated = store
            .fail_interrupted_jobs("interrupted by service restart")
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let loaded = store.get_job(running.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), JobStatus::Failed);
        assert_eq!(loaded.error(), Some("interrupted by service restart"));
        let loaded = store.get_job(done.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn connector_state_and_heartbeat_round_trip() {
        let (_tmp, store) = store().await;

        assert!(store.load_connector_state("docs").await.unwrap().is_none());

        let mut settings = ConnectorSettings::new("docs", "filesystem", "search-docs");
        settings.status = ConnectorStatus::Idle;
        settings.last_sync_cursor = Some(json!({"mtime": 1700000000}));
        store.save_connector_state(&settings).await.unwrap();

        let state = store.load_connector_state("docs").await.unwrap().unwrap();
        assert_eq!(state.status, ConnectorStatus::Idle);
        assert_eq!(state.last_sync_cursor, Some(json!({"mtime": 1700000000})));

        let record = HeartbeatRecord::new("docs", "filesystem", Utc::now());
        store.save_heartbeat(&record).await.unwrap();
        store.save_heartbeat(&record).await.unwrap();
        let loaded = store.get_heartbeat("docs").await.unwrap().unwrap();
        assert_eq!(loaded.service_type, "filesystem");
        assert_eq!(
            loaded.last_seen_at.timestamp_millis(),
            record.last_seen_at.timestamp_millis()
        );
    }
}
