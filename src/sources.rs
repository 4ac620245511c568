use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use sync_harness_core::models::{ConnectorStatus, JobStatus};
use sync_harness_core::store::Store;

use crate::config::Config;
use crate::registry::ConnectorRegistry;

/// What `syncd sources` reports for one configured connector.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: String,
    pub service_type: String,
    pub index_name: String,
    pub registered: bool,
    pub status: ConnectorStatus,
    pub last_job: Option<JobStatus>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

pub async fn get_sources(
    config: &Config,
    registry: &ConnectorRegistry,
    store: &dyn Store,
) -> Result<Vec<SourceStatus>> {
    let mut sources = Vec::new();
    for settings in config.connector_settings() {
        let state = store.load_connector_state(settings.id()).await?;
        let last_job = store
            .jobs_for_connector(settings.id())
            .await?
            .first()
            .map(|j| j.status());
        let last_heartbeat = store
            .get_heartbeat(settings.id())
            .await?
            .map(|h| h.last_seen_at);

        sources.push(SourceStatus {
            id: settings.id().to_string(),
            service_type: settings.service_type().to_string(),
            index_name: settings.index_name().to_string(),
            registered: registry.is_registered(settings.service_type()),
            status: state.map(|s| s.status).unwrap_or_default(),
            last_job,
            last_heartbeat,
        });
    }
    Ok(sources)
}

pub async fn list_sources(
    config: &Config,
    registry: &ConnectorRegistry,
    store: &dyn Store,
) -> Result<()> {
    let sources = get_sources(config, registry, store).await?;

    println!(
        "{:<16} {:<16} {:<20} {:<11} {:<12} LAST JOB",
        "CONNECTOR", "SERVICE TYPE", "INDEX", "REGISTERED", "STATUS"
    );
    for s in &sources {
        println!(
            "{:<16} {:<16} {:<20} {:<11} {:<12} {}",
            s.id,
            s.service_type,
            s.index_name,
            if s.registered { "yes" } else { "no" },
            s.status,
            s.last_job.map(|j| j.as_str()).unwrap_or("-"),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use sync_harness_core::models::{ConnectorSettings, Job, JobStats};
    use sync_harness_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn reports_registration_and_last_job() {
        let config = parse_config(
            r#"
[db]
path = "/tmp/unused.sqlite"

[elasticsearch]
hosts = ["http://localhost:9200"]

[[connectors]]
id = "hello"
service_type = "hello_world"
index_name = "search-hello"

[[connectors]]
id = "jira"
service_type = "jira"
index_name = "search-jira"
"#,
        )
        .unwrap();
        let store = InMemoryStore::new();

        let mut job = Job::new("hello");
        job.start(Utc::now());
        job.complete(Utc::now(), JobStats::default());
        store.save_job(&job).await.unwrap();
        let mut settings = ConnectorSettings::new("hello", "hello_world", "search-hello");
        settings.status = ConnectorStatus::Idle;
        store.save_connector_state(&settings).await.unwrap();

        let sources = get_sources(&config, &ConnectorRegistry::with_builtins(), &store)
            .await
            .unwrap();

        assert_eq!(sources.len(), 2);
        assert!(sources[0].registered);
        assert_eq!(sources[0].status, ConnectorStatus::Idle);
        assert_eq!(sources[0].last_job, Some(JobStatus::Completed));
        assert!(!sources[1].registered);
        assert_eq!(sources[1].status, ConnectorStatus::Configured);
        assert_eq!(sources[1].last_job, None);
    }
}
