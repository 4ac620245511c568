//! Startup checks run once per connector before the scheduler starts.
//!
//! 1. The connector's service type must be registered.
//! 2. The job-tracking index, the connector-registration index and the
//!    connector's content index must exist (created if absent).
//!
//! Any failure is fatal to startup. Authorization failures are never
//! retried: the same credentials will be rejected again.

use sync_harness_core::models::ConnectorSettings;

use crate::engine::IndexLifecycle;
use crate::errors::{EngineError, PreflightError};
use crate::registry::ConnectorRegistry;

pub struct PreflightChecker<'a> {
    registry: &'a ConnectorRegistry,
    indices: &'a dyn IndexLifecycle,
    job_index: String,
    connectors_index: String,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(
        registry: &'a ConnectorRegistry,
        indices: &'a dyn IndexLifecycle,
        job_index: impl Into<String>,
        connectors_index: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            indices,
            job_index: job_index.into(),
            connectors_index: connectors_index.into(),
        }
    }

    pub async fn check(&self, settings: &ConnectorSettings) -> Result<(), PreflightError> {
        if !self.registry.is_registered(settings.service_type()) {
            return Err(PreflightError::UnsupportedServiceType(
                settings.service_type().to_string(),
            ));
        }

        for index in [
            self.job_index.as_str(),
            self.connectors_index.as_str(),
            settings.index_name(),
        ] {
            self.ensure(index).await?;
        }

        tracing::info!(
            connector_id = %settings.id(),
            service_type = %settings.service_type(),
            "pre-flight check passed"
        );
        Ok(())
    }

    /// Check every connector, stopping at the first failure.
    pub async fn check_all(&self, settings: &[ConnectorSettings]) -> Result<(), PreflightError> {
        for s in settings {
            self.check(s).await?;
        }
        Ok(())
    }

    async fn ensure(&self, index: &str) -> Result<(), PreflightError> {
        self.indices
            .ensure_index_exists(index)
            .await
            .map_err(|source| match source {
                EngineError::Unauthorized(_) => PreflightError::Authorization { source },
                source => PreflightError::Index {
                    index: index.to_string(),
                    source,
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemorySearchEngine;

    const JOBS: &str = ".elastic-connectors-sync-jobs";
    const CONNECTORS: &str = ".elastic-connectors";

    #[tokio::test]
    async fn unknown_service_type_is_rejected() {
        let registry = ConnectorRegistry::with_builtins();
        let engine = MemorySearchEngine::new();
        let checker = PreflightChecker::new(&registry, &engine, JOBS, CONNECTORS);

        let settings = ConnectorSettings::new("c1", "unknown", "search-c1");
        let err = checker.check(&settings).await.unwrap_err();
        assert!(matches!(err, PreflightError::UnsupportedServiceType(ref s) if s == "unknown"));
        assert_eq!(
            err.to_string(),
            "service type 'unknown' is not a supported connector"
        );
        assert!(engine.ensure_calls().is_empty());
    }

    #[tokio::test]
    async fn required_indices_are_ensured() {
        let registry = ConnectorRegistry::with_builtins();
        let engine = MemorySearchEngine::new();
        let checker = PreflightChecker::new(&registry, &engine, JOBS, CONNECTORS);

        let settings = ConnectorSettings::new("hello", "hello_world", "search-hello");
        checker.check(&settings).await.unwrap();
        checker.check(&settings).await.unwrap();

        assert_eq!(
            engine.index_names(),
            vec![
                CONNECTORS.to_string(),
                JOBS.to_string(),
                "search-hello".to_string()
            ]
        );
        assert_eq!(engine.ensure_calls().len(), 6);
    }

    #[tokio::test]
    async fn authorization_failure_is_wrapped() {
        let registry = ConnectorRegistry::with_builtins();
        let engine = MemorySearchEngine::new();
        engine.set_unauthorized(true);
        let checker = PreflightChecker::new(&registry, &engine, JOBS, CONNECTORS);

        let settings = ConnectorSettings::new("hello", "hello_world", "search-hello");
        let err = checker.check(&settings).await.unwrap_err();
        match err {
            PreflightError::Authorization { source } => {
                assert!(matches!(source, EngineError::Unauthorized(_)))
            }
            other => panic!("expected authorization error, got {other:?}"),
        }
        // Stops at the first index; nothing is retried.
        assert_eq!(engine.ensure_calls(), vec![JOBS.to_string()]);
    }
}
