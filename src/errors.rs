//! Typed errors for the orchestration core.
//!
//! Application edges (config loading, CLI, persistence) use `anyhow`; the
//! types here exist where callers branch on the kind of failure: retry a
//! transport error, count a document error, abort startup on an
//! authorization error, drop a dispatch on `AlreadySyncing`.

use thiserror::Error;

/// Connector registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service type '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("no connector registered for service type '{0}'")]
    UnknownServiceType(String),
}

/// Malformed search-engine transport configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("either elasticsearch.cloud_id or elasticsearch.hosts must be configured")]
    MissingEndpoint,

    #[error("elasticsearch.cloud_id and elasticsearch.hosts are mutually exclusive")]
    ConflictingEndpoints,

    #[error("elasticsearch.cloud_id is malformed: {0}")]
    InvalidCloudId(String),
}

/// Errors reported by the search engine collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("search engine is not authorizing access: {0}")]
    Unauthorized(String),

    /// Network failure, throttling, or a server-side error. Retryable.
    #[error("search engine transport error: {0}")]
    Transport(String),

    #[error("search engine rejected the request: {0}")]
    Rejected(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}

/// Errors reported by a connector while fetching documents.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be reached. Retryable.
    #[error("source transport error: {0}")]
    Transport(String),

    #[error("source is not authorizing access: {0}")]
    Unauthorized(String),

    /// One document could not be read. The stream has already moved past
    /// it; the job counts it and continues.
    #[error("document could not be read: {0}")]
    Document(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transport(_))
    }
}

/// Startup checks that must pass before any job runs.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("service type '{0}' is not a supported connector")]
    UnsupportedServiceType(String),

    #[error("Elasticsearch is not authorizing access: {source}")]
    Authorization {
        #[source]
        source: EngineError,
    },

    #[error("failed to ensure index '{index}' exists: {source}")]
    Index {
        index: String,
        #[source]
        source: EngineError,
    },
}

/// Reasons a sync job cannot start or ends in `failed`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connector '{0}' is already syncing")]
    AlreadySyncing(String),

    #[error("connector '{0}' is not configured")]
    UnknownConnector(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to build connector: {0:#}")]
    Build(anyhow::Error),

    #[error("fetching documents failed after {attempts} attempts: {source}")]
    SourceExhausted {
        attempts: u32,
        #[source]
        source: SourceError,
    },

    #[error("bulk indexing failed after {attempts} attempts: {source}")]
    EngineExhausted {
        attempts: u32,
        #[source]
        source: EngineError,
    },

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error(transparent)]
    Source(SourceError),

    #[error(transparent)]
    Engine(EngineError),
}
