//! Search engine collaborators.
//!
//! The sync core talks to the search engine through two narrow traits:
//! [`IndexLifecycle`] for creating indices at startup and [`SearchEngine`]
//! for bulk writes and health checks during jobs.
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`elasticsearch::ElasticsearchClient`] | REST client (reqwest) for a real cluster |
//! | [`memory::MemorySearchEngine`] | In-process engine with fault injection, for tests |

pub mod elasticsearch;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use sync_harness_core::models::Document;

use crate::errors::EngineError;

/// One document queued for a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    pub id: String,
    pub document: Document,
}

impl IndexRequest {
    /// Build a request, taking the `_id` from the document's `id` field when
    /// it holds a string or number, and generating one otherwise.
    pub fn from_document(document: Document) -> Self {
        let id = match document.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        Self { id, document }
    }
}

/// Result of writing one document in a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    Failed(String),
}

/// Cluster health as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHealth {
    /// `green`, `yellow` or `red`.
    pub status: String,
    pub cluster_name: Option<String>,
}

/// Creates indices before any job runs.
#[async_trait]
pub trait IndexLifecycle: Send + Sync {
    /// Create `name` if it does not exist. Calling this again for an
    /// existing index has no further effect.
    async fn ensure_index_exists(&self, name: &str) -> Result<(), EngineError>;
}

/// Bulk writes and health checks used while jobs run.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Write `batch` into `index`.
    ///
    /// Returns one outcome per request, in request order. An `Err` means
    /// the request as a whole failed and nothing can be assumed written.
    async fn bulk_index(
        &self,
        index: &str,
        batch: &[IndexRequest],
    ) -> Result<Vec<IndexOutcome>, EngineError>;

    async fn health(&self) -> Result<ClusterHealth, EngineError>;
}
