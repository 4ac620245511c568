//! In-process search engine.
//!
//! Stores documents in ordered maps keyed by index name and `_id`. Faults
//! can be injected to exercise the retry and partial-failure paths of the
//! job runner without a cluster.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use sync_harness_core::models::Document;

use crate::errors::EngineError;

use super::{ClusterHealth, IndexLifecycle, IndexOutcome, IndexRequest, SearchEngine};

#[derive(Default)]
struct MemoryState {
    indices: BTreeMap<String, BTreeMap<String, Document>>,
    ensure_calls: Vec<String>,
    bulk_calls: usize,
    transient_bulk_failures: u32,
    rejected_ids: HashSet<String>,
    unauthorized: bool,
}

#[derive(Default)]
pub struct MemorySearchEngine {
    state: Mutex<MemoryState>,
}

impl MemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `n` bulk requests with a transport error.
    pub fn fail_next_bulk(&self, n: u32) {
        self.lock().transient_bulk_failures = n;
    }

    /// Report a per-document failure whenever `id` is written.
    pub fn reject_document(&self, id: impl Into<String>) {
        self.lock().rejected_ids.insert(id.into());
    }

    /// Answer every request with `Unauthorized` while set.
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.lock().unauthorized = unauthorized;
    }

    pub fn index_names(&self) -> Vec<String> {
        self.lock().indices.keys().cloned().collect()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.lock().indices.contains_key(name)
    }

    /// Documents in `index`, ordered by `_id`.
    pub fn documents(&self, index: &str) -> Vec<Document> {
        self.lock()
            .indices
            .get(index)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.lock().indices.get(index).map_or(0, |docs| docs.len())
    }

    /// Every index name passed to `ensure_index_exists`, in call order.
    pub fn ensure_calls(&self) -> Vec<String> {
        self.lock().ensure_calls.clone()
    }

    pub fn bulk_calls(&self) -> usize {
        self.lock().bulk_calls
    }
}

#[async_trait]
impl IndexLifecycle for MemorySearchEngine {
    async fn ensure_index_exists(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.ensure_calls.push(name.to_string());
        if state.unauthorized {
            return Err(EngineError::Unauthorized("invalid api key".to_string()));
        }
        state.indices.entry(name.to_string()).or_default();
        Ok(())
    }
}

#[async_trait]
impl SearchEngine for MemorySearchEngine {
    async fn bulk_index(
        &self,
        index: &str,
        batch: &[IndexRequest],
    ) -> Result<Vec<IndexOutcome>, EngineError> {
        let mut state = self.lock();
        state.bulk_calls += 1;

        if state.unauthorized {
            return Err(EngineError::Unauthorized("invalid api key".to_string()));
        }
        if state.transient_bulk_failures > 0 {
            state.transient_bulk_failures -= 1;
            return Err(EngineError::Transport("connection reset".to_string()));
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for request in batch {
            if state.rejected_ids.contains(&request.id) {
                outcomes.push(IndexOutcome::Failed(format!(
                    "document '{}' rejected",
                    request.id
                )));
                continue;
            }
            state
                .indices
                .entry(index.to_string())
                .or_default()
                .insert(request.id.clone(), request.document.clone());
            outcomes.push(IndexOutcome::Indexed);
        }
        Ok(outcomes)
    }

    async fn health(&self) -> Result<ClusterHealth, EngineError> {
        if self.lock().unauthorized {
            return Err(EngineError::Unauthorized("invalid api key".to_string()));
        }
        Ok(ClusterHealth {
            status: "green".to_string(),
            cluster_name: Some("memory".to_string()),
        })
    }
}
