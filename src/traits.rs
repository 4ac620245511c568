//! Extension traits for connectors.
//!
//! A connector knows how to pull documents from one kind of external
//! source. The job runner never sees concrete connector types: it asks the
//! [`ConnectorRegistry`](crate::registry::ConnectorRegistry) to build a
//! `Box<dyn Connector>` from a connector's settings, then drains the
//! [`DocumentStream`] it returns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  service_type → factory(settings)        │
//! │  ┌─────────┐ ┌───────────┐ ┌──────────┐  │
//! │  │  stub   │ │hello_world│ │filesystem│  │
//! │  └─────────┘ └───────────┘ └──────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!   Connector::fetch_documents(cursor, filter)
//!                ▼
//!   DocumentStream::next_document() → SyncJobRunner
//! ```
//!
//! # Usage
//!
//! ```rust
//! use async_trait::async_trait;
//! use sync_harness::errors::SourceError;
//! use sync_harness::traits::{Connector, DocumentStream, VecStream};
//! use sync_harness_core::filtering::EffectiveFilter;
//! use sync_harness_core::models::Cursor;
//!
//! pub struct EmptyConnector;
//!
//! #[async_trait]
//! impl Connector for EmptyConnector {
//!     fn service_type(&self) -> &str { "empty" }
//!
//!     async fn fetch_documents(
//!         &self,
//!         _cursor: Option<&Cursor>,
//!         _filter: &EffectiveFilter,
//!     ) -> Result<Box<dyn DocumentStream>, SourceError> {
//!         Ok(Box::new(VecStream::new(Vec::new())))
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;

use sync_harness_core::filtering::EffectiveFilter;
use sync_harness_core::models::{Cursor, Document};

use crate::errors::SourceError;

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// A data source that produces documents for indexing.
///
/// # Lifecycle
///
/// 1. A factory for the connector's service type is registered with the
///    [`ConnectorRegistry`](crate::registry::ConnectorRegistry) at startup.
/// 2. For every job, the runner builds a fresh instance from the
///    connector's settings and calls
///    [`fetch_documents`](Connector::fetch_documents) with the cursor of
///    the last completed sync.
/// 3. Documents are pulled one at a time, filtered, and bulk-indexed.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The service type this connector implements (e.g. `"filesystem"`).
    fn service_type(&self) -> &str;

    /// One-line description, shown by `syncd sources`.
    fn description(&self) -> &str {
        ""
    }

    /// Open a document stream.
    ///
    /// `cursor` is the value persisted after the last completed sync, or
    /// `None` for a full sync. When `filter` carries an advanced config,
    /// connectors that support a native query should apply it here; the
    /// attribute rules are applied by the runner after fetch.
    ///
    /// A [`SourceError::Transport`] return is retried by the runner.
    async fn fetch_documents(
        &self,
        cursor: Option<&Cursor>,
        filter: &EffectiveFilter,
    ) -> Result<Box<dyn DocumentStream>, SourceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Document Stream
// ═══════════════════════════════════════════════════════════════════════

/// A lazy, finite sequence of documents for one sync.
#[async_trait]
pub trait DocumentStream: Send {
    /// Pull the next document, or `None` once the source is exhausted.
    ///
    /// After a [`SourceError::Transport`] the stream must not have
    /// advanced, so calling again fetches the same document. After a
    /// [`SourceError::Document`] it must have advanced past the bad one.
    async fn next_document(&mut self) -> Result<Option<Document>, SourceError>;

    /// Cursor covering every document yielded so far. Persisted by the
    /// runner only once the whole stream has been indexed.
    fn cursor(&self) -> Option<Cursor>;
}

/// A [`DocumentStream`] over documents already in memory.
pub struct VecStream {
    documents: VecDeque<Document>,
    cursor: Option<Cursor>,
}

impl VecStream {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents.into(),
            cursor: None,
        }
    }

    /// Cursor reported by [`DocumentStream::cursor`].
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

#[async_trait]
impl DocumentStream for VecStream {
    async fn next_document(&mut self) -> Result<Option<Document>, SourceError> {
        Ok(self.documents.pop_front())
    }

    fn cursor(&self) -> Option<Cursor> {
        self.cursor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn vec_stream_yields_in_order() {
        let docs = vec![
            json!({"n": 1}).as_object().cloned().unwrap(),
            json!({"n": 2}).as_object().cloned().unwrap(),
        ];
        let mut stream = VecStream::new(docs).with_cursor(json!(2));

        assert_eq!(stream.next_document().await.unwrap().unwrap()["n"], 1);
        assert_eq!(stream.next_document().await.unwrap().unwrap()["n"], 2);
        assert!(stream.next_document().await.unwrap().is_none());
        assert_eq!(stream.cursor(), Some(json!(2)));
    }
}
