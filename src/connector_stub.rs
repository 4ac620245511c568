//! Stub connectors for smoke-testing a deployment.
//!
//! - `stub_connector` yields the documents listed under
//!   `configuration.documents`, or three sample documents. The cursor is
//!   the number of documents consumed, so a resumed sync only sees entries
//!   appended since.
//! - `hello_world` yields a single fixed document.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use sync_harness_core::filtering::EffectiveFilter;
use sync_harness_core::models::{ConnectorSettings, Cursor, Document};

use crate::errors::SourceError;
use crate::traits::{Connector, DocumentStream, VecStream};

pub struct StubConnector {
    documents: Vec<Document>,
}

impl StubConnector {
    pub const SERVICE_TYPE: &'static str = "stub_connector";

    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn from_settings(settings: &ConnectorSettings) -> Result<Self> {
        let documents = match settings.configuration.get("documents") {
            None => sample_documents(),
            Some(Value::Array(items)) => {
                let mut documents = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Object(doc) => documents.push(doc.clone()),
                        _ => bail!(
                            "connector '{}': configuration.documents[{}] must be a table",
                            settings.id(),
                            i
                        ),
                    }
                }
                documents
            }
            Some(_) => bail!(
                "connector '{}': configuration.documents must be an array",
                settings.id()
            ),
        };
        Ok(Self::new(documents))
    }
}

fn sample_documents() -> Vec<Document> {
    [
        json!({"id": "stub-1", "title": "First", "url": "http://stub/1.txt"}),
        json!({"id": "stub-2", "title": "Second", "url": "http://stub/2.txt"}),
        json!({"id": "stub-3", "title": "Third", "url": "http://stub/sample/3.pdf"}),
    ]
    .into_iter()
    .filter_map(|v| v.as_object().cloned())
    .collect()
}

#[async_trait]
impl Connector for StubConnector {
    fn service_type(&self) -> &str {
        Self::SERVICE_TYPE
    }

    fn description(&self) -> &str {
        "Yields documents listed in its configuration"
    }

    async fn fetch_documents(
        &self,
        cursor: Option<&Cursor>,
        _filter: &EffectiveFilter,
    ) -> Result<Box<dyn DocumentStream>, SourceError> {
        let offset = cursor.and_then(Value::as_u64).unwrap_or(0) as usize;
        let remaining = self.documents.iter().skip(offset).cloned().collect();
        let total = self.documents.len().max(offset);
        Ok(Box::new(VecStream::new(remaining).with_cursor(json!(total))))
    }
}

pub struct HelloWorldConnector;

impl HelloWorldConnector {
    pub const SERVICE_TYPE: &'static str = "hello_world";
}

#[async_trait]
impl Connector for HelloWorldConnector {
    fn service_type(&self) -> &str {
        Self::SERVICE_TYPE
    }

    fn description(&self) -> &str {
        "Yields one greeting document"
    }

    async fn fetch_documents(
        &self,
        _cursor: Option<&Cursor>,
        _filter: &EffectiveFilter,
    ) -> Result<Box<dyn DocumentStream>, SourceError> {
        let doc = json!({"id": "hello-world", "title": "Traditional Test", "body": "Hello, world"});
        Ok(Box::new(VecStream::new(
            doc.as_object().cloned().into_iter().collect(),
        )))
    }
}
