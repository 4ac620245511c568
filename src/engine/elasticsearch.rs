//! Elasticsearch REST client.
//!
//! A thin transport over `reqwest`: index creation, `_bulk` writes and
//! `_cluster/health`. Authentication is an optional API key sent as
//! `Authorization: ApiKey <key>`.
//!
//! # Error mapping
//!
//! | Response | Error |
//! |----------|-------|
//! | 401, 403 | [`EngineError::Unauthorized`] |
//! | network error, 429, 5xx | [`EngineError::Transport`] (retryable) |
//! | other 4xx | [`EngineError::Rejected`] |

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{ElasticsearchConfig, Endpoint};
use crate::errors::{ConfigError, EngineError};

use super::{ClusterHealth, IndexLifecycle, IndexOutcome, IndexRequest, SearchEngine};

pub struct ElasticsearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ElasticsearchClient {
    /// Build a client for the configured endpoint.
    ///
    /// With `hosts`, requests go to the first host. With `cloud_id`, the
    /// Elasticsearch URL is decoded from the ID.
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let base_url = match config.endpoint()? {
            Endpoint::Hosts(hosts) => hosts[0].trim_end_matches('/').to_string(),
            Endpoint::CloudId(cloud_id) => decode_cloud_id(&cloud_id)?,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')));
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("ApiKey {}", key)),
            None => builder,
        }
    }
}

/// Decode an Elastic Cloud ID (`name:base64(host$es_uuid$kibana_uuid)`)
/// into the Elasticsearch base URL.
pub fn decode_cloud_id(cloud_id: &str) -> Result<String, ConfigError> {
    let (_, encoded) = cloud_id
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidCloudId("missing ':' separator".to_string()))?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfigError::InvalidCloudId(format!("invalid base64: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ConfigError::InvalidCloudId("decoded value is not UTF-8".to_string()))?;

    let mut parts = decoded.split('$');
    let host = parts.next().filter(|s| !s.is_empty());
    let es_uuid = parts.next().filter(|s| !s.is_empty());
    let (Some(host), Some(es_uuid)) = (host, es_uuid) else {
        return Err(ConfigError::InvalidCloudId(
            "expected 'host$elasticsearch_id$...'".to_string(),
        ));
    };

    Ok(match host.split_once(':') {
        Some((hostname, port)) => format!("https://{}.{}:{}", es_uuid, hostname, port),
        None => format!("https://{}.{}", es_uuid, host),
    })
}

fn transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Transport(e.to_string())
}

fn classify(status: StatusCode, body: &str) -> EngineError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EngineError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => EngineError::Transport(message),
        s if s.is_server_error() => EngineError::Transport(message),
        _ => EngineError::Rejected(message),
    }
}

/// Encode a bulk request body as newline-delimited JSON.
fn bulk_body(index: &str, batch: &[IndexRequest]) -> Result<String, EngineError> {
    let mut body = String::new();
    for request in batch {
        let action = json!({ "index": { "_index": index, "_id": request.id } });
        let source = serde_json::to_string(&request.document)
            .map_err(|e| EngineError::Rejected(format!("unserializable document: {}", e)))?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

/// Map a `_bulk` response to per-document outcomes, in request order.
fn parse_bulk_response(json: &Value, expected: usize) -> Result<Vec<IndexOutcome>, EngineError> {
    let items = json
        .get("items")
        .and_then(|i| i.as_array())
        .ok_or_else(|| EngineError::Rejected("bulk response missing items".to_string()))?;

    if items.len() != expected {
        return Err(EngineError::Rejected(format!(
            "bulk response has {} items for {} documents",
            items.len(),
            expected
        )));
    }

    Ok(items
        .iter()
        .map(|item| {
            let result = item.get("index").unwrap_or(item);
            let status = result.get("status").and_then(|s| s.as_u64()).unwrap_or(0);
            if (200..300).contains(&status) {
                IndexOutcome::Indexed
            } else {
                let reason = result
                    .get("error")
                    .map(|e| {
                        e.get("reason")
                            .and_then(|r| r.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| e.to_string())
                    })
                    .unwrap_or_else(|| format!("status {}", status));
                IndexOutcome::Failed(reason)
            }
        })
        .collect())
}

#[async_trait]
impl IndexLifecycle for ElasticsearchClient {
    async fn ensure_index_exists(&self, name: &str) -> Result<(), EngineError> {
        let resp = self
            .request(Method::HEAD, name)
            .send()
            .await
            .map_err(transport_error)?;

        match resp.status() {
            s if s.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            s => return Err(classify(s, "")),
        }

        let resp = self
            .request(Method::PUT, name)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(index = %name, "created index");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        // Someone else created it between the HEAD and the PUT.
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(classify(status, &body))
    }
}

#[async_trait]
impl SearchEngine for ElasticsearchClient {
    async fn bulk_index(
        &self,
        index: &str,
        batch: &[IndexRequest],
    ) -> Result<Vec<IndexOutcome>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .request(Method::POST, "_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(bulk_body(index, batch)?)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let json: Value = resp.json().await.map_err(transport_error)?;
        parse_bulk_response(&json, batch.len())
    }

    async fn health(&self) -> Result<ClusterHealth, EngineError> {
        let resp = self
            .request(Method::GET, "_cluster/health")
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let json: Value = resp.json().await.map_err(transport_error)?;
        Ok(ClusterHealth {
            status: json
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string(),
            cluster_name: json
                .get("cluster_name")
                .and_then(|s| s.as_str())
                .map(str::to_string),
        })
    }
}
