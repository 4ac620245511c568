//! Filesystem connector.
//!
//! Walks `configuration.root`, applying include and exclude globs to paths
//! relative to the root. Files are read lazily as the stream is drained.
//!
//! ```toml
//! [[connectors]]
//! id = "docs"
//! service_type = "filesystem"
//! index_name = "search-docs"
//!
//! [connectors.configuration]
//! root = "./docs"
//! include_globs = ["**/*.md"]
//! exclude_globs = ["drafts/**"]
//! ```
//!
//! Files are yielded in `(modified, relative path)` order, and the cursor is
//! the last pair yielded: `{"modified_ns": <unix nanos>, "path": "<rel>"}`.
//! On resume only files ordered after it are fetched, so two files sharing
//! a modification time are never confused. A bare number is read as a
//! cursor in whole seconds.
//!
//! A file that cannot be read is reported as a document error and skipped;
//! interrupted or timed-out reads are retried.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use sync_harness_core::filtering::EffectiveFilter;
use sync_harness_core::models::{ConnectorSettings, Cursor, Document};

use crate::errors::SourceError;
use crate::traits::{Connector, DocumentStream};

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSettings {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Clone)]
pub struct FilesystemConnector {
    settings: FilesystemSettings,
    include: GlobSet,
    exclude: GlobSet,
}

impl FilesystemConnector {
    pub const SERVICE_TYPE: &'static str = "filesystem";

    pub fn new(settings: FilesystemSettings) -> Result<Self> {
        let include = build_globset(&settings.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(settings.exclude_globs.clone());
        let exclude = build_globset(&default_excludes)?;

        Ok(Self {
            settings,
            include,
            exclude,
        })
    }

    pub fn from_settings(settings: &ConnectorSettings) -> Result<Self> {
        let fs_settings: FilesystemSettings =
            serde_json::from_value(Value::Object(settings.configuration.clone()))
                .with_context(|| format!("connector '{}': invalid configuration", settings.id()))?;
        Self::new(fs_settings)
    }

    /// Files under the root that pass the globs and sort after `since`,
    /// oldest first.
    fn scan(&self, since: Option<&Position>) -> Result<Vec<FileEntry>> {
        let root = &self.settings.root;
        if !root.exists() {
            bail!(
                "Filesystem connector root does not exist: {}",
                root.display()
            );
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root).follow_links(self.settings.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let modified = match modified_nanos(path) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping file without metadata");
                    continue;
                }
            };
            let position = Position {
                modified,
                relative: rel_str,
            };
            if since.is_some_and(|since| position <= *since) {
                continue;
            }

            entries.push(FileEntry {
                path: path.to_path_buf(),
                position,
            });
        }

        entries.sort_by(|a, b| a.position.cmp(&b.position));

        Ok(entries)
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn service_type(&self) -> &str {
        Self::SERVICE_TYPE
    }

    fn description(&self) -> &str {
        "Indexes files under a local directory"
    }

    async fn fetch_documents(
        &self,
        cursor: Option<&Cursor>,
        _filter: &EffectiveFilter,
    ) -> Result<Box<dyn DocumentStream>, SourceError> {
        let since = cursor.map(Position::from_cursor).transpose()?;
        let scanner = self.clone();
        let scan_from = since.clone();
        let entries = tokio::task::spawn_blocking(move || scanner.scan(scan_from.as_ref()))
            .await
            .context("filesystem scan task failed")??;
        tracing::debug!(
            root = %self.settings.root.display(),
            files = entries.len(),
            "scanned filesystem"
        );
        Ok(Box::new(FileStream {
            pending: entries.into(),
            last: since,
        }))
    }
}

/// Sort key of a file, and the shape of the cursor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Position {
    /// Unix nanoseconds.
    modified: i64,
    relative: String,
}

impl Position {
    fn from_cursor(cursor: &Cursor) -> Result<Self> {
        if let Some(secs) = cursor.as_i64() {
            return Ok(Self {
                modified: secs.saturating_mul(1_000_000_000),
                relative: String::new(),
            });
        }
        let modified = cursor.get("modified_ns").and_then(Value::as_i64);
        let relative = cursor.get("path").and_then(Value::as_str);
        match (modified, relative) {
            (Some(modified), Some(relative)) => Ok(Self {
                modified,
                relative: relative.to_string(),
            }),
            _ => bail!("unrecognized filesystem cursor: {}", cursor),
        }
    }

    fn to_cursor(&self) -> Cursor {
        json!({ "modified_ns": self.modified, "path": self.relative })
    }
}

struct FileEntry {
    path: PathBuf,
    position: Position,
}

struct FileStream {
    pending: VecDeque<FileEntry>,
    last: Option<Position>,
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

#[async_trait]
impl DocumentStream for FileStream {
    async fn next_document(&mut self) -> Result<Option<Document>, SourceError> {
        while let Some(entry) = self.pending.front() {
            let bytes = match tokio::fs::read(&entry.path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %entry.path.display(), "file removed during sync");
                    self.pending.pop_front();
                    continue;
                }
                Err(e) if is_transient(e.kind()) => {
                    return Err(SourceError::Transport(format!(
                        "{}: {}",
                        entry.path.display(),
                        e
                    )))
                }
                Err(e) => {
                    let reason = format!("{}: {}", entry.path.display(), e);
                    self.pending.pop_front();
                    return Err(SourceError::Document(reason));
                }
            };

            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            let doc = file_to_document(&entry, &bytes);
            self.last = Some(entry.position);
            return Ok(Some(doc));
        }
        Ok(None)
    }

    fn cursor(&self) -> Option<Cursor> {
        self.last.as_ref().map(Position::to_cursor)
    }
}

fn file_to_document(entry: &FileEntry, bytes: &[u8]) -> Document {
    let id = format!("{:x}", Sha256::digest(entry.position.relative.as_bytes()));
    let title = entry
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let modified_at = Utc.timestamp_nanos(entry.position.modified).to_rfc3339();

    let doc = json!({
        "id": id,
        "path": entry.position.relative,
        "title": title,
        "url": format!("file://{}", entry.path.display()),
        "body": String::from_utf8_lossy(bytes),
        "size": bytes.len(),
        "modified_at": modified_at,
    });
    match doc {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn modified_nanos(path: &Path) -> Result<i64> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let nanos = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    Ok(i64::try_from(nanos).unwrap_or(i64::MAX))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
