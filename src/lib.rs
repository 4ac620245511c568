//! # Sync Harness
//!
//! A connector sync service: periodically pulls documents from pluggable
//! sources, filters them, and bulk-indexes them into Elasticsearch, with
//! at most one running job per connector.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  tick   ┌────────────────┐ claim_due ┌──────────────────┐
//! │ Scheduler │────────▶│ ConnectorBoard │──────────▶│  SyncJobRunner   │
//! └───────────┘         └────────────────┘  lease    └────────┬─────────┘
//!                                                             │
//!        ┌───────────────────┬────────────────────────────────┤
//!        ▼                   ▼                                ▼
//! ┌──────────────┐   ┌───────────────┐               ┌───────────────┐
//! │  Registry    │   │   Filtering   │               │ SearchEngine  │
//! │ (connectors) │   │ (rules, adv.) │               │  (_bulk)      │
//! └──────────────┘   └───────────────┘               └───────────────┘
//!
//! Heartbeat (own cadence) ─────────────▶ Store (SQLite)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! syncd init                    # create database
//! syncd check                   # pre-flight + cluster health
//! syncd sync docs               # run one job now
//! syncd run                     # start the service
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`errors`] | Typed errors for the orchestration core |
//! | [`traits`] | `Connector` and `DocumentStream` traits |
//! | [`registry`] | Service type → connector factory |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connector_stub`] | Stub and hello-world connectors |
//! | [`engine`] | Search engine traits, Elasticsearch and in-memory engines |
//! | [`board`] | Connector status board and sync leases |
//! | [`preflight`] | Startup checks |
//! | [`heartbeat`] | Liveness signal |
//! | [`job_runner`] | One sync job, end to end |
//! | [`scheduler`] | Polling loop |
//! | [`worker`] | The long-running service |
//! | [`sqlite_store`] | SQLite persistence |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sources`] | Connector status listing |
//! | [`logging`] | tracing subscriber setup |

pub mod board;
pub mod config;
pub mod connector_fs;
pub mod connector_stub;
pub mod db;
pub mod engine;
pub mod errors;
pub mod heartbeat;
pub mod job_runner;
pub mod logging;
pub mod migrate;
pub mod preflight;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod sqlite_store;
pub mod traits;
pub mod worker;
