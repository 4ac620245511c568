//! # Sync Harness CLI (`syncd`)
//!
//! ## Usage
//!
//! ```bash
//! syncd --config ./config/syncd.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `syncd init` | Create the SQLite database and run schema migrations |
//! | `syncd check` | Run pre-flight checks and report cluster health |
//! | `syncd run` | Start the scheduler, heartbeats and sync jobs |
//! | `syncd sync <connector-id>` | Run one sync job now |
//! | `syncd sources` | List connectors, their status and last job |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sync_harness::config::{self, Config};
use sync_harness::engine::elasticsearch::ElasticsearchClient;
use sync_harness::engine::SearchEngine;
use sync_harness::registry::ConnectorRegistry;
use sync_harness::sqlite_store::SqliteStore;
use sync_harness::worker::Worker;
use sync_harness::{logging, migrate, sources};
use sync_harness_core::models::JobStatus;
use sync_harness_core::store::memory::InMemoryStore;

/// Sync Harness: schedules connector syncs and indexes documents into
/// Elasticsearch.
#[derive(Parser)]
#[command(
    name = "syncd",
    about = "Sync Harness: schedules connector syncs and indexes documents into Elasticsearch",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/syncd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the connectors, sync_jobs and
    /// heartbeats tables. Safe to run repeatedly.
    Init,

    /// Run pre-flight checks for every connector.
    ///
    /// Verifies each service type is registered and that the job,
    /// connector and content indices exist, then reports cluster health.
    Check,

    /// Start the sync service. Stops on Ctrl-C after in-flight jobs finish.
    Run,

    /// Run one sync job for a connector immediately.
    Sync {
        /// Connector id, as configured in `[[connectors]]`.
        connector: String,
    },

    /// List configured connectors and their status.
    Sources,
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            token.cancel();
        }
    });
    cancel
}

async fn open_store(cfg: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(cfg).await?;
    migrate::apply_schema(store.pool()).await?;
    Ok(Arc::new(store))
}

fn build_worker(cfg: &Config, store: Arc<SqliteStore>) -> Result<Worker> {
    let client = ElasticsearchClient::new(&cfg.elasticsearch)
        .context("Invalid [elasticsearch] configuration")?;
    Ok(Worker::new(
        cfg,
        ConnectorRegistry::with_builtins(),
        Arc::new(client),
        store,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.service.log_level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Check => {
            let client = Arc::new(
                ElasticsearchClient::new(&cfg.elasticsearch)
                    .context("Invalid [elasticsearch] configuration")?,
            );
            let worker = Worker::new(
                &cfg,
                ConnectorRegistry::with_builtins(),
                Arc::clone(&client),
                Arc::new(InMemoryStore::new()),
            );
            for settings in worker.board().snapshot() {
                worker.preflight_one(&settings).await.with_context(|| {
                    format!("pre-flight check failed for connector '{}'", settings.id())
                })?;
                println!("{:<16} OK", settings.id());
            }
            let health = client.health().await?;
            println!(
                "cluster {} is {}",
                health.cluster_name.as_deref().unwrap_or("(unnamed)"),
                health.status
            );
        }
        Commands::Run => {
            let store = open_store(&cfg).await?;
            let worker = build_worker(&cfg, store)?;
            worker.run(shutdown_token()).await?;
        }
        Commands::Sync { connector } => {
            let store = open_store(&cfg).await?;
            let worker = build_worker(&cfg, store)?;
            worker.recover().await?;

            let settings = worker
                .board()
                .settings(&connector)
                .with_context(|| format!("connector '{}' is not configured", connector))?;
            worker.preflight_one(&settings).await.with_context(|| {
                format!("pre-flight check failed for connector '{}'", connector)
            })?;

            let job = worker.sync_once(&connector, &shutdown_token()).await?;
            let stats = job.stats();
            println!(
                "job {} {}: indexed={} skipped={} errored={}",
                job.id(),
                job.status(),
                stats.indexed,
                stats.skipped,
                stats.errored
            );
            if job.status() == JobStatus::Failed {
                anyhow::bail!(
                    "sync failed: {}",
                    job.error().unwrap_or("unknown error")
                );
            }
        }
        Commands::Sources => {
            let store = open_store(&cfg).await?;
            sources::list_sources(&cfg, &ConnectorRegistry::with_builtins(), store.as_ref())
                .await?;
        }
    }

    Ok(())
}
