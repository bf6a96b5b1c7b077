//! # deedbox CLI
//!
//! ```bash
//! deedbox --config ./config/deedbox.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `deedbox init` | Create the chunk database and local root |
//! | `deedbox sync` | Mirror the remote, then update the index |
//! | `deedbox status` | Print the status of the last sync run |
//! | `deedbox index <path>` | (Re)index one synced document |
//! | `deedbox search "<question>"` | Answer a question from the index |
//! | `deedbox indexed` | List indexed document paths |
//! | `deedbox serve` | Start the HTTP API |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use deedbox::app::{App, Role};
use deedbox::config::load_config;
use deedbox::sync::read_status;
use deedbox::{db, logging, migrate, server};
use deedbox_core::models::OverallStatus;

/// Mirror a cloud document folder and ask questions about it.
#[derive(Parser)]
#[command(name = "deedbox", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/deedbox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite schema and the local document root. Idempotent.
    Init,

    /// Run one sync job.
    ///
    /// Exits non-zero if the remote listing fails, another sync holds the
    /// lock, or every file operation failed.
    Sync,

    /// Print the last sync status as JSON.
    Status,

    /// Index one document from the local tree.
    Index {
        /// Path relative to the synced root, e.g. `Leases/unit5.pdf`.
        path: String,
    },

    /// Ask a question over the indexed documents.
    Search {
        query: String,

        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List document paths that have chunks in the index.
    Indexed,

    /// Start the HTTP API (and the periodic sync when configured).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    logging::init(&cfg.logging.filter);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            tokio::fs::create_dir_all(&cfg.sync.local_root)
                .await
                .with_context(|| {
                    format!("failed to create {}", cfg.sync.local_root.display())
                })?;
            println!("Database initialized successfully.");
        }
        Commands::Status => match read_status(&cfg.sync.status_path).await? {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("No sync has run yet."),
        },
        Commands::Sync => {
            let app = App::from_config(&cfg, Role::Sync).await?;
            let report = app.sync().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status.overall_status == OverallStatus::Failed {
                anyhow::bail!("every file operation failed");
            }
        }
        Commands::Index { path } => {
            let app = App::from_config(&cfg, Role::Index).await?;
            let report = app.retrieval.index_document(&path).await?;
            println!("Indexed {} ({} chunks)", report.path, report.chunks);
        }
        Commands::Search { query, top_k } => {
            let app = App::from_config(&cfg, Role::Search).await?;
            let response = app.retrieval.search(&query, top_k).await?;
            println!("{}\n", response.answer);
            for (i, result) in response.results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}",
                    i + 1,
                    result.score,
                    result.document.path
                );
            }
        }
        Commands::Indexed => {
            let app = App::from_config(&cfg, Role::Inspect).await?;
            let paths = app.retrieval.indexed_documents().await?;
            if paths.is_empty() {
                println!("No documents indexed.");
            }
            for path in paths {
                println!("{}", path);
            }
        }
        Commands::Serve => {
            let app = App::from_config(&cfg, Role::Serve).await?;
            server::run_server(Arc::new(app)).await?;
        }
    }

    Ok(())
}
