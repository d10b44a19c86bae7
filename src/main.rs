//! # fsindex CLI
//!
//! ## Usage
//!
//! ```bash
//! fsindex --config ./config/fsindex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fsindex init` | Create the database and the vector collection |
//! | `fsindex watch` | Run the sync daemon until interrupted |
//! | `fsindex scan` | Reconcile the index with the tree once and exit |
//! | `fsindex search "<text>"` | Semantic search over indexed files |
//! | `fsindex reindex <id>` | Re-run the pipeline for one file |
//! | `fsindex remove <id>` | Remove one file from the index |
//! | `fsindex files` | List tracked files |
//! | `fsindex purge` | Drop expired tombstones |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fsindex::{admin, config, daemon, query, scan};

/// fsindex keeps a vector search index in sync with a watched file tree.
#[derive(Parser)]
#[command(
    name = "fsindex",
    about = "Keep a vector search index in sync with a watched file tree",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fsindex.toml")]
    config: PathBuf,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the record database and the vector collection.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Watch the configured root and keep the index in sync.
    ///
    /// Runs a reconciliation scan first, then processes file events until
    /// interrupted. Exits non-zero if the watch on the root is lost.
    Watch,

    /// Reconcile the index with the current tree once, then exit.
    Scan,

    /// Search indexed files by meaning.
    Search {
        /// Search text.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Re-run the full pipeline for a file, even if unchanged.
    Reindex {
        /// File id (see `fsindex files`).
        file_id: String,
    },

    /// Remove a file from the index and tombstone its record.
    Remove {
        /// File id (see `fsindex files`).
        file_id: String,
    },

    /// List tracked files.
    Files {
        /// Include tombstoned records.
        #[arg(long)]
        all: bool,
    },

    /// Permanently drop tombstones older than the grace period.
    Purge,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = if verbose {
        EnvFilter::new("").add_directive(default_level.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("").add_directive(default_level.into()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => admin::run_init(&cfg).await?,
        Commands::Watch => daemon::run_watch(&cfg).await?,
        Commands::Scan => scan::run_scan(&cfg).await?,
        Commands::Search { query, limit } => query::run_search(&cfg, &query, limit).await?,
        Commands::Reindex { file_id } => admin::run_reindex(&cfg, &file_id).await?,
        Commands::Remove { file_id } => admin::run_remove(&cfg, &file_id).await?,
        Commands::Files { all } => admin::run_list_files(&cfg, all).await?,
        Commands::Purge => admin::run_purge(&cfg).await?,
    }

    Ok(())
}
