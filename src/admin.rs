//! Administrative CLI commands: `init`, `reindex`, `remove`, `files`, `purge`.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::config::Config;
use crate::daemon::{build_components, purge_expired};
use crate::db;
use crate::migrate;
use crate::models::FileRecord;
use crate::pipeline::RunOutcome;
use crate::records::RecordStore;
use crate::vector_store::create_store;

pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    println!("Database initialized at {}", config.db.path.display());

    let store = create_store(&config.vector_store, config.model.dims)?;
    store.init().await?;
    println!(
        "Vector store ready ({}, collection '{}', {} dims)",
        store.name(),
        config.vector_store.collection,
        config.model.dims
    );
    Ok(())
}

pub async fn run_reindex(config: &Config, file_id: &str) -> Result<()> {
    let components = build_components(config).await?;
    let outcome = components.pipeline.reindex(file_id).await?;
    println!("{}", describe(&outcome));
    Ok(())
}

pub async fn run_remove(config: &Config, file_id: &str) -> Result<()> {
    let components = build_components(config).await?;
    let outcome = components.pipeline.remove(file_id).await?;
    println!("{}", describe(&outcome));
    Ok(())
}

pub async fn run_list_files(config: &Config, all: bool) -> Result<()> {
    let records = open_records(config).await?;
    let files = if all {
        records.list_all().await?
    } else {
        records.list_active().await?
    };

    if files.is_empty() {
        println!("No tracked files.");
        return Ok(());
    }

    println!("{:<36}  {:<7}  {:<19}  PATH", "ID", "STATE", "UPDATED");
    for record in &files {
        println!("{}", format_record(record));
    }
    println!();
    println!("{} file(s)", files.len());
    Ok(())
}

pub async fn run_purge(config: &Config) -> Result<()> {
    let records = open_records(config).await?;
    let purged = purge_expired(&records, config.pipeline.tombstone_grace_secs).await?;
    println!("Purged {} tombstone(s)", purged);
    Ok(())
}

async fn open_records(config: &Config) -> Result<RecordStore> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    Ok(RecordStore::new(pool))
}

fn format_record(record: &FileRecord) -> String {
    let updated = Utc
        .timestamp_opt(record.updated_at, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| record.updated_at.to_string());
    format!(
        "{:<36}  {:<7}  {:<19}  {}",
        record.file_id,
        record.state.as_str(),
        updated,
        record.path.display()
    )
}

fn describe(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Indexed { file_id, chunks } => {
            format!("Indexed {} ({} chunk(s))", file_id, chunks)
        }
        RunOutcome::Unchanged { file_id } => format!("Unchanged {}", file_id),
        RunOutcome::Empty { file_id } => format!("Tracked {} (no extractable content)", file_id),
        RunOutcome::Moved { file_id, reindexed } => {
            format!("Moved {} (reindexed: {})", file_id, reindexed)
        }
        RunOutcome::Removed {
            file_id,
            reconciled,
        } => {
            if *reconciled {
                format!("Removed {}", file_id)
            } else {
                format!(
                    "Removed {} (vector store delete failed; entry left for reconciliation)",
                    file_id
                )
            }
        }
        RunOutcome::Swept { removed } => format!("Removed {} file(s) under directory", removed),
        RunOutcome::Ignored => "Nothing to do (file no longer present)".to_string(),
    }
}
