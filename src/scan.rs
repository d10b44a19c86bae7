//! Startup reconciliation.
//!
//! File events are not delivered while the daemon is down, so on startup
//! the tree is walked and compared with the record store:
//!
//! - every eligible file yields a `created` event (unchanged files
//!   short-circuit on the content hash, so this is cheap);
//! - every active record whose path is gone or no longer eligible yields a
//!   `deleted` event.

use anyhow::Result;
use walkdir::WalkDir;

use crate::config::Config;
use crate::filter::EventFilter;
use crate::models::ChangeEvent;
use crate::pipeline::RunOutcome;
use crate::records::RecordStore;

pub async fn reconcile(filter: &EventFilter, records: &RecordStore) -> Result<Vec<ChangeEvent>> {
    let root = filter.root().to_path_buf();
    let walk_filter = filter.clone();
    let present = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry during scan");
                    continue;
                }
            };
            if entry.file_type().is_file() && walk_filter.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        files
    })
    .await?;

    let mut events: Vec<ChangeEvent> = present.iter().map(ChangeEvent::created).collect();

    for record in records.list_active().await? {
        let gone = !record.path.is_file() || !filter.accepts(&record.path);
        if gone {
            events.push(ChangeEvent::deleted(&record.path));
        }
    }

    tracing::info!(
        files = present.len(),
        events = events.len(),
        "startup reconciliation planned"
    );
    Ok(events)
}

/// CLI entry point for `fsindex scan`: reconcile once and exit.
pub async fn run_scan(config: &Config) -> Result<()> {
    let components = crate::daemon::build_components(config).await?;
    let events = reconcile(&components.filter, components.pipeline.records()).await?;
    let total = events.len();

    let mut indexed = 0;
    let mut unchanged = 0;
    let mut removed = 0;
    let mut failed = 0;
    for result in components.pipeline.process_batch(events).await {
        match result {
            Ok(RunOutcome::Indexed { .. }) | Ok(RunOutcome::Empty { .. }) => indexed += 1,
            Ok(RunOutcome::Unchanged { .. }) => unchanged += 1,
            Ok(RunOutcome::Removed { .. }) => removed += 1,
            Ok(_) => {}
            Err(e) => {
                failed += 1;
                eprintln!("  error: {}", e);
            }
        }
    }

    println!("Scan complete: {} events", total);
    println!("  indexed:   {}", indexed);
    println!("  unchanged: {}", unchanged);
    println!("  removed:   {}", removed);
    println!("  failed:    {}", failed);
    Ok(())
}
