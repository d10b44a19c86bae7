mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{test_settings, FailingDeleteStore, Harness};
use fsindex::config::QueryConfig;
use fsindex::error::{ExtractError, IndexError, Outcome, ProviderError, Stage};
use fsindex::models::{ChangeEvent, EntryMetadata, FileState};
use fsindex::pipeline::RunOutcome;
use fsindex::provider::ModelProvider;
use fsindex::query::QueryService;
use fsindex::queue::event_queue;
use fsindex::vector_store::VectorStore;

fn indexed_id(outcome: RunOutcome) -> String {
    match outcome {
        RunOutcome::Indexed { file_id, .. } => file_id,
        other => panic!("expected Indexed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unchanged_content_is_skipped() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("notes/a.md", "alpha version one");

    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());
    let again = pipeline.on_change(ChangeEvent::modified(&path)).await.unwrap();

    assert_eq!(again, RunOutcome::Unchanged { file_id: id.clone() });
    assert_eq!(h.provider.summarize_count(), 1);
    assert_eq!(h.provider.embed_count(), 1);
    assert_eq!(h.memory.len(), 1);

    let entry = h.memory.get(&id).unwrap();
    assert_eq!(entry.metadata.path, path.to_string_lossy());
    assert_eq!(entry.metadata.summary.as_deref(), Some("alpha version"));
}

#[tokio::test]
async fn test_failed_run_keeps_previous_entry() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("a.md", "alpha version one");
    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());
    let hash_before = h.records.get(&id).await.unwrap().unwrap().content_hash;

    h.provider.fail_embed.store(true, Ordering::SeqCst);
    fs::write(&path, "beta version two").unwrap();
    let err = pipeline
        .on_change(ChangeEvent::modified(&path))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Embed);
    assert_eq!(err.file_id.as_deref(), Some(id.as_str()));
    assert_eq!(err.outcome(), Outcome::Unprocessable);
    assert!(matches!(err.kind, IndexError::Provider(ProviderError::Unavailable(_))));

    let entry = h.memory.get(&id).unwrap();
    assert_eq!(entry.metadata.summary.as_deref(), Some("alpha version"));
    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.content_hash, hash_before);

    // The next event retries from scratch.
    h.provider.fail_embed.store(false, Ordering::SeqCst);
    let retried = pipeline.on_change(ChangeEvent::modified(&path)).await.unwrap();
    assert_eq!(indexed_id(retried), id);
    let entry = h.memory.get(&id).unwrap();
    assert_eq!(entry.metadata.summary.as_deref(), Some("beta version"));
}

#[tokio::test]
async fn test_move_preserves_identity() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let old = h.write("a.md", "alpha version one");
    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&old)).await.unwrap());

    let new = h.path("archive/b.md");
    fs::create_dir_all(new.parent().unwrap()).unwrap();
    fs::rename(&old, &new).unwrap();

    let outcome = pipeline.on_change(ChangeEvent::moved(&old, &new)).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Moved {
            file_id: id.clone(),
            reindexed: false
        }
    );
    assert_eq!(h.provider.summarize_count(), 1);
    assert!(h.records.get_active_by_path(&old).await.unwrap().is_none());
    let record = h.records.get_active_by_path(&new).await.unwrap().unwrap();
    assert_eq!(record.file_id, id);
    assert_eq!(h.memory.len(), 1);
    // Unchanged content keeps the vector, but the stored path follows the move.
    let entry = h.memory.get(&id).unwrap();
    assert_eq!(entry.metadata.path, new.to_string_lossy());
    assert_eq!(entry.metadata.summary.as_deref(), Some("alpha version"));
}

#[tokio::test]
async fn test_move_with_edit_reindexes_same_identity() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let old = h.write("a.md", "alpha version one");
    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&old)).await.unwrap());

    let new = h.path("b.md");
    fs::rename(&old, &new).unwrap();
    fs::write(&new, "gamma version three").unwrap();

    let outcome = pipeline.on_change(ChangeEvent::moved(&old, &new)).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Moved {
            file_id: id.clone(),
            reindexed: true
        }
    );
    let entry = h.memory.get(&id).unwrap();
    assert_eq!(entry.metadata.path, new.to_string_lossy());
    assert_eq!(entry.metadata.summary.as_deref(), Some("gamma version"));
}

#[tokio::test]
async fn test_delete_removes_entry_and_tombstones() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("a.md", "alpha version one");
    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());

    fs::remove_file(&path).unwrap();
    let outcome = pipeline.on_change(ChangeEvent::deleted(&path)).await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Removed {
            file_id: id.clone(),
            reconciled: true
        }
    );
    assert!(h.memory.is_empty());
    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.state, FileState::Deleted);
}

#[tokio::test]
async fn test_recreated_path_gets_new_identity() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("a.md", "alpha version one");
    let first = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());

    fs::remove_file(&path).unwrap();
    pipeline.on_change(ChangeEvent::deleted(&path)).await.unwrap();
    fs::write(&path, "alpha version one").unwrap();
    let second = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());

    assert_ne!(first, second);
    assert_eq!(h.memory.len(), 1);
}

#[tokio::test]
async fn test_failed_store_delete_is_hidden_from_queries() {
    let h = Harness::new().await;
    let store: Arc<dyn VectorStore> = Arc::new(FailingDeleteStore {
        inner: h.memory.clone(),
    });
    let pipeline = h.pipeline_with_store(Arc::clone(&store), test_settings());
    let path = h.write("a.md", "alpha version one");
    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());

    fs::remove_file(&path).unwrap();
    let outcome = pipeline.on_change(ChangeEvent::deleted(&path)).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Removed {
            file_id: id.clone(),
            reconciled: false
        }
    );

    // The entry is still in the store, but the record is tombstoned.
    assert!(h.memory.get(&id).is_some());
    let provider: Arc<dyn ModelProvider> = h.provider.clone();
    let query = QueryService::new(
        provider,
        store,
        h.records.clone(),
        QueryConfig::default(),
        Duration::from_secs(5),
    );
    let hits = query.search("alpha", None).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_search_fills_limit_past_deleted_entries() {
    let h = Harness::new().await;
    let store: Arc<dyn VectorStore> = Arc::new(FailingDeleteStore {
        inner: h.memory.clone(),
    });
    let pipeline = h.pipeline_with_store(Arc::clone(&store), test_settings());
    let gone = h.write("gone.md", "alpha version one");
    let gone_id = indexed_id(pipeline.on_change(ChangeEvent::created(&gone)).await.unwrap());
    fs::remove_file(&gone).unwrap();
    pipeline.on_change(ChangeEvent::deleted(&gone)).await.unwrap();

    // Scores 0.5 against the query vector, below the leftover entry's 1.0.
    let live = h.write("live.md", "live");
    let record = h.records.upsert_active(&live).await.unwrap();
    let metadata = EntryMetadata {
        path: live.to_string_lossy().into_owned(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        summary: Some("live".to_string()),
    };
    store
        .upsert(&record.file_id, &[0.5, 0.75f32.sqrt()], &metadata)
        .await
        .unwrap();
    assert!(h.memory.get(&gone_id).is_some());
    assert_eq!(h.memory.len(), 2);

    let provider: Arc<dyn ModelProvider> = h.provider.clone();
    let query = QueryService::new(
        provider,
        store,
        h.records.clone(),
        QueryConfig::default(),
        Duration::from_secs(5),
    );
    let hits = query.search("anything", Some(1)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_id, record.file_id);
    assert_eq!(hits[0].path, live);
    assert!((hits[0].score - 0.5).abs() < 1e-4);
}

#[tokio::test]
async fn test_directory_delete_sweeps_children() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let a = h.write("docs/a.md", "alpha version one");
    let b = h.write("docs/deep/b.md", "beta version two");
    let keep = h.write("docsets/c.md", "gamma version three");
    for path in [&a, &b, &keep] {
        pipeline.on_change(ChangeEvent::created(path)).await.unwrap();
    }

    fs::remove_dir_all(h.path("docs")).unwrap();
    let outcome = pipeline
        .on_change(ChangeEvent::deleted(h.path("docs")))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Swept { removed: 2 });
    assert_eq!(h.memory.len(), 1);
    let active = h.records.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].path, keep);
}

#[tokio::test]
async fn test_chunk_summaries_merge_in_source_order() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let text = (0..5)
        .map(|i| format!("Part {} {}", i, "x".repeat(73)))
        .collect::<Vec<_>>()
        .join("\n\n");
    let path = h.write("long.txt", &text);

    // Earlier chunks finish last.
    h.provider.queue_summary_delays(&[80, 60, 40, 20, 0]);
    let outcome = pipeline.on_change(ChangeEvent::created(&path)).await.unwrap();
    let id = match outcome {
        RunOutcome::Indexed { file_id, chunks } => {
            assert_eq!(chunks, 5);
            file_id
        }
        other => panic!("expected Indexed, got {:?}", other),
    };

    let finals = h.provider.final_inputs.lock().unwrap().clone();
    assert_eq!(
        finals,
        vec![vec!["Part 0", "Part 1", "Part 2", "Part 3", "Part 4"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()]
    );
    let entry = h.memory.get(&id).unwrap();
    assert_eq!(
        entry.metadata.summary.as_deref(),
        Some("Part 0 | Part 1 | Part 2 | Part 3 | Part 4")
    );
}

#[tokio::test]
async fn test_same_path_runs_are_serialized() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("a.md", "alpha version one");
    h.provider.set_summary_delay(Duration::from_millis(50));

    let results = pipeline
        .process_batch(vec![
            ChangeEvent::created(&path),
            ChangeEvent::modified(&path),
            ChangeEvent::modified(&path),
        ])
        .await;

    let outcomes: Vec<RunOutcome> = results.into_iter().map(|r| r.unwrap()).collect();
    let id = indexed_id(outcomes[0].clone());
    assert_eq!(outcomes[1], RunOutcome::Unchanged { file_id: id.clone() });
    assert_eq!(outcomes[2], RunOutcome::Unchanged { file_id: id });
    assert_eq!(h.provider.summarize_count(), 1);
}

#[tokio::test]
async fn test_independent_paths_run_in_parallel() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let a = h.write("a.md", "alpha version one");
    let b = h.write("b.md", "beta version two");
    h.provider.set_summary_delay(Duration::from_millis(200));

    let results = pipeline
        .process_batch(vec![ChangeEvent::created(&a), ChangeEvent::created(&b)])
        .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.provider.max_in_flight(), 2);
}

#[tokio::test]
async fn test_concurrent_runs_are_bounded() {
    let h = Harness::new().await;
    let mut settings = test_settings();
    settings.max_concurrent_runs = 1;
    let pipeline = h.pipeline(settings);
    let events = ["a.md", "b.md", "c.md"]
        .iter()
        .map(|name| ChangeEvent::created(h.write(name, "some words here")))
        .collect();
    h.provider.set_summary_delay(Duration::from_millis(30));

    let results = pipeline.process_batch(events).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.provider.summarize_count(), 3);
    assert_eq!(h.provider.max_in_flight(), 1);
}

#[tokio::test]
async fn test_queue_consumer_processes_events() {
    let h = Harness::new().await;
    let pipeline = Arc::new(h.pipeline(test_settings()));
    let a = h.write("a.md", "alpha version one");
    let b = h.write("b.md", "beta version two");
    h.provider.set_summary_delay(Duration::from_millis(30));

    let (tx, rx) = event_queue(16);
    let consumer = tokio::spawn(Arc::clone(&pipeline).run(rx));
    tx.send(ChangeEvent::modified(&a)).await.unwrap();
    tx.send(ChangeEvent::modified(&a)).await.unwrap();
    tx.send(ChangeEvent::created(&b)).await.unwrap();
    drop(tx);
    consumer.await.unwrap();

    // The second run on `a` waits for the first and finds its content unchanged.
    assert_eq!(h.provider.summarize_count(), 2);
    assert_eq!(h.provider.embed_count(), 2);
    assert_eq!(h.memory.len(), 2);
    for path in [&a, &b] {
        let record = h.records.get_active_by_path(path).await.unwrap().unwrap();
        let entry = h.memory.get(&record.file_id).unwrap();
        assert_eq!(entry.metadata.path, path.to_string_lossy());
    }
}

#[tokio::test]
async fn test_queue_backpressure_when_runs_saturated() {
    let h = Harness::new().await;
    let mut settings = test_settings();
    settings.max_concurrent_runs = 1;
    let pipeline = Arc::new(h.pipeline(settings));
    let paths: Vec<_> = ["a.md", "b.md", "c.md"]
        .iter()
        .map(|name| h.write(name, "some words here"))
        .collect();
    h.provider.set_summary_delay(Duration::from_millis(500));

    let (tx, rx) = event_queue(1);
    let consumer = tokio::spawn(Arc::clone(&pipeline).run(rx));
    tx.send(ChangeEvent::created(&paths[0])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The first event is running and the second fills the queue.
    tx.send(ChangeEvent::created(&paths[1])).await.unwrap();
    let blocked =
        tokio::time::timeout(Duration::from_millis(100), tx.send(ChangeEvent::created(&paths[2])))
            .await;
    assert!(blocked.is_err());

    drop(tx);
    consumer.await.unwrap();
    assert_eq!(h.provider.summarize_count(), 2);
    assert_eq!(h.provider.max_in_flight(), 1);
    assert!(h.records.get_active_by_path(&paths[2]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_file_is_tracked_without_entry() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let empty = h.write("empty.txt", "");
    let blank = h.write("blank.md", "  \n\n\t ");

    for path in [&empty, &blank] {
        let outcome = pipeline.on_change(ChangeEvent::created(path)).await.unwrap();
        let file_id = match outcome {
            RunOutcome::Empty { file_id } => file_id,
            other => panic!("expected Empty, got {:?}", other),
        };
        let record = h.records.get(&file_id).await.unwrap().unwrap();
        assert!(record.is_active());
        assert!(record.content_hash.is_some());
    }
    assert!(h.memory.is_empty());
    assert_eq!(h.provider.summarize_count(), 0);
    assert_eq!(h.provider.embed_count(), 0);
}

#[tokio::test]
async fn test_emptied_file_drops_previous_entry() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("a.md", "alpha version one");
    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());

    fs::write(&path, "").unwrap();
    let outcome = pipeline.on_change(ChangeEvent::modified(&path)).await.unwrap();

    assert_eq!(outcome, RunOutcome::Empty { file_id: id });
    assert!(h.memory.is_empty());
}

#[tokio::test]
async fn test_oversized_file_is_rejected() {
    let h = Harness::new().await;
    let mut settings = test_settings();
    settings.max_file_bytes = 16;
    let pipeline = h.pipeline(settings);
    let path = h.write("big.txt", &"y".repeat(64));

    let err = pipeline
        .on_change(ChangeEvent::created(&path))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Read);
    assert!(err.file_id.is_some());
    assert!(matches!(
        err.kind,
        IndexError::SizeLimit {
            size: 64,
            limit: 16
        }
    ));
    assert_eq!(err.outcome(), Outcome::Unprocessable);
    assert!(h.memory.is_empty());
    assert_eq!(h.provider.summarize_count(), 0);
}

#[tokio::test]
async fn test_unsupported_type_creates_no_record() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("blob.bin", "\u{1}\u{2}\u{3}");

    let err = pipeline
        .on_change(ChangeEvent::created(&path))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Extract);
    assert!(err.file_id.is_none());
    assert!(matches!(
        err.kind,
        IndexError::Extraction(ExtractError::UnsupportedType(_))
    ));
    assert!(h.records.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_stage_times_out() {
    let h = Harness::new().await;
    let mut settings = test_settings();
    settings.stage_timeout = Duration::from_millis(100);
    let pipeline = h.pipeline(settings);
    let path = h.write("a.md", "alpha version one");
    h.provider.set_summary_delay(Duration::from_secs(2));

    let err = pipeline
        .on_change(ChangeEvent::created(&path))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Summarize);
    assert!(matches!(
        err.kind,
        IndexError::Provider(ProviderError::Timeout {
            op: "summarize",
            ..
        })
    ));
    assert!(h.memory.is_empty());
    let record = h.records.get_active_by_path(&path).await.unwrap().unwrap();
    assert!(record.content_hash.is_none());
}

#[tokio::test]
async fn test_vanished_path_is_ignored() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let outcome = pipeline
        .on_change(ChangeEvent::created(h.path("never.md")))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Ignored);
}

#[tokio::test]
async fn test_reindex_and_remove_by_id() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(test_settings());
    let path = h.write("a.md", "alpha version one");
    let id = indexed_id(pipeline.on_change(ChangeEvent::created(&path)).await.unwrap());

    let reindexed = pipeline.reindex(&id).await.unwrap();
    assert_eq!(indexed_id(reindexed), id);
    assert_eq!(h.provider.summarize_count(), 2);

    let removed = pipeline.remove(&id).await.unwrap();
    assert_eq!(
        removed,
        RunOutcome::Removed {
            file_id: id.clone(),
            reconciled: true
        }
    );
    assert!(h.memory.is_empty());

    let err = pipeline.reindex(&id).await.unwrap_err();
    assert_eq!(err.outcome(), Outcome::NotFound);
    let err = pipeline.remove("no-such-id").await.unwrap_err();
    assert_eq!(err.outcome(), Outcome::NotFound);
}

#[tokio::test]
async fn test_search_applies_threshold_and_limit() {
    let h = Harness::new().await;
    let store: Arc<dyn VectorStore> = h.memory.clone();
    let scored = [
        ("high.md", [0.9f32, 0.19f32.sqrt()]),
        ("mid.md", [0.5, 0.75f32.sqrt()]),
        ("low.md", [0.3, 0.91f32.sqrt()]),
    ];
    let mut ids = Vec::new();
    for (name, vector) in scored {
        let path = h.write(name, name);
        let record = h.records.upsert_active(&path).await.unwrap();
        let metadata = EntryMetadata {
            path: path.to_string_lossy().into_owned(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            summary: Some(name.to_string()),
        };
        store.upsert(&record.file_id, &vector, &metadata).await.unwrap();
        ids.push(record.file_id);
    }
    assert_eq!(h.memory.len(), 3);

    let provider: Arc<dyn ModelProvider> = h.provider.clone();
    let query = QueryService::new(
        provider,
        store,
        h.records.clone(),
        QueryConfig::default(),
        Duration::from_secs(5),
    );

    let hits = query.search("anything", None).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].file_id, ids[0]);
    assert_eq!(hits[1].file_id, ids[1]);
    assert!((hits[0].score - 0.9).abs() < 1e-4);
    assert!((hits[1].score - 0.5).abs() < 1e-4);
    assert_eq!(hits[0].path, h.path("high.md"));

    let top = query.search("anything", Some(1)).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].file_id, ids[0]);

    let calls = h.provider.embed_count();
    assert!(query.search("   ", None).await.unwrap().is_empty());
    assert_eq!(h.provider.embed_count(), calls);
}
