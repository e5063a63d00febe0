//! End-to-end tests of the backfill pipeline over the in-memory store.

mod common;

use common::{key, vector_for, BrokenEncoder, FakeEncoder, FixedApi, RecordingProgress};
use embed_backfill::backfill::{Backfill, BackfillOptions};
use embed_backfill::error::BackfillError;
use embed_backfill::models::{RepoKey, RunOutcome};
use embed_backfill::progress::{NoProgress, Phase, ProgressEvent};
use embed_backfill::store::{ChunkStore, InMemoryStore};

/// Store with one repository holding `n` unembedded chunks.
fn seeded_store(n: usize) -> (InMemoryStore, i64, Vec<i64>) {
    let store = InMemoryStore::new();
    let repo = store.add_repository(key(None), 100).unwrap();
    let chunks = (0..n)
        .map(|i| {
            let function = if i % 2 == 0 { Some("handler") } else { None };
            store
                .add_chunk(repo, &format!("src/file{}.py", i), function, &format!("code {}", i))
                .unwrap()
        })
        .collect();
    (store, repo, chunks)
}

async fn run(
    api: &FixedApi,
    store: &InMemoryStore,
    encoder: &dyn embed_backfill::embedding::Encoder,
    key: &RepoKey,
) -> Result<embed_backfill::models::BackfillReport, BackfillError> {
    Backfill::new(api, store, encoder, &NoProgress)
        .run(key, BackfillOptions::default())
        .await
}

#[tokio::test]
async fn test_embeds_all_pending_chunks() {
    let (store, repo, chunks) = seeded_store(4);
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };
    let encoder = FakeEncoder::default();

    let report = run(&api, &store, &encoder, &key(None)).await.unwrap();

    assert_eq!(report.repo_id, repo);
    assert_eq!(report.chunks_found, 4);
    assert_eq!(report.chunks_saved, 4);
    assert_eq!(report.outcome(), RunOutcome::Complete);
    assert_eq!(encoder.calls(), 1, "all texts go in one batch");

    let inputs = encoder.inputs.lock().unwrap().clone();
    assert_eq!(inputs[0], "File: src/file0.py\nFunction: handler\n\ncode 0");
    assert_eq!(inputs[1], "File: src/file1.py\n\ncode 1");

    // Vector i belongs to chunk i.
    for (chunk_id, text) in chunks.iter().zip(inputs.iter()) {
        assert_eq!(store.embedding(*chunk_id).unwrap(), Some(vector_for(text)));
    }
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let (store, repo, _) = seeded_store(3);
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: false,
    };

    let first = FakeEncoder::default();
    let report = run(&api, &store, &first, &key(None)).await.unwrap();
    assert_eq!(report.chunks_saved, 3);

    let second = FakeEncoder::default();
    let report = run(&api, &store, &second, &key(None)).await.unwrap();
    assert_eq!(report.chunks_found, 0);
    assert_eq!(report.chunks_saved, 0);
    assert_eq!(report.outcome(), RunOutcome::NothingToDo);
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn test_only_new_chunks_selected_on_rerun() {
    let (store, repo, _) = seeded_store(2);
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };
    run(&api, &store, &FakeEncoder::default(), &key(None))
        .await
        .unwrap();

    let added = store.add_chunk(repo, "new.py", Some("fresh"), "new code").unwrap();
    let encoder = FakeEncoder::default();
    let report = run(&api, &store, &encoder, &key(None)).await.unwrap();

    assert_eq!(report.chunks_found, 1);
    assert_eq!(report.chunks_saved, 1);
    assert_eq!(
        *encoder.inputs.lock().unwrap(),
        vec!["File: new.py\nFunction: fresh\n\nnew code".to_string()]
    );
    assert!(store.embedding(added).unwrap().is_some());
}

#[tokio::test]
async fn test_failed_write_does_not_block_others() {
    let (store, repo, chunks) = seeded_store(5);
    store.fail_writes_for(chunks[2]).unwrap();
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };

    let report = run(&api, &store, &FakeEncoder::default(), &key(None))
        .await
        .unwrap();

    assert_eq!(report.chunks_found, 5);
    assert_eq!(report.chunks_saved, 4);
    assert_eq!(report.chunks_failed(), 1);
    assert_eq!(report.outcome(), RunOutcome::Partial);
    for (i, id) in chunks.iter().enumerate() {
        assert_eq!(store.embedding(*id).unwrap().is_some(), i != 2, "chunk {}", i);
    }

    // The failed chunk is still pending for the next run.
    let pending = store.fetch_pending(repo).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, chunks[2]);
}

#[tokio::test]
async fn test_empty_backlog_skips_model() {
    let store = InMemoryStore::new();
    let repo = store.add_repository(key(None), 1).unwrap();
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };
    let encoder = FakeEncoder::default();

    let report = run(&api, &store, &encoder, &key(None)).await.unwrap();

    assert_eq!(report.chunks_found, 0);
    assert_eq!(report.chunks_saved, 0);
    assert_eq!(encoder.calls(), 0);
}

#[tokio::test]
async fn test_embedding_failure_aborts_before_writes() {
    let (store, repo, chunks) = seeded_store(3);
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };

    let err = run(&api, &store, &BrokenEncoder, &key(None))
        .await
        .unwrap_err();

    assert!(matches!(err, BackfillError::Embedding(_)));
    for id in chunks {
        assert_eq!(store.embedding(id).unwrap(), None);
    }
}

#[tokio::test]
async fn test_timeout_recovers_from_store() {
    let (store, repo, _) = seeded_store(2);
    let encoder = FakeEncoder::default();

    let report = run(&FixedApi::TimedOut, &store, &encoder, &key(None))
        .await
        .unwrap();

    assert_eq!(report.repo_id, repo);
    assert_eq!(report.chunks_saved, 2);
    assert_eq!(encoder.calls(), 1);
}

#[tokio::test]
async fn test_overload_uses_newest_repository() {
    let store = InMemoryStore::new();
    let old = store.add_repository(key(None), 1).unwrap();
    let new = store.add_repository(key(None), 2).unwrap();
    store.add_chunk(old, "old.py", None, "old").unwrap();
    let fresh = store.add_chunk(new, "new.py", None, "new").unwrap();

    let report = run(&FixedApi::Overloaded, &store, &FakeEncoder::default(), &key(None))
        .await
        .unwrap();

    assert_eq!(report.repo_id, new);
    assert_eq!(report.chunks_found, 1);
    assert!(store.embedding(fresh).unwrap().is_some());
}

#[tokio::test]
async fn test_folder_key_does_not_match_whole_repo() {
    let (store, _, _) = seeded_store(1);
    let encoder = FakeEncoder::default();

    let err = run(&FixedApi::TimedOut, &store, &encoder, &key(Some("backend")))
        .await
        .unwrap_err();

    assert!(matches!(err, BackfillError::RepositoryNotFound(_)));
    assert_eq!(err.to_string(), "repository not found: octo/demo/backend");
    assert_eq!(encoder.calls(), 0);
}

#[tokio::test]
async fn test_blank_folder_recovers_whole_repository() {
    let (store, repo, _) = seeded_store(2);

    let report = run(&FixedApi::TimedOut, &store, &FakeEncoder::default(), &key(Some("")))
        .await
        .unwrap();

    assert_eq!(report.repo_id, repo);
    assert_eq!(report.chunks_saved, 2);
}

#[tokio::test]
async fn test_api_failure_is_fatal_even_if_store_has_repo() {
    let (store, _, chunks) = seeded_store(1);

    let err = run(&FixedApi::Failing, &store, &FakeEncoder::default(), &key(None))
        .await
        .unwrap_err();

    assert!(matches!(err, BackfillError::Resolution { .. }));
    assert_eq!(store.embedding(chunks[0]).unwrap(), None);
}

#[tokio::test]
async fn test_dry_run_counts_without_embedding() {
    let (store, repo, chunks) = seeded_store(3);
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };
    let encoder = FakeEncoder::default();

    let report = Backfill::new(&api, &store, &encoder, &NoProgress)
        .run(
            &key(None),
            BackfillOptions {
                dry_run: true,
                skip_ingest: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.chunks_found, 3);
    assert_eq!(report.outcome(), RunOutcome::DryRun);
    assert_eq!(encoder.calls(), 0);
    assert_eq!(store.embedding(chunks[0]).unwrap(), None);
}

#[tokio::test]
async fn test_skip_ingest_never_calls_api() {
    let (store, repo, _) = seeded_store(1);

    // A failing API would abort the run if it were called.
    let report = Backfill::new(&FixedApi::Failing, &store, &FakeEncoder::default(), &NoProgress)
        .run(
            &key(None),
            BackfillOptions {
                dry_run: false,
                skip_ingest: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.repo_id, repo);
    assert_eq!(report.chunks_saved, 1);
}

#[tokio::test]
async fn test_phases_reported_in_order() {
    let (store, repo, _) = seeded_store(2);
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };
    let progress = RecordingProgress::default();

    Backfill::new(&api, &store, &FakeEncoder::default(), &progress)
        .run(&key(None), BackfillOptions::default())
        .await
        .unwrap();

    let phases: Vec<Phase> = progress
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Phase { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            Phase::Resolving,
            Phase::Fetching,
            Phase::Embedding,
            Phase::Persisting,
            Phase::Done
        ]
    );
}

#[tokio::test]
async fn test_abort_reported() {
    let store = InMemoryStore::new();
    let progress = RecordingProgress::default();

    let result = Backfill::new(&FixedApi::TimedOut, &store, &FakeEncoder::default(), &progress)
        .run(&key(None), BackfillOptions::default())
        .await;

    assert!(result.is_err());
    let events = progress.events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Phase {
            phase: Phase::Aborted,
            ..
        })
    ));
}

#[tokio::test]
async fn test_saving_progress_counts_only_successful_writes() {
    let (store, repo, chunks) = seeded_store(3);
    store.fail_writes_for(chunks[1]).unwrap();
    let api = FixedApi::Processed {
        repo_id: repo,
        cached: true,
    };
    let progress = RecordingProgress::default();

    Backfill::new(&api, &store, &FakeEncoder::default(), &progress)
        .run(&key(None), BackfillOptions::default())
        .await
        .unwrap();

    let events = progress.events.lock().unwrap();
    let last_saving = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ProgressEvent::Saving {
                attempted,
                saved,
                total,
            } => Some((*attempted, *saved, *total)),
            _ => None,
        });
    assert_eq!(last_saving, Some((3, 2, 3)));
}
