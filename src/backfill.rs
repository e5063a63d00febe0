//! The backfill pipeline.
//!
//! ```text
//! Resolving ──▶ Fetching ──▶ Embedding ──▶ Persisting ──▶ Done
//!     │            │  │          │
//!     │            │  └─ empty ──┼────────────────────▶ Done (nothing to do)
//!     └────────────┴─────────────┴──────────────────▶ Aborted
//! ```
//!
//! A run resolves the repository, selects every chunk with a `NULL`
//! embedding, encodes all of them in one batch, and writes the vectors in a
//! single transaction. A write that fails is logged and skipped; the rest
//! are still committed, and the run reports a partial success. Chunks that
//! already have an embedding are never selected, so running again only
//! picks up what is still missing.

use crate::chunk;
use crate::config::Config;
use crate::db;
use crate::embedding::{self, Encoder};
use crate::error::BackfillError;
use crate::models::{BackfillReport, RepoKey, RunOutcome};
use crate::progress::{Phase, ProgressEvent, ProgressMode, ProgressReporter};
use crate::resolver::{self, FallbackReason, HttpIngestionClient, IngestionApi, Resolution};
use crate::store::{ChunkStore, PgChunkStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct BackfillOptions {
    /// Count pending chunks without encoding or writing.
    pub dry_run: bool,
    /// Resolve from the store without calling the ingestion service.
    pub skip_ingest: bool,
}

/// One backfill run over injected collaborators.
pub struct Backfill<'a> {
    api: &'a dyn IngestionApi,
    store: &'a dyn ChunkStore,
    encoder: &'a dyn Encoder,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Backfill<'a> {
    pub fn new(
        api: &'a dyn IngestionApi,
        store: &'a dyn ChunkStore,
        encoder: &'a dyn Encoder,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            api,
            store,
            encoder,
            progress,
        }
    }

    pub async fn run(
        &self,
        key: &RepoKey,
        options: BackfillOptions,
    ) -> Result<BackfillReport, BackfillError> {
        let result = self.run_phases(key, options).await;
        let phase = if result.is_ok() {
            Phase::Done
        } else {
            Phase::Aborted
        };
        self.enter(phase, key);
        result
    }

    fn enter(&self, phase: Phase, key: &RepoKey) {
        self.progress.report(ProgressEvent::Phase {
            phase,
            repo: key.to_string(),
        });
    }

    async fn run_phases(
        &self,
        key: &RepoKey,
        options: BackfillOptions,
    ) -> Result<BackfillReport, BackfillError> {
        self.enter(Phase::Resolving, key);
        let resolution = if options.skip_ingest {
            resolver::resolve_from_store(self.store, key, FallbackReason::Skipped).await
        } else {
            resolver::resolve(self.api, self.store, key).await
        };
        let repo_id = match resolution {
            Resolution::Resolved { repo_id, via } => {
                self.progress.report(ProgressEvent::Resolved { repo_id, via });
                repo_id
            }
            Resolution::NotFound => return Err(BackfillError::RepositoryNotFound(key.clone())),
            Resolution::Fatal(source) => {
                return Err(BackfillError::Resolution {
                    key: key.clone(),
                    source,
                })
            }
        };

        self.enter(Phase::Fetching, key);
        let pending = self
            .store
            .fetch_pending(repo_id)
            .await
            .map_err(BackfillError::Store)?;
        self.progress.report(ProgressEvent::Found {
            chunks: pending.len(),
        });

        if pending.is_empty() {
            tracing::info!(repo_id, "no chunks missing embeddings");
            return Ok(BackfillReport {
                repo_id,
                chunks_found: 0,
                chunks_saved: 0,
                dry_run: options.dry_run,
            });
        }

        if options.dry_run {
            return Ok(BackfillReport {
                repo_id,
                chunks_found: pending.len(),
                chunks_saved: 0,
                dry_run: true,
            });
        }

        self.enter(Phase::Embedding, key);
        let texts = chunk::embedding_inputs(&pending);
        let vectors = embedding::encode_batch(self.encoder, &texts)
            .await
            .map_err(BackfillError::Embedding)?;
        drop(texts);
        self.progress.report(ProgressEvent::Embedded {
            vectors: vectors.len(),
            model: self.encoder.model_name().to_string(),
        });

        self.enter(Phase::Persisting, key);
        let total = pending.len();
        let mut writer = self
            .store
            .begin_writes()
            .await
            .map_err(BackfillError::Store)?;
        let mut saved = 0usize;

        for (i, (chunk, vector)) in pending.iter().zip(vectors.iter()).enumerate() {
            match writer.persist_embedding(chunk.id, vector).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    tracing::warn!(chunk_id = chunk.id, error = %format!("{:#}", e), "failed to save embedding");
                }
            }
            self.progress.report(ProgressEvent::Saving {
                attempted: i + 1,
                saved,
                total,
            });
        }

        writer.commit().await.map_err(BackfillError::Store)?;

        if saved < total {
            tracing::warn!(repo_id, saved, total, "some embeddings could not be saved");
        }

        Ok(BackfillReport {
            repo_id,
            chunks_found: total,
            chunks_saved: saved,
            dry_run: false,
        })
    }
}

/// Run a backfill against the configured services.
///
/// The database pool is opened here and closed before returning, whether
/// the run succeeds or aborts.
pub async fn run_backfill(
    config: &Config,
    key: &RepoKey,
    options: BackfillOptions,
    progress: ProgressMode,
) -> anyhow::Result<BackfillReport> {
    let api = HttpIngestionClient::new(&config.ingest.backend_url, config.ingest.timeout())?;
    let store = PgChunkStore::new(db::connect(config).await?);

    let result = match embedding::create_encoder(&config.embedding) {
        Ok(encoder) => {
            let reporter = progress.reporter();
            Backfill::new(&api, &store, encoder.as_ref(), reporter.as_ref())
                .run(key, options)
                .await
                .map_err(anyhow::Error::from)
        }
        Err(e) => Err(e),
    };

    store.close().await;
    result
}

/// Print the end-of-run summary on stdout.
pub fn print_summary(key: &RepoKey, report: &BackfillReport) {
    println!("backfill {}", key);
    println!("  repository id: {}", report.repo_id);
    match report.outcome() {
        RunOutcome::NothingToDo => {
            println!("  chunks found: 0");
            println!("  chunks saved: 0");
            println!("  all chunks already embedded");
        }
        RunOutcome::DryRun => {
            println!("  chunks found: {}", report.chunks_found);
            println!("  dry run, nothing embedded");
        }
        RunOutcome::Complete | RunOutcome::Partial => {
            println!("  chunks found: {}", report.chunks_found);
            println!("  chunks saved: {}", report.chunks_saved);
            if report.outcome() == RunOutcome::Partial {
                println!(
                    "  partial: {} chunks failed and remain pending",
                    report.chunks_failed()
                );
            } else {
                println!("  ok");
            }
        }
    }
}
