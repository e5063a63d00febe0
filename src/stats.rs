//! Per-repository embedding coverage.
//!
//! Used by `embed-backfill status` to show how much of a repository is
//! embedded without triggering ingestion or computing anything.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::error::BackfillError;
use crate::models::{CoverageStats, RepoKey};
use crate::progress::format_number;
use crate::resolver::{self, FallbackReason, Resolution};
use crate::store::{ChunkStore, PgChunkStore};

/// Look up `key` in the store and return its coverage.
pub async fn coverage_for(store: &dyn ChunkStore, key: &RepoKey) -> Result<CoverageStats> {
    match resolver::resolve_from_store(store, key, FallbackReason::Skipped).await {
        Resolution::Resolved { repo_id, .. } => store.coverage(repo_id).await,
        Resolution::NotFound => Err(BackfillError::RepositoryNotFound(key.clone()).into()),
        Resolution::Fatal(e) => Err(e),
    }
}

/// Run the status command: query coverage and print it.
pub async fn run_status(config: &Config, key: &RepoKey) -> Result<()> {
    let store = PgChunkStore::new(db::connect(config).await?);
    let result = coverage_for(&store, key).await;
    store.close().await;

    let stats = result?;
    println!("status {}", key);
    println!("  repository id: {}", stats.repo_id);
    println!("  chunks:        {}", format_number(stats.total_chunks as u64));
    println!(
        "  embedded:      {} / {} ({}%)",
        format_number(stats.embedded_chunks as u64),
        format_number(stats.total_chunks as u64),
        percent(&stats)
    );
    println!("  pending:       {}", format_number(stats.pending_chunks() as u64));
    Ok(())
}

fn percent(stats: &CoverageStats) -> i64 {
    if stats.total_chunks > 0 {
        (stats.embedded_chunks * 100) / stats.total_chunks
    } else {
        0
    }
}
