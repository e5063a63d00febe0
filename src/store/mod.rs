//! Storage abstraction for repositories and code chunks.
//!
//! The [`ChunkStore`] trait covers every read and write the pipeline makes
//! against the relational store, so the orchestrator and resolver can run
//! against Postgres in production and [`InMemoryStore`] in tests.
//!
//! Writes go through an [`EmbeddingWriter`], which represents a single
//! transaction. Nothing written through it is visible until
//! [`EmbeddingWriter::commit`]; dropping the writer discards everything.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`find_latest_repository`](ChunkStore::find_latest_repository) | Most recent repository matching a key |
//! | [`fetch_pending`](ChunkStore::fetch_pending) | Chunks of a repository with no embedding |
//! | [`coverage`](ChunkStore::coverage) | Embedded vs total chunk counts |
//! | [`begin_writes`](ChunkStore::begin_writes) | Open the run's write transaction |

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgChunkStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CoverageStats, PendingChunk, RepoKey};

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Id of the most recently created repository matching `key`.
    ///
    /// `folder` is compared NULL-safely: a `None` folder matches only
    /// repositories stored without a folder.
    async fn find_latest_repository(&self, key: &RepoKey) -> Result<Option<i64>>;

    /// All chunks of `repo_id` whose embedding is missing, ordered by id.
    async fn fetch_pending(&self, repo_id: i64) -> Result<Vec<PendingChunk>>;

    /// Embedding coverage of `repo_id`.
    async fn coverage(&self, repo_id: i64) -> Result<CoverageStats>;

    /// Open the write transaction for this run.
    async fn begin_writes(&self) -> Result<Box<dyn EmbeddingWriter + '_>>;
}

/// Transactional sink for embedding vectors.
#[async_trait]
pub trait EmbeddingWriter: Send {
    /// Set the embedding of `chunk_id`.
    ///
    /// Fails if the chunk does not exist, already has an embedding, or the
    /// store rejects the vector. A failed call leaves earlier successful
    /// writes in this transaction intact.
    async fn persist_embedding(&mut self, chunk_id: i64, vector: &[f32]) -> Result<()>;

    /// Commit every successful write at once.
    async fn commit(self: Box<Self>) -> Result<()>;
}
