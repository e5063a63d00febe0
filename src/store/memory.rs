//! In-memory [`ChunkStore`] implementation for testing.
//!
//! Mirrors the Postgres store's semantics: NULL-safe folder matching,
//! newest-first repository lookup, id-ordered pending chunks, and writes
//! that only become visible on commit. Individual chunk ids can be marked
//! as failing to exercise per-chunk error handling.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{ChunkStore, EmbeddingWriter};
use crate::models::{CoverageStats, PendingChunk, RepoKey};

struct StoredRepo {
    id: i64,
    key: RepoKey,
    created_at: i64,
}

struct StoredChunk {
    id: i64,
    repo_id: i64,
    file_path: String,
    function_name: Option<String>,
    code_snippet: String,
    embedding: Option<Vec<f32>>,
}

#[derive(Default)]
struct Tables {
    repos: Vec<StoredRepo>,
    chunks: Vec<StoredChunk>,
    next_id: i64,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    failing_chunks: Mutex<HashSet<i64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Insert a repository row and return its id.
    pub fn add_repository(&self, key: RepoKey, created_at: i64) -> Result<i64> {
        let mut t = self.tables()?;
        t.next_id += 1;
        let id = t.next_id;
        t.repos.push(StoredRepo {
            id,
            key,
            created_at,
        });
        Ok(id)
    }

    /// Insert a chunk row with no embedding and return its id.
    pub fn add_chunk(
        &self,
        repo_id: i64,
        file_path: &str,
        function_name: Option<&str>,
        code_snippet: &str,
    ) -> Result<i64> {
        let mut t = self.tables()?;
        t.next_id += 1;
        let id = t.next_id;
        t.chunks.push(StoredChunk {
            id,
            repo_id,
            file_path: file_path.to_string(),
            function_name: function_name.map(str::to_string),
            code_snippet: code_snippet.to_string(),
            embedding: None,
        });
        Ok(id)
    }

    /// Committed embedding of a chunk, if any.
    pub fn embedding(&self, chunk_id: i64) -> Result<Option<Vec<f32>>> {
        let t = self.tables()?;
        Ok(t.chunks
            .iter()
            .find(|c| c.id == chunk_id)
            .and_then(|c| c.embedding.clone()))
    }

    /// Make every write to `chunk_id` fail.
    pub fn fail_writes_for(&self, chunk_id: i64) -> Result<()> {
        self.failing_chunks
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?
            .insert(chunk_id);
        Ok(())
    }

    fn is_failing(&self, chunk_id: i64) -> Result<bool> {
        Ok(self
            .failing_chunks
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?
            .contains(&chunk_id))
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn find_latest_repository(&self, key: &RepoKey) -> Result<Option<i64>> {
        let t = self.tables()?;
        Ok(t.repos
            .iter()
            .filter(|r| r.key == *key)
            .max_by_key(|r| r.created_at)
            .map(|r| r.id))
    }

    async fn fetch_pending(&self, repo_id: i64) -> Result<Vec<PendingChunk>> {
        let t = self.tables()?;
        let mut pending: Vec<PendingChunk> = t
            .chunks
            .iter()
            .filter(|c| c.repo_id == repo_id && c.embedding.is_none())
            .map(|c| PendingChunk {
                id: c.id,
                file_path: c.file_path.clone(),
                function_name: c.function_name.clone(),
                code_snippet: c.code_snippet.clone(),
            })
            .collect();
        pending.sort_by_key(|c| c.id);
        Ok(pending)
    }

    async fn coverage(&self, repo_id: i64) -> Result<CoverageStats> {
        let t = self.tables()?;
        let (total, embedded) = t
            .chunks
            .iter()
            .filter(|c| c.repo_id == repo_id)
            .fold((0i64, 0i64), |(total, embedded), c| {
                (total + 1, embedded + i64::from(c.embedding.is_some()))
            });
        Ok(CoverageStats {
            repo_id,
            total_chunks: total,
            embedded_chunks: embedded,
        })
    }

    async fn begin_writes(&self) -> Result<Box<dyn EmbeddingWriter + '_>> {
        Ok(Box::new(MemoryWriter {
            store: self,
            staged: Vec::new(),
        }))
    }
}

struct MemoryWriter<'a> {
    store: &'a InMemoryStore,
    staged: Vec<(i64, Vec<f32>)>,
}

#[async_trait]
impl EmbeddingWriter for MemoryWriter<'_> {
    async fn persist_embedding(&mut self, chunk_id: i64, vector: &[f32]) -> Result<()> {
        if self.store.is_failing(chunk_id)? {
            bail!("simulated write failure for chunk {}", chunk_id);
        }

        let pending = {
            let t = self.store.tables()?;
            t.chunks
                .iter()
                .any(|c| c.id == chunk_id && c.embedding.is_none())
        };
        let staged = self.staged.iter().any(|(id, _)| *id == chunk_id);
        if !pending || staged {
            bail!("chunk {} not found or already embedded", chunk_id);
        }

        self.staged.push((chunk_id, vector.to_vec()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut t = self.store.tables()?;
        for (chunk_id, vector) in self.staged {
            if let Some(chunk) = t.chunks.iter_mut().find(|c| c.id == chunk_id) {
                chunk.embedding = Some(vector);
            }
        }
        Ok(())
    }
}
