//! PostgreSQL + pgvector [`ChunkStore`].
//!
//! Tables are owned by the ingestion service:
//!
//! ```text
//! repositories(id, owner, name, folder, created_at, ...)
//! code_embeddings(id, repo_id, file_path, function_name, code_snippet, embedding vector NULL)
//! ```
//!
//! Ids are read as `bigint` regardless of the column width.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPool;
use sqlx::{Acquire, Postgres, Row, Transaction};

use super::{ChunkStore, EmbeddingWriter};
use crate::models::{CoverageStats, PendingChunk, RepoKey};

pub struct PgChunkStore {
    pool: PgPool,
}

impl PgChunkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Close the underlying pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ChunkStore for PgChunkStore {
    async fn find_latest_repository(&self, key: &RepoKey) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id::bigint
            FROM repositories
            WHERE owner = $1 AND name = $2 AND folder IS NOT DISTINCT FROM $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(&key.owner)
        .bind(&key.name)
        .bind(key.folder.as_deref())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to look up repository {}", key))?;

        Ok(id)
    }

    async fn fetch_pending(&self, repo_id: i64) -> Result<Vec<PendingChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id::bigint AS id, file_path, function_name, code_snippet
            FROM code_embeddings
            WHERE repo_id = $1 AND embedding IS NULL
            ORDER BY id
            "#,
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch pending chunks for repository {}", repo_id))?;

        rows.iter()
            .map(|row| -> Result<PendingChunk, sqlx::Error> {
                Ok(PendingChunk {
                    id: row.try_get("id")?,
                    file_path: row.try_get("file_path")?,
                    function_name: row.try_get("function_name")?,
                    code_snippet: row.try_get("code_snippet")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to decode pending chunks for repository {}", repo_id))
    }

    async fn coverage(&self, repo_id: i64) -> Result<CoverageStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, COUNT(embedding) AS embedded
            FROM code_embeddings
            WHERE repo_id = $1
            "#,
        )
        .bind(repo_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to count chunks for repository {}", repo_id))?;

        Ok(CoverageStats {
            repo_id,
            total_chunks: row.try_get("total")?,
            embedded_chunks: row.try_get("embedded")?,
        })
    }

    async fn begin_writes(&self) -> Result<Box<dyn EmbeddingWriter + '_>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to open write transaction")?;
        Ok(Box::new(PgEmbeddingWriter { tx }))
    }
}

/// One transaction for the whole run; each write runs inside its own
/// savepoint so a rejected row does not poison the transaction.
struct PgEmbeddingWriter {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EmbeddingWriter for PgEmbeddingWriter {
    async fn persist_embedding(&mut self, chunk_id: i64, vector: &[f32]) -> Result<()> {
        let mut savepoint = (&mut self.tx).begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE code_embeddings
            SET embedding = $1
            WHERE id = $2 AND embedding IS NULL
            "#,
        )
        .bind(Vector::from(vector.to_vec()))
        .bind(chunk_id)
        .execute(&mut *savepoint)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                savepoint.commit().await?;
                Ok(())
            }
            Ok(_) => {
                savepoint.rollback().await?;
                bail!("chunk {} not found or already embedded", chunk_id)
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e).with_context(|| format!("Failed to store embedding for chunk {}", chunk_id))
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit embeddings")?;
        Ok(())
    }
}
