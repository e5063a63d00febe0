//! Errors that abort a backfill run.
//!
//! Per-chunk write failures are not here: they are counted in the
//! [`BackfillReport`](crate::models::BackfillReport) and the run continues.

use thiserror::Error;

use crate::models::RepoKey;

#[derive(Debug, Error)]
pub enum BackfillError {
    /// The store fallback found no repository for the key.
    #[error("repository not found: {0}")]
    RepositoryNotFound(RepoKey),

    /// The ingestion service failed in a way the store cannot recover from.
    #[error("failed to resolve repository {key}")]
    Resolution {
        key: RepoKey,
        #[source]
        source: anyhow::Error,
    },

    /// Reading chunks or committing embeddings failed.
    #[error("chunk store error")]
    Store(#[source] anyhow::Error),

    /// The batch encode failed; nothing was written.
    #[error("embedding computation failed")]
    Embedding(#[source] anyhow::Error),
}
