//! Core data models used throughout the backfill pipeline.
//!
//! These types describe the repositories and code chunks read from the
//! store, and the reports produced at the end of a run.

use std::fmt;

use serde::Serialize;

/// Identity of a repository as known to the ingestion service.
///
/// `folder = None` means "the whole repository". A `None` folder is a
/// distinct key, not a wildcard: it only ever matches a stored `NULL`.
/// The ingestion service stores a blank folder as `NULL`, so
/// [`RepoKey::new`] folds a blank folder into `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoKey {
    pub owner: String,
    pub name: String,
    pub folder: Option<String>,
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, folder: Option<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            folder: folder.filter(|f| !f.trim().is_empty()),
        }
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.folder {
            Some(folder) => write!(f, "{}/{}/{}", self.owner, self.name, folder),
            None => write!(f, "{}/{}", self.owner, self.name),
        }
    }
}

/// A code chunk whose `embedding` column is still `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub id: i64,
    pub file_path: String,
    pub function_name: Option<String>,
    pub code_snippet: String,
}

/// Embedding coverage of a single repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageStats {
    pub repo_id: i64,
    pub total_chunks: i64,
    pub embedded_chunks: i64,
}

impl CoverageStats {
    pub fn pending_chunks(&self) -> i64 {
        self.total_chunks - self.embedded_chunks
    }
}

/// How a finished (non-aborted) run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No chunk was missing an embedding.
    NothingToDo,
    /// Every pending chunk received an embedding.
    Complete,
    /// Some writes failed; the successful subset was committed.
    Partial,
    /// Pending chunks were counted but nothing was embedded.
    DryRun,
}

/// Summary of a backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub repo_id: i64,
    pub chunks_found: usize,
    pub chunks_saved: usize,
    pub dry_run: bool,
}

impl BackfillReport {
    pub fn chunks_failed(&self) -> usize {
        if self.dry_run {
            return 0;
        }
        self.chunks_found - self.chunks_saved
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.chunks_found == 0 {
            RunOutcome::NothingToDo
        } else if self.dry_run {
            RunOutcome::DryRun
        } else if self.chunks_saved == self.chunks_found {
            RunOutcome::Complete
        } else {
            RunOutcome::Partial
        }
    }
}
