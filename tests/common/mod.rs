//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use embed_backfill::embedding::Encoder;
use embed_backfill::models::RepoKey;
use embed_backfill::progress::{ProgressEvent, ProgressReporter};
use embed_backfill::resolver::{IngestOutcome, IngestionApi};

pub const DIMS: usize = 3;

/// Deterministic encoder: each vector is derived from its input text, so
/// tests can check that vector `i` belongs to text `i`.
#[derive(Default)]
pub struct FakeEncoder {
    pub calls: AtomicUsize,
    pub inputs: Mutex<Vec<String>>,
}

pub fn vector_for(text: &str) -> Vec<f32> {
    let bytes = text.as_bytes();
    let sum: u32 = bytes.iter().map(|b| *b as u32).sum();
    vec![
        bytes.len() as f32,
        sum as f32,
        *bytes.last().unwrap_or(&0) as f32,
    ]
}

impl FakeEncoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    fn model_name(&self) -> &str {
        "fake"
    }

    fn dims(&self) -> Option<usize> {
        Some(DIMS)
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| vector_for(t)).collect())
    }
}

/// Encoder whose model always fails.
pub struct BrokenEncoder;

#[async_trait]
impl Encoder for BrokenEncoder {
    fn model_name(&self) -> &str {
        "broken"
    }

    fn dims(&self) -> Option<usize> {
        Some(DIMS)
    }

    async fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("model crashed")
    }
}

/// Ingestion API that answers every call the same way.
pub enum FixedApi {
    Processed { repo_id: i64, cached: bool },
    Overloaded,
    TimedOut,
    Failing,
}

#[async_trait]
impl IngestionApi for FixedApi {
    async fn process(&self, _key: &RepoKey) -> IngestOutcome {
        match self {
            FixedApi::Processed { repo_id, cached } => IngestOutcome::Processed {
                repo_id: *repo_id,
                cached: *cached,
                chunks_count: None,
            },
            FixedApi::Overloaded => IngestOutcome::Overloaded,
            FixedApi::TimedOut => IngestOutcome::TimedOut,
            FixedApi::Failing => IngestOutcome::Failed(anyhow::anyhow!("ingestion API error 500")),
        }
    }
}

/// Records every progress event.
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn key(folder: Option<&str>) -> RepoKey {
    RepoKey::new("octo", "demo", folder.map(str::to_string))
}
