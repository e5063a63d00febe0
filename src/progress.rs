//! Backfill progress reporting.
//!
//! Reports each stage of a run so users can see where it is and what it
//! found. Progress is emitted on **stderr** so stdout stays reserved for the
//! final summary.

use std::io::Write;

use crate::resolver::ResolvedVia;

/// Stage of the backfill state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Resolving,
    Fetching,
    Embedding,
    Persisting,
    Done,
    Aborted,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Resolving => "resolving",
            Phase::Fetching => "fetching",
            Phase::Embedding => "embedding",
            Phase::Persisting => "persisting",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Entered a new phase.
    Phase { phase: Phase, repo: String },
    /// Repository id is known.
    Resolved { repo_id: i64, via: ResolvedVia },
    /// Pending chunks were counted.
    Found { chunks: usize },
    /// Vectors were computed.
    Embedded { vectors: usize, model: String },
    /// `attempted` writes so far, of which `saved` succeeded.
    Saving {
        attempted: usize,
        saved: usize,
        total: usize,
    },
}

/// Receives progress events from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let Some(line) = human_line(&event) else {
            return;
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn human_line(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::Phase { phase, repo } => {
            format!("backfill {}  {}...\n", repo, phase.as_str())
        }
        ProgressEvent::Resolved { repo_id, via } => {
            format!("  repository id {} ({})\n", repo_id, describe_via(via))
        }
        ProgressEvent::Found { chunks } => {
            format!("  {} chunks to embed\n", format_number(*chunks as u64))
        }
        ProgressEvent::Embedded { vectors, model } => {
            format!(
                "  generated {} embeddings with {}\n",
                format_number(*vectors as u64),
                model
            )
        }
        ProgressEvent::Saving {
            attempted,
            saved,
            total,
        } => {
            // Only every 100th write and the last one, to keep output short.
            if attempted % 100 != 0 && attempted != total {
                return None;
            }
            let mut line = format!(
                "  saved {} / {} chunks",
                format_number(*saved as u64),
                format_number(*total as u64)
            );
            let failed = attempted - saved;
            if failed > 0 {
                line.push_str(&format!(" ({} failed)", format_number(failed as u64)));
            }
            line.push('\n');
            line
        }
    };
    Some(line)
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Phase { phase, repo } => serde_json::json!({
                "event": "phase",
                "repo": repo,
                "phase": phase.as_str(),
            }),
            ProgressEvent::Resolved { repo_id, via } => serde_json::json!({
                "event": "resolved",
                "repo_id": repo_id,
                "via": describe_via(via),
            }),
            ProgressEvent::Found { chunks } => serde_json::json!({
                "event": "found",
                "chunks": chunks,
            }),
            ProgressEvent::Embedded { vectors, model } => serde_json::json!({
                "event": "embedded",
                "vectors": vectors,
                "model": model,
            }),
            ProgressEvent::Saving {
                attempted,
                saved,
                total,
            } => serde_json::json!({
                "event": "saving",
                "attempted": attempted,
                "saved": saved,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn describe_via(via: &ResolvedVia) -> String {
    match via {
        ResolvedVia::Ingested { cached: true, .. } => "already cached".to_string(),
        ResolvedVia::Ingested { cached: false, .. } => "freshly processed".to_string(),
        ResolvedVia::StoreFallback(reason) => format!("from store: {}", reason),
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
