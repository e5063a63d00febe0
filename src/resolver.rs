//! Repository resolution.
//!
//! Turns an `(owner, name, folder)` key into a repository id. The normal
//! path asks the ingestion service to process the repository, which either
//! returns its cached id or ingests it and returns the new one.
//!
//! When the service answers with a rate-limit signal, or the request times
//! out, the ingestion may still have finished (or finished on an earlier
//! run). In those cases the resolver looks the repository up in the store
//! instead of failing:
//!
//! ```text
//!            ┌──────────────┐   200     ┌──────────────┐
//!  key ─────▶│ ingestion API├──────────▶│  Resolved    │
//!            └──────┬───────┘           └──────────────┘
//!          429 /    │  other status / error
//!         timeout   └──────────────────▶ Fatal
//!                ▼
//!         ┌──────────────┐  found  ┌──────────────┐
//!         │ store lookup ├────────▶│  Resolved    │
//!         └──────┬───────┘         └──────────────┘
//!                └── none ───────▶ NotFound
//! ```

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::models::RepoKey;
use crate::store::ChunkStore;

/// Result of one call to the ingestion service.
#[derive(Debug)]
pub enum IngestOutcome {
    /// HTTP 200. `cached` is true when the service already had the repository.
    Processed {
        repo_id: i64,
        cached: bool,
        chunks_count: Option<i64>,
    },
    /// The service signalled overload (HTTP 429 or `Retry-After` on a 503).
    Overloaded,
    /// The request did not complete within the configured timeout.
    TimedOut,
    /// Any other status, transport error, or unreadable response.
    Failed(anyhow::Error),
}

/// The repository-ingestion service.
#[async_trait]
pub trait IngestionApi: Send + Sync {
    /// Ask the service to process `key`, returning its repository id.
    async fn process(&self, key: &RepoKey) -> IngestOutcome;
}

/// Why the store lookup was used instead of the service's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    Overloaded,
    TimedOut,
    /// Ingestion was skipped on request.
    Skipped,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Overloaded => f.write_str("ingestion service overloaded"),
            FallbackReason::TimedOut => f.write_str("ingestion request timed out"),
            FallbackReason::Skipped => f.write_str("ingestion skipped"),
        }
    }
}

/// How a repository id was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    /// The ingestion service returned the id. Cached and freshly processed
    /// repositories are treated the same; the flag is kept for reporting.
    Ingested {
        cached: bool,
        chunks_count: Option<i64>,
    },
    StoreFallback(FallbackReason),
}

/// Outcome of [`resolve`].
#[derive(Debug)]
pub enum Resolution {
    Resolved { repo_id: i64, via: ResolvedVia },
    /// The fallback lookup found no matching repository.
    NotFound,
    /// Unrecoverable failure; nothing has been written.
    Fatal(anyhow::Error),
}

/// Resolve `key` through the ingestion service, falling back to the store
/// on overload or timeout.
pub async fn resolve(api: &dyn IngestionApi, store: &dyn ChunkStore, key: &RepoKey) -> Resolution {
    match api.process(key).await {
        IngestOutcome::Processed {
            repo_id,
            cached,
            chunks_count,
        } => {
            if cached {
                tracing::info!(%key, repo_id, ?chunks_count, "repository already cached");
            } else {
                tracing::info!(%key, repo_id, ?chunks_count, "repository processed");
            }
            Resolution::Resolved {
                repo_id,
                via: ResolvedVia::Ingested {
                    cached,
                    chunks_count,
                },
            }
        }
        IngestOutcome::Overloaded => {
            tracing::warn!(%key, "ingestion service is rate limiting, checking store for existing data");
            resolve_from_store(store, key, FallbackReason::Overloaded).await
        }
        IngestOutcome::TimedOut => {
            tracing::warn!(%key, "ingestion request timed out, checking store for saved chunks");
            resolve_from_store(store, key, FallbackReason::TimedOut).await
        }
        IngestOutcome::Failed(e) => Resolution::Fatal(e),
    }
}

/// Resolve `key` from the store alone: the newest matching repository.
pub async fn resolve_from_store(
    store: &dyn ChunkStore,
    key: &RepoKey,
    reason: FallbackReason,
) -> Resolution {
    match store.find_latest_repository(key).await {
        Ok(Some(repo_id)) => {
            tracing::info!(%key, repo_id, %reason, "found repository in store");
            Resolution::Resolved {
                repo_id,
                via: ResolvedVia::StoreFallback(reason),
            }
        }
        Ok(None) => {
            tracing::warn!(%key, %reason, "repository not found in store");
            Resolution::NotFound
        }
        Err(e) => Resolution::Fatal(e.context("repository lookup failed")),
    }
}

// ============ HTTP client ============

/// [`IngestionApi`] over HTTP: `POST {base_url}/api/rag/process-local`.
pub struct HttpIngestionClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpIngestionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/rag/process-local", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    cached: bool,
    data: ProcessData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessData {
    repo_id: RepoIdValue,
    #[serde(default)]
    chunks_count: Option<i64>,
}

/// Repository ids arrive as JSON numbers or numeric strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepoIdValue {
    Number(i64),
    Text(String),
}

impl RepoIdValue {
    fn into_id(self) -> Result<i64> {
        match self {
            RepoIdValue::Number(n) => Ok(n),
            RepoIdValue::Text(s) => s
                .trim()
                .parse()
                .with_context(|| format!("repoId is not an integer: '{}'", s)),
        }
    }
}

fn is_rate_limited(status: StatusCode, headers: &reqwest::header::HeaderMap) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::SERVICE_UNAVAILABLE
            && headers.contains_key(reqwest::header::RETRY_AFTER))
}

#[async_trait]
impl IngestionApi for HttpIngestionClient {
    async fn process(&self, key: &RepoKey) -> IngestOutcome {
        let response = match self.client.post(self.endpoint()).json(key).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return IngestOutcome::TimedOut,
            Err(e) => {
                return IngestOutcome::Failed(
                    anyhow::Error::new(e).context("ingestion request failed"),
                )
            }
        };

        let status = response.status();

        if is_rate_limited(status, response.headers()) {
            return IngestOutcome::Overloaded;
        }

        if status != StatusCode::OK {
            let body_text = response.text().await.unwrap_or_default();
            return IngestOutcome::Failed(anyhow::anyhow!(
                "ingestion API error {}: {}",
                status,
                body_text
            ));
        }

        let parsed: ProcessResponse = match response.json().await {
            Ok(p) => p,
            Err(e) if e.is_timeout() => return IngestOutcome::TimedOut,
            Err(e) => {
                return IngestOutcome::Failed(
                    anyhow::Error::new(e).context("invalid ingestion API response"),
                )
            }
        };

        match parsed.data.repo_id.into_id() {
            Ok(repo_id) => IngestOutcome::Processed {
                repo_id,
                cached: parsed.cached,
                chunks_count: parsed.data.chunks_count,
            },
            Err(e) => IngestOutcome::Failed(e),
        }
    }
}
