//! Configuration loading.
//!
//! Settings come from an optional TOML file, then environment variables
//! override individual fields:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `DATABASE_URL` | `db.url` | (required) |
//! | `BACKEND_URL` | `ingest.backend_url` | `http://localhost:5002` |
//! | `INGEST_TIMEOUT_SECS` | `ingest.timeout_secs` | `300` |
//! | `EMBEDDING_PROVIDER` | `embedding.provider` | `local` |
//! | `EMBEDDING_MODEL` | `embedding.model` | `all-minilm-l6-v2` |
//!
//! ```toml
//! [db]
//! url = "postgres://localhost/codelearner"
//!
//! [ingest]
//! backend_url = "http://localhost:5002"
//! timeout_secs = 300
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_ingest_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            timeout_secs: default_ingest_timeout_secs(),
        }
    }
}

impl IngestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_backend_url() -> String {
    "http://localhost:5002".to_string()
}
fn default_ingest_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    /// Inner batch size handed to the local model. The pipeline still
    /// submits all texts in a single encode call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    256
}
fn default_timeout_secs() -> u64 {
    600
}

impl Config {
    /// Override file settings from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Override file settings from an arbitrary variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.db.url = url;
        }
        if let Some(url) = lookup("BACKEND_URL") {
            self.ingest.backend_url = url;
        }
        if let Some(secs) = lookup("INGEST_TIMEOUT_SECS") {
            self.ingest.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("INGEST_TIMEOUT_SECS is not a number: '{}'", secs))?;
        }
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = Some(model);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.db.url.is_empty() {
            bail!("Database URL not configured. Set DATABASE_URL or [db] url in the config file.");
        }
        if self.db.max_connections == 0 {
            bail!("db.max_connections must be > 0");
        }
        if self.ingest.backend_url.is_empty() {
            bail!("ingest.backend_url must not be empty");
        }
        if self.ingest.timeout_secs == 0 {
            bail!("ingest.timeout_secs must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        match self.embedding.provider.as_str() {
            "local" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local or ollama.",
                other
            ),
        }

        if self.embedding.provider == "ollama" && self.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'ollama'");
        }

        Ok(())
    }
}

/// Load configuration from `path` (if it exists), apply environment
/// overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = read_config_file(path)?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content).with_context(|| "Failed to parse config file")
}
