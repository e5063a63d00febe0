//! Embedding model adapters.
//!
//! Defines the [`Encoder`] trait and its implementations:
//! - **[`LocalEncoder`]** - runs a sentence-embedding model in process via
//!   fastembed. The model is loaded once in [`LocalEncoder::new`] and reused
//!   for every call.
//! - **[`OllamaEncoder`]** - calls a local Ollama instance's `/api/embed`
//!   endpoint.
//!
//! Encoders take the whole batch in one call and return one vector per
//! input, in input order. There is no retry at this layer: a failed encode
//! fails the run, and re-running the pipeline is the retry.
//!
//! Use [`create_encoder`] to build the encoder named in the configuration.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// A text-embedding model.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding dimensionality, or `None` when it is only
    /// known once the model has answered.
    fn dims(&self) -> Option<usize>;

    /// Embed `texts`, returning one vector per text in the same order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Encode `texts` and verify the result shape.
///
/// Fails unless exactly one vector per input comes back and every vector
/// has the same, non-zero length. That length must equal `encoder.dims()`
/// when the encoder declares one.
pub async fn encode_batch(encoder: &dyn Encoder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = encoder.encode(texts).await?;

    if vectors.len() != texts.len() {
        bail!(
            "{} returned {} embeddings for {} texts",
            encoder.model_name(),
            vectors.len(),
            texts.len()
        );
    }

    let expected = match encoder.dims() {
        Some(dims) => dims,
        None => vectors[0].len(),
    };
    if expected == 0 {
        bail!("{} returned an empty embedding", encoder.model_name());
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected) {
        bail!(
            "{} returned a {}-dimensional embedding at position {}, expected {}",
            encoder.model_name(),
            v.len(),
            i,
            expected
        );
    }

    Ok(vectors)
}

/// Default model when `embedding.model` is not set.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

fn known_dims(model: &str) -> Option<usize> {
    match model {
        "all-minilm-l6-v2" | "all-minilm" => Some(384),
        "bge-small-en-v1.5" => Some(384),
        "bge-base-en-v1.5" => Some(768),
        "bge-large-en-v1.5" => Some(1024),
        "nomic-embed-text" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => Some(768),
        _ => None,
    }
}

// ============ Local (fastembed) ============

/// In-process encoder backed by fastembed.
///
/// Model files are downloaded from Hugging Face on first use and cached;
/// later runs work offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEncoder {
    model_name: String,
    dims: Option<usize>,
    batch_size: usize,
    model: std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let dims = config.dims.or_else(|| known_dims(&model_name));

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(config_to_fastembed_model(&model_name)?)
                .with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: std::sync::Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Encoder for LocalEncoder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

// ============ Ollama ============

/// Encoder that calls `POST {url}/api/embed` on an Ollama instance.
pub struct OllamaEncoder {
    model: String,
    dims: Option<usize>,
    url: String,
    client: reqwest::Client,
}

impl OllamaEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config.dims.or_else(|| known_dims(&model));
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            client,
        })
    }
}

#[async_trait]
impl Encoder for OllamaEncoder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: non-numeric value"))
            })
            .collect::<Result<Vec<f32>>>()?;
        result.push(vec);
    }

    Ok(result)
}

/// Create the [`Encoder`] named by `config.provider`.
///
/// | Config Value | Encoder |
/// |-------------|---------|
/// | `"local"` | [`LocalEncoder`] (requires `local-embeddings-fastembed`) |
/// | `"ollama"` | [`OllamaEncoder`] |
pub fn create_encoder(config: &EmbeddingConfig) -> Result<Box<dyn Encoder>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalEncoder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        "ollama" => Ok(Box::new(OllamaEncoder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
