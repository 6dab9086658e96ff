//! Embedding collaborator: the [`Embedder`] capability and its backends.
//!
//! Every backend exposes two explicit operations, [`Embedder::embed_many`]
//! for document batches and [`Embedder::embed_one`] for queries, and
//! declares its vector dimensionality up front from configuration.
//!
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIEmbedder`]**: the OpenAI embeddings API.
//! - **`LocalEmbedder`**: in-process fastembed models (feature
//!   `local-embeddings-fastembed`).
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use fusion_rag::config::EmbeddingConfig;
//! # use fusion_rag::embedding::create_embedder;
//! let config = EmbeddingConfig {
//!     provider: "ollama".to_string(),
//!     model: Some("mxbai-embed-large".to_string()),
//!     dims: Some(1024),
//!     url: None,
//!     batch_size: 64,
//!     max_retries: 5,
//!     timeout_secs: 30,
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 1024);
//! ```

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, RagResult};
use crate::http;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

/// Turns text into fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input text, in input
/// order, each of length [`dims`](Embedder::dims). The vector store checks
/// the dimension on every call and treats a mismatch as a configuration
/// error.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"mxbai-embed-large"`).
    fn model_name(&self) -> &str;

    /// Returns the declared vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of document texts in one logical call.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_many(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> RagResult<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RagError::config(
            "local embedding provider requires --features local-embeddings-fastembed",
        )),
        other => Err(RagError::config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

fn required_model(config: &EmbeddingConfig) -> RagResult<String> {
    config.model.clone().ok_or_else(|| {
        RagError::config(format!(
            "embedding.model required for {} provider",
            config.provider
        ))
    })
}

fn required_dims(config: &EmbeddingConfig) -> RagResult<usize> {
    match config.dims {
        Some(d) if d > 0 => Ok(d),
        _ => Err(RagError::config(format!(
            "embedding.dims required for {} provider",
            config.provider
        ))),
    }
}

fn check_batch(expected: usize, got: &[Vec<f32>], service: &str) -> Result<()> {
    if got.len() != expected {
        bail!(
            "{} returned {} embeddings for {} inputs",
            service,
            got.len(),
            expected
        );
    }
    Ok(())
}

/// A JSON array of numbers as a vector. Any non-numeric component fails
/// the whole vector.
fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("embedding is not an array"))?;
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| anyhow::anyhow!("embedding component {} is not a number: {}", i, v))
        })
        .collect()
}

// ============ Ollama ============

/// Embeddings from a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires the model to be pulled
/// (e.g. `ollama pull mxbai-embed-large`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> RagResult<Self> {
        let client = http::build_client(Duration::from_secs(config.timeout_secs))
            .map_err(|e| RagError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            model: required_model(config)?,
            dims: required_dims(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::post_json_with_retry(
                &self.client,
                &endpoint,
                None,
                &body,
                self.max_retries,
                "Ollama",
            )
            .await?;
            let vectors = parse_ollama_response(&json)?;
            check_batch(batch.len(), &vectors, "Ollama")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| parse_vector(e).map_err(|err| anyhow::anyhow!("Invalid Ollama response: {}", err)))
        .collect()
}

// ============ OpenAI ============

/// Embeddings from the OpenAI API (`POST /v1/embeddings`).
///
/// The API key is read from `OPENAI_API_KEY` once, at construction.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> RagResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::config("OPENAI_API_KEY environment variable not set"))?;
        let client = http::build_client(Duration::from_secs(config.timeout_secs))
            .map_err(|e| RagError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model: required_model(config)?,
            dims: required_dims(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::post_json_with_retry(
                &self.client,
                &endpoint,
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI",
            )
            .await?;
            let vectors = parse_openai_response(&json)?;
            check_batch(batch.len(), &vectors, "OpenAI")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vec = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))
            .and_then(|e| {
                parse_vector(e).map_err(|err| anyhow::anyhow!("Invalid OpenAI response: {}", err))
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
