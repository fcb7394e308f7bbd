//! Embedding provider implementations.
//!
//! The [`EmbeddingProvider`] trait lives in `travel-guide-core`; this
//! module supplies the concrete backends:
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`CohereProvider`]**: `POST /v2/embed`, distinguishing document and query inputs.
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings` on OpenAI or any compatible gateway.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashingProvider`]**: deterministic feature hashing, no network.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use travel_guide::config::EmbeddingConfig;
//! # use travel_guide::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! Providers make exactly one request per call. [`embed_documents_with_retry`]
//! and [`embed_query_with_retry`] wrap them in the configured
//! [`RetryPolicy`]: HTTP 429 is retried with linear backoff, anything else
//! fails immediately.

mod hashing;

pub use hashing::{HashingProvider, DEFAULT_HASHING_DIMS, HASHING_MODEL};

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub use travel_guide_core::embedding::EmbeddingProvider;
use travel_guide_core::retry::{retry_with_backoff, ProviderError, RetryPolicy};

use crate::config::EmbeddingConfig;
use crate::http::{self, json_to_vec};

/// Build the provider named by `config.provider`.
///
/// # Errors
///
/// Fails for an unknown provider name, a missing `model`/`dims` on a
/// remote provider, or a missing API key.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "cohere" => Ok(Arc::new(CohereProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "hashing" => Ok(Arc::new(HashingProvider::from_config(config))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a batch of corpus chunks, retrying on rate limits.
pub async fn embed_documents_with_retry(
    provider: &dyn EmbeddingProvider,
    policy: &RetryPolicy,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, ProviderError> {
    retry_with_backoff(policy, tokio::time::sleep, move |attempt| async move {
        let result = provider.embed_documents(texts).await;
        if let Err(ProviderError::RateLimited(msg)) = &result {
            warn!(attempt, batch = texts.len(), "embedding batch rate limited: {}", msg);
        }
        result
    })
    .await
}

/// Embed a search query, retrying on rate limits.
pub async fn embed_query_with_retry(
    provider: &dyn EmbeddingProvider,
    policy: &RetryPolicy,
    text: &str,
) -> Result<Vec<f32>, ProviderError> {
    retry_with_backoff(policy, tokio::time::sleep, move |attempt| async move {
        let result = provider.embed_query(text).await;
        if let Err(ProviderError::RateLimited(msg)) = &result {
            warn!(attempt, "query embedding rate limited: {}", msg);
        }
        result
    })
    .await
}

fn require_model(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn check_batch(label: &str, expected: usize, got: &[Vec<f32>]) -> Result<(), ProviderError> {
    if got.len() != expected {
        return Err(ProviderError::Failed(format!(
            "{} returned {} embeddings for {} inputs",
            label,
            got.len(),
            expected
        )));
    }
    Ok(())
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Failed(
            "Embedding provider is disabled; set [embedding] provider in the config".to_string(),
        ))
    }
}

// ============ Cohere Provider ============

const COHERE_URL: &str = "https://api.cohere.com";

/// Embedding provider using the Cohere v2 embed API.
///
/// Requires the `COHERE_API_KEY` environment variable. Chunks are sent
/// with `input_type = "search_document"` and queries with
/// `input_type = "search_query"`, as Cohere's v3 models expect.
pub struct CohereProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl CohereProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = require_model(config, "Cohere")?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| COHERE_URL.to_string()),
            api_key: http::api_key("COHERE_API_KEY")?,
            model,
            dims,
        })
    }

    async fn embed(&self, texts: &[String], input_type: &str) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "texts": texts,
            "input_type": input_type,
            "embedding_types": ["float"],
        });

        let request = self
            .client
            .post(format!("{}/v2/embed", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = http::post_json(request, "Cohere").await?;
        let embeddings = parse_cohere_response(&json)?;
        check_batch("Cohere", texts.len(), &embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for CohereProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.embed(texts, "search_document").await
    }
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed(&[text.to_string()], "search_query")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Failed("Empty Cohere embedding response".to_string()))
    }
}

/// Extract `embeddings.float[]` from a Cohere v2 embed response.
fn parse_cohere_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.get("float"))
        .and_then(|f| f.as_array())
        .ok_or_else(|| {
            ProviderError::Failed("Invalid Cohere response: missing embeddings.float".to_string())
        })?
        .iter()
        .map(|e| json_to_vec(e, "Cohere"))
        .collect()
}

// ============ OpenAI Provider ============

const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Embedding provider using the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `embedding.url`
/// points it at any OpenAI-compatible gateway.
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = require_model(config, "OpenAI")?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: http::api_key("OPENAI_API_KEY")?,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = http::post_json(request, "OpenAI").await?;
        let embeddings = parse_openai_response(&json)?;
        check_batch("OpenAI", texts.len(), &embeddings)?;
        Ok(embeddings)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::Failed("Invalid OpenAI response: missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item.get("embedding").ok_or_else(|| {
            ProviderError::Failed("Invalid OpenAI response: missing embedding".to_string())
        })?;
        indexed.push((index, json_to_vec(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

const OLLAMA_URL: &str = "http://localhost:11434";

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = require_model(config, "Ollama")?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);

        let json = http::post_json(request, "Ollama").await.map_err(|e| match e {
            ProviderError::Failed(msg) => ProviderError::Failed(format!(
                "{} (is Ollama running at {}?)",
                msg, self.url
            )),
            throttled => throttled,
        })?;
        let embeddings = parse_ollama_response(&json)?;
        check_batch("Ollama", texts.len(), &embeddings)?;
        Ok(embeddings)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            ProviderError::Failed("Invalid Ollama response: missing embeddings array".to_string())
        })?
        .iter()
        .map(|e| json_to_vec(e, "Ollama"))
        .collect()
}
