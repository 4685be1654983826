use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::config::{EmbeddingConfig, ServiceProvider};
use crate::error::{Error, Result};
use crate::providers::{http_client, send_for_body, trim_base_url};

/// Label used in errors raised by embedding providers.
pub(crate) const EMBEDDING_SERVICE: &str = "embedding";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A provider that turns text into a dense vector embedding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding for one non-empty text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The model identifier used by this provider (e.g. `nomic-embed-text`).
    fn model_name(&self) -> &str;

    /// Vector length this provider is pinned to, if known up front.
    fn dimensions(&self) -> Option<usize>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create the embedding provider described by `config`, wrapped in the
/// content-hash cache when it is enabled.
pub fn resolve_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let client = http_client(EMBEDDING_SERVICE, config.timeout_secs)?;
    let base_url = config.resolved_base_url();

    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ServiceProvider::Ollama => Arc::new(OllamaEmbeddingProvider::new(
            client,
            base_url,
            config.model.clone(),
            config.dimensions,
        )),
        ServiceProvider::Openai => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                Error::InvalidArgument("no OpenAI API key configured for embeddings".to_string())
            })?;
            Arc::new(OpenAiEmbeddingProvider::new(
                client,
                base_url,
                config.model.clone(),
                api_key,
                config.dimensions,
            ))
        }
    };

    if config.cache.enabled {
        Ok(Arc::new(CachedEmbeddingProvider::new(
            provider,
            config.cache.max_entries,
        )))
    } else {
        Ok(provider)
    }
}

fn require_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "cannot embed empty text".to_string(),
        ));
    }
    Ok(())
}

/// Reject vectors that cannot be ranked: empty, non-finite, or of the wrong
/// length.
fn check_vector(vector: Vec<f32>, expected: Option<usize>) -> Result<Vec<f32>> {
    if vector.is_empty() {
        return Err(Error::malformed(EMBEDDING_SERVICE, "embedding vector is empty"));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::malformed(
            EMBEDDING_SERVICE,
            "embedding vector contains non-finite values",
        ));
    }
    if let Some(dims) = expected {
        if vector.len() != dims {
            return Err(Error::malformed(
                EMBEDDING_SERVICE,
                format!("expected {dims} dimensions, got {}", vector.len()),
            ));
        }
    }
    Ok(vector)
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Calls the Ollama `/api/embeddings` endpoint.
pub struct OllamaEmbeddingProvider {
    base_url: String,
    model: String,
    dimensions: Option<usize>,
    client: Client,
}

impl OllamaEmbeddingProvider {
    pub fn new(client: Client, base_url: String, model: String, dimensions: Option<usize>) -> Self {
        Self {
            base_url,
            model,
            dimensions,
            client,
        }
    }

    fn embeddings_url(&self) -> String {
        let base = trim_base_url(&self.base_url);
        let base = base.strip_suffix("/v1").unwrap_or(&base);
        format!("{}/api/embeddings", base)
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        require_text(text)?;

        let body = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let request = self.client.post(self.embeddings_url()).json(&body);
        let raw = send_for_body(EMBEDDING_SERVICE, request).await?;

        let resp: OllamaEmbeddingResponse = serde_json::from_str(&raw)
            .map_err(|e| Error::malformed(EMBEDDING_SERVICE, e.to_string()))?;

        check_vector(resp.embedding, self.dimensions)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// Calls the OpenAI `/v1/embeddings` endpoint.
pub struct OpenAiEmbeddingProvider {
    api_key: String,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
    client: Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        client: Client,
        base_url: String,
        model: String,
        api_key: String,
        dimensions: Option<usize>,
    ) -> Self {
        Self {
            api_key,
            base_url,
            model,
            dimensions,
            client,
        }
    }
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        require_text(text)?;

        let body = OpenAiEmbeddingRequest {
            model: &self.model,
            input: [text],
        };

        let request = self
            .client
            .post(format!("{}/embeddings", trim_base_url(&self.base_url)))
            .bearer_auth(&self.api_key)
            .json(&body);
        let raw = send_for_body(EMBEDDING_SERVICE, request).await?;

        let resp: OpenAiEmbeddingResponse = serde_json::from_str(&raw)
            .map_err(|e| Error::malformed(EMBEDDING_SERVICE, e.to_string()))?;

        let vector = resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::malformed(EMBEDDING_SERVICE, "response has no data entries"))?;

        check_vector(vector, self.dimensions)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Memoizes another provider's vectors keyed by a hash of model and text.
///
/// Once `max_entries` is reached the cache is cleared wholesale; results are
/// identical to calling the inner provider every time.
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    entries: DashMap<String, Vec<f32>>,
    max_entries: usize,
}

impl CachedEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, max_entries: usize) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_name().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.cache_key(text);
        if let Some(hit) = self.entries.get(&key) {
            debug!(model = self.inner.model_name(), "embedding cache hit");
            return Ok(hit.value().clone());
        }

        let vector = self.inner.embed(text).await?;

        if self.entries.len() >= self.max_entries {
            self.entries.clear();
        }
        self.entries.insert(key, vector.clone());
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> Option<usize> {
        self.inner.dimensions()
    }
}
