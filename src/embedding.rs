//! Embedding provider implementations.
//!
//! Concrete [`EmbeddingProvider`]s selected by `[embedding] provider`:
//! - **`disabled`**: no provider; the index is term-only.
//! - **`hashing`**: [`HashingEmbedder`] from the core crate, offline and deterministic.
//! - **`openai`**: [`OpenAIProvider`], `POST /v1/embeddings` with batching and retry.
//! - **`ollama`**: [`OllamaProvider`], a local Ollama instance's `/api/embed` endpoint.
//!
//! # Retry Strategy
//!
//! Remote providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;

use jedai_core::embedding::{EmbeddingProvider, HashingEmbedder};
use jedai_core::error::{CoreError, Result};

use crate::config::EmbeddingConfig;

/// Build the configured provider, or `None` when embeddings are disabled.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Option<Arc<dyn EmbeddingProvider>>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "hashing" => Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(HashingEmbedder::DEFAULT_DIMS),
        )),
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(Some(provider))
}

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// What one HTTP attempt produced.
enum Attempt {
    Done(serde_json::Value),
    Retry(String),
}

/// Run `send` up to `max_retries + 1` times with exponential backoff.
async fn with_retries<F, Fut>(label: &str, max_retries: u32, mut send: F) -> Result<serde_json::Value>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Attempt>>,
{
    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }
        match send().await? {
            Attempt::Done(json) => return Ok(json),
            Attempt::Retry(reason) => last_err = Some(reason),
        }
    }
    Err(CoreError::Embedding(format!(
        "{} failed after {} attempts: {}",
        label,
        max_retries + 1,
        last_err.unwrap_or_default()
    )))
}

async fn post_json(request: reqwest::RequestBuilder, label: &str) -> Result<Attempt> {
    match request.send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                let json = response
                    .json()
                    .await
                    .map_err(|e| CoreError::Embedding(format!("{} response: {}", label, e)))?;
                return Ok(Attempt::Done(json));
            }
            let body_text = response.text().await.unwrap_or_default();
            // Rate limited or server error: retry
            if status.as_u16() == 429 || status.is_server_error() {
                return Ok(Attempt::Retry(format!("{} API error {}: {}", label, status, body_text)));
            }
            Err(CoreError::Embedding(format!(
                "{} API error {}: {}",
                label, status, body_text
            )))
        }
        Err(e) => Ok(Attempt::Retry(format!("{} connection error: {}", label, e))),
    }
}

fn parse_vectors(items: &[serde_json::Value], field: Option<&str>) -> Result<Vec<Vec<f32>>> {
    items
        .iter()
        .map(|item| {
            let values = match field {
                Some(f) => item.get(f),
                None => Some(item),
            }
            .and_then(|v| v.as_array())
            .ok_or_else(|| CoreError::Embedding("response is missing an embedding array".into()))?;
            values
                .iter()
                .map(|v| {
                    v.as_f64().map(|x| x as f32).ok_or_else(|| {
                        CoreError::Embedding(format!("non-numeric value in embedding: {}", v))
                    })
                })
                .collect()
        })
        .collect()
}

fn check_dims(vectors: &[Vec<f32>], dims: usize, model: &str) -> Result<()> {
    match vectors.iter().find(|v| v.len() != dims) {
        Some(bad) => Err(CoreError::Embedding(format!(
            "{} returned {} dims, expected {}",
            model,
            bad.len(),
            dims
        ))),
        None => Ok(()),
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
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

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = with_retries("OpenAI", self.max_retries, || {
            let request = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body);
            post_json(request, "OpenAI")
        })
        .await?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| CoreError::Embedding("Invalid OpenAI response: missing data array".into()))?;
        let vectors = parse_vectors(data, Some("embedding"))?;
        check_dims(&vectors, self.dims, &self.model)?;
        Ok(vectors)
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
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

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);
        let json = with_retries("Ollama", self.max_retries, || {
            let request = self.client.post(&endpoint).json(&body);
            post_json(request, "Ollama")
        })
        .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                CoreError::Embedding("Invalid Ollama response: missing embeddings array".into())
            })?;
        let vectors = parse_vectors(embeddings, None)?;
        check_dims(&vectors, self.dims, &self.model)?;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_provider_is_none() {
        assert!(create_provider(&EmbeddingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn hashing_provider_uses_configured_dims() {
        let config = EmbeddingConfig {
            provider: "hashing".into(),
            dims: Some(48),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap().unwrap();
        assert_eq!(provider.model_name(), "hashing");
        assert_eq!(provider.dims(), 48);
    }

    #[test]
    fn parses_openai_and_ollama_shapes() {
        let openai = serde_json::json!([{"embedding": [0.5, 1.0]}, {"embedding": [0.0, -1.0]}]);
        let vectors = parse_vectors(openai.as_array().unwrap(), Some("embedding")).unwrap();
        assert_eq!(vectors, vec![vec![0.5, 1.0], vec![0.0, -1.0]]);

        let ollama = serde_json::json!([[1.0, 2.0, 3.0]]);
        let vectors = parse_vectors(ollama.as_array().unwrap(), None).unwrap();
        assert_eq!(vectors[0].len(), 3);
        assert!(check_dims(&vectors, 4, "m").is_err());
    }

    #[test]
    fn malformed_response_is_an_embedding_error() {
        let bad = serde_json::json!([{"vector": [1.0]}]);
        let err = parse_vectors(bad.as_array().unwrap(), Some("embedding")).unwrap_err();
        assert!(matches!(err, CoreError::Embedding(_)));
    }

    #[test]
    fn non_numeric_component_is_rejected() {
        let bad = serde_json::json!([{"embedding": [0.5, "oops", null]}]);
        let err = parse_vectors(bad.as_array().unwrap(), Some("embedding")).unwrap_err();
        match err {
            CoreError::Embedding(msg) => assert!(msg.contains("non-numeric"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }

        let good = serde_json::json!([[0.5, -1]]);
        assert_eq!(
            parse_vectors(good.as_array().unwrap(), None).unwrap(),
            vec![vec![0.5_f32, -1.0]]
        );
    }
}
