//! Concrete embedding providers.
//!
//! Every provider implements the core
//! [`EmbeddingProvider`](knowledge_harness_core::embedding::EmbeddingProvider)
//! trait:
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`OpenAiCompatibleProvider`]**: OpenAI or OpenRouter `/embeddings` with batching, retry and backoff.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`HashEmbedder`**: deterministic offline feature hashing (from the core crate).
//! - **`LocalProvider`**: fastembed ONNX models, behind `local-embeddings-fastembed`.
//!
//! # Retry Strategy
//!
//! Network providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::warn;

use knowledge_harness_core::embedding::{EmbeddingProvider, HashEmbedder};
use knowledge_harness_core::error::KbError;

use crate::config::EmbeddingConfig;

type EmbedResult<T> = std::result::Result<T, KbError>;

/// Known output sizes, used when `embedding.dims` is omitted.
pub fn known_model_dims(model: &str) -> Option<usize> {
    let name = model.rsplit('/').next().unwrap_or(model);
    match name {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" => Some(1024),
        "all-minilm" => Some(384),
        _ => None,
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        Err(KbError::EmbeddingBackend(
            "embedding provider is disabled; set [embedding] provider in the config".to_string(),
        ))
    }
}

// ============ Shared HTTP retry loop ============

struct HttpBackend {
    client: reqwest::Client,
    max_retries: u32,
    label: &'static str,
}

impl HttpBackend {
    fn new(config: &EmbeddingConfig, label: &'static str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            label,
        })
    }

    /// POST `body` to `url`, retrying 429/5xx/transport errors with backoff.
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> EmbedResult<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(key) = bearer {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            KbError::EmbeddingBackend(format!("{} response: {}", self.label, e))
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message = format!("{} API error {}: {}", self.label, status, body_text);

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, "{}", message);
                        last_err = Some(message);
                        continue;
                    }

                    // Client error other than 429: fail fast
                    return Err(KbError::EmbeddingBackend(message));
                }
                Err(e) => {
                    let message = format!("{} connection error ({}): {}", self.label, url, e);
                    warn!(attempt, "{}", message);
                    last_err = Some(message);
                    continue;
                }
            }
        }

        Err(KbError::EmbeddingBackend(last_err.unwrap_or_else(|| {
            format!("{} embedding failed after retries", self.label)
        })))
    }
}

/// Read a JSON array of numbers as a vector. Any non-numeric component is
/// an invalid response.
fn as_vector(value: &serde_json::Value) -> EmbedResult<Vec<f32>> {
    let arr = value.as_array().ok_or_else(|| {
        KbError::EmbeddingBackend("invalid response: embedding is not an array".to_string())
    })?;
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().map(|x| x as f32).ok_or_else(|| {
                KbError::EmbeddingBackend(format!(
                    "invalid response: embedding component {} is not a number",
                    i
                ))
            })
        })
        .collect()
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for OpenAI-compatible `/embeddings` APIs (OpenAI,
/// OpenRouter).
///
/// The API key comes from the environment (`OPENAI_API_KEY` or
/// `OPENROUTER_API_KEY`), never from the config file.
pub struct OpenAiCompatibleProvider {
    http: HttpBackend,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (label, key_var, default_url) = match config.provider.as_str() {
            "openrouter" => ("OpenRouter", "OPENROUTER_API_KEY", "https://openrouter.ai/api/v1"),
            _ => ("OpenAI", "OPENAI_API_KEY", "https://api.openai.com/v1"),
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", label))?;
        let dims = config
            .resolved_dims()
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", label))?;

        // Verify API key is available
        let api_key = match std::env::var(key_var) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", key_var),
        };

        let url = config
            .url
            .clone()
            .unwrap_or_else(|| default_url.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: HttpBackend::new(config, label)?,
            url,
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post_json(&format!("{}/embeddings", self.url), Some(&self.api_key), &body)
            .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding` arrays, ordered by `index`.
fn parse_openai_response(json: &serde_json::Value) -> EmbedResult<Vec<Vec<f32>>> {
    let invalid = |what: &str| KbError::EmbeddingBackend(format!("invalid response: {}", what));
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| invalid("missing embedding"))
            .and_then(as_vector)?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, embedding));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`).
pub struct OllamaProvider {
    http: HttpBackend,
    model: String,
    dims: usize,
    url: String,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .resolved_dims()
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: HttpBackend::new(config, "Ollama")?,
            model,
            dims,
            url,
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
    async fn embed(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post_json(&format!("{}/api/embed", self.url), None, &body)
            .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> EmbedResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            KbError::EmbeddingBackend("invalid Ollama response: missing embeddings array".to_string())
        })?;

    embeddings.iter().map(as_vector).collect()
}

// ============ Local Provider (fastembed) ============

/// Embedding provider running fastembed ONNX models in-process.
///
/// Models are downloaded on first use from Hugging Face and cached.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
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
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let model = config_to_fastembed_model(&self.model_name)
            .map_err(|e| KbError::EmbeddingBackend(e.to_string()))?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(true),
            )
            .map_err(|e| {
                KbError::EmbeddingBackend(format!("failed to initialize local model: {}", e))
            })?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| KbError::EmbeddingBackend(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| KbError::EmbeddingBackend(e.to_string()))?
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"`, `"openrouter"` | [`OpenAiCompatibleProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"hash"` | `HashEmbedder` |
/// | `"local"` | `LocalProvider` (feature `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" | "openrouter" => Ok(Arc::new(OpenAiCompatibleProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hash provider"))?;
            Ok(Arc::new(HashEmbedder::new(dims)?))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_known_dims() {
        assert_eq!(known_model_dims("text-embedding-3-small"), Some(1536));
        assert_eq!(known_model_dims("openai/text-embedding-3-large"), Some(3072));
        assert_eq!(known_model_dims("nomic-embed-text"), Some(768));
        assert_eq!(known_model_dims("mystery"), None);
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.5]]);
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": [1]})).is_err());
    }

    #[test]
    fn test_non_numeric_component_is_rejected() {
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [0.1, "x", null]}]});
        match parse_openai_response(&json) {
            Err(KbError::EmbeddingBackend(msg)) => assert!(msg.contains("component 1")),
            other => panic!("expected EmbeddingBackend, got {:?}", other),
        }

        let json = serde_json::json!({"embeddings": [[0.5, null]]});
        assert!(matches!(
            parse_ollama_response(&json),
            Err(KbError::EmbeddingBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = create_provider(&config("disabled")).unwrap();
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, KbError::EmbeddingBackend(_)));
    }

    #[tokio::test]
    async fn test_hash_provider_from_config() {
        let mut cfg = config("hash");
        cfg.dims = Some(16);
        let provider = create_provider(&cfg).unwrap();
        assert_eq!(provider.dims(), 16);
        let vectors = provider.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 16);
    }

    async fn flaky(State(calls): State<Arc<AtomicUsize>>) -> (StatusCode, Json<serde_json::Value>) {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})))
        } else {
            (
                StatusCode::OK,
                Json(serde_json::json!({"embeddings": [[1.0, 2.0, 3.0]]})),
            )
        }
    }

    async fn rejecting(State(calls): State<Arc<AtomicUsize>>) -> StatusCode {
        calls.fetch_add(1, Ordering::SeqCst);
        StatusCode::BAD_REQUEST
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = serve(
            Router::new()
                .route("/api/embed", post(flaky))
                .with_state(calls.clone()),
        )
        .await;

        let mut cfg = config("ollama");
        cfg.model = Some("nomic-embed-text".to_string());
        cfg.url = Some(url);
        cfg.max_retries = 2;
        let provider = OllamaProvider::new(&cfg).unwrap();
        let vectors = provider.embed(&["x".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0, 3.0]]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = serve(
            Router::new()
                .route("/api/embed", post(rejecting))
                .with_state(calls.clone()),
        )
        .await;

        let mut cfg = config("ollama");
        cfg.model = Some("nomic-embed-text".to_string());
        cfg.url = Some(url);
        cfg.max_retries = 3;
        let provider = OllamaProvider::new(&cfg).unwrap();
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, KbError::EmbeddingBackend(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
