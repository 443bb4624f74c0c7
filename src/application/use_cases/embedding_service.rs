use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{EmbeddingConfig, EmbeddingProvider};
use async_trait::async_trait;
#[cfg(feature = "local-embeddings")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
#[cfg(feature = "local-embeddings")]
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Texts per provider call; each call gets its own timeout.
const BATCH_SIZE: usize = 32;

/// Turns text into a fixed-length vector. The example store and the
/// similarity selector must share one implementation.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding backend chosen by `embedding.provider`: a fastembed model run
/// in-process, or an HTTP API (OpenAI `/embeddings`, Ollama `/api/embeddings`).
pub struct EmbeddingService {
    http: Client,
    config: EmbeddingConfig,
    #[cfg(feature = "local-embeddings")]
    local_model: Mutex<Option<TextEmbedding>>,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            #[cfg(feature = "local-embeddings")]
            local_model: Mutex::new(None),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn timed_out(&self) -> AppError {
        AppError::Timeout(format!(
            "Embedding call exceeded {}s",
            self.config.timeout_secs
        ))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.config.provider {
            EmbeddingProvider::Local => self.embed_local(texts),
            EmbeddingProvider::OpenAI => self.embed_openai(texts).await,
            EmbeddingProvider::Ollama => {
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    vectors.push(self.embed_ollama(text).await?);
                }
                Ok(vectors)
            }
        }
    }

    #[cfg(feature = "local-embeddings")]
    fn embed_local(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut slot = self
            .local_model
            .lock()
            .map_err(|_| AppError::Internal("Local embedding model lock poisoned".to_string()))?;
        if slot.is_none() {
            let model = match self.config.model.trim().to_lowercase().as_str() {
                "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
                _ => EmbeddingModel::AllMiniLML6V2,
            };
            let mut options = InitOptions::default();
            options.model_name = model;
            let loaded = TextEmbedding::try_new(options).map_err(|e| {
                AppError::Config(format!("Cannot load local embedding model '{}': {}", self.config.model, e))
            })?;
            *slot = Some(loaded);
        }
        let model = slot
            .as_mut()
            .ok_or_else(|| AppError::Internal("Local embedding model unavailable".to_string()))?;
        let vectors = model
            .embed(texts.to_vec(), None)
            .map_err(|e| AppError::Internal(format!("Local embedding failed: {}", e)))?;
        checked(vectors, texts.len())
    }

    #[cfg(not(feature = "local-embeddings"))]
    fn embed_local(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(AppError::Config(
            "Local embeddings require the `local-embeddings` feature".to_string(),
        ))
    }

    /// One request for the whole batch; results are reordered by `index`.
    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut request = self.http.post(&url).json(&OpenAIEmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let mut body: OpenAIEmbeddingResponse = read_json(request, &url).await?;
        body.data.sort_by_key(|item| item.index);
        checked(body.data.into_iter().map(|item| item.embedding).collect(), texts.len())
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", ollama_root(&self.config.base_url));
        let request = self.http.post(&url).json(&OllamaEmbeddingRequest {
            model: &self.config.model,
            prompt: text,
        });
        let body: OllamaEmbeddingResponse = read_json(request, &url).await?;
        let mut vectors = checked(vec![body.embedding], 1)?;
        Ok(vectors.remove(0))
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let embedded = tokio::time::timeout(self.deadline(), self.embed_many(chunk))
                .await
                .map_err(|_| self.timed_out())??;
            vectors.extend(embedded);
        }
        debug!(
            provider = ?self.config.provider,
            count = vectors.len(),
            dimension = vectors.first().map(Vec::len).unwrap_or(0),
            "Embedded texts"
        );
        Ok(vectors)
    }
}

async fn read_json<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| AppError::Internal(format!("Embedding request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(AppError::Internal(format!(
            "Embedding API at {} answered {}: {}",
            url, status, detail
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::ParseError(format!("Unreadable embedding response: {}", e)))
}

/// One non-empty vector per input text, or an error.
fn checked(vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(AppError::Internal(format!(
            "Expected {} embeddings, received {}",
            expected,
            vectors.len()
        )));
    }
    if vectors.iter().any(Vec::is_empty) {
        return Err(AppError::Internal("Empty embedding in response".to_string()));
    }
    Ok(vectors)
}

/// Ollama serves embeddings outside its OpenAI-compatible `/v1` prefix.
fn ollama_root(base_url: &str) -> &str {
    let trimmed = base_url.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed)
}

/// Cosine similarity in [-1, 1]. Mismatched or zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_ollama_root_strips_openai_prefix() {
        assert_eq!(ollama_root("http://localhost:11434/v1/"), "http://localhost:11434");
        assert_eq!(ollama_root("http://localhost:11434"), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_unreachable_provider_surfaces_error() {
        let service = EmbeddingService::new(EmbeddingConfig {
            provider: EmbeddingProvider::Ollama,
            base_url: "http://127.0.0.1:9".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            timeout_secs: 5,
        });
        let result = service.embed("How many customers?").await;
        assert!(matches!(
            result,
            Err(AppError::Internal(_)) | Err(AppError::Timeout(_))
        ));
    }

    #[test]
    fn test_checked_rejects_short_or_empty_batches() {
        assert!(checked(vec![vec![1.0]], 2).is_err());
        assert!(checked(vec![vec![1.0], vec![]], 2).is_err());
        assert_eq!(checked(vec![vec![0.5, 0.5]], 1).unwrap(), vec![vec![0.5, 0.5]]);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_provider() {
        let service = EmbeddingService::new(EmbeddingConfig {
            provider: EmbeddingProvider::OpenAI,
            base_url: "http://127.0.0.1:9".to_string(),
            ..EmbeddingConfig::default()
        });
        assert!(service.embed_batch(&[]).await.unwrap().is_empty());
    }
}
