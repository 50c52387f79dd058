use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Model id reported by [`CharacterNgramEmbedder`].
pub const LOCAL_NGRAM_MODEL: &str = "char-trigram-128";

pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Projects text into a fixed-dimension vector space.
///
/// One embedder instance is shared by indexing and querying; the same text
/// must always map to the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        LOCAL_NGRAM_MODEL
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_sync(text))
    }
}

/// Embeddings from an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

/// Inputs per embeddings request; providers cap the input array.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 256;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SearchError::Embedding {
                provider: "openai".to_string(),
                message: "api key must not be empty".to_string(),
            });
        }

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: OPENAI_EMBEDDINGS_URL.to_string(),
            api_key,
            model: model.into(),
            dimensions,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        debug!(model = %self.model, count = texts.len(), "requesting embeddings");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts.iter().map(String::as_str).collect(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Embedding {
                provider: "openai".to_string(),
                message: format!("{status}: {body}"),
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SearchError::Embedding {
            provider: "openai".to_string(),
            message: "response contained no embeddings".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.request_embeddings(batch).await?);
        }

        if vectors.len() != texts.len() {
            return Err(SearchError::Embedding {
                provider: "openai".to_string(),
                message: format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            });
        }
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimensions) {
            return Err(SearchError::Embedding {
                provider: "openai".to_string(),
                message: format!(
                    "embedding dimension {} != configured {}",
                    bad.len(),
                    self.dimensions
                ),
            });
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::{CharacterNgramEmbedder, Embedder, HttpEmbedder};
    use std::time::Duration;

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        let second = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn batch_matches_single_embeddings() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["cats".to_string(), "dogs".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], embedder.embed("dogs").await.unwrap());
    }

    #[test]
    fn http_embedder_requires_a_key() {
        let result = HttpEmbedder::new(" ", "text-embedding-3-small", 1536, Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[test]
    fn http_embedder_batches_are_bounded_and_never_empty() {
        let embedder = HttpEmbedder::new("key", "text-embedding-3-small", 1536, Duration::from_secs(5))
            .unwrap();
        assert_eq!(embedder.batch_size, super::DEFAULT_EMBEDDING_BATCH_SIZE);
        assert_eq!(embedder.with_batch_size(0).batch_size, 1);
    }
}
