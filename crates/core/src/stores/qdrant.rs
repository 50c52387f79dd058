use crate::traits::VectorIndex;
use crate::{ChunkMetadata, RetrievedChunk, SearchError, VectorRecord};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
    batch_size: usize,
}

/// Points per upsert request, keeping bodies under the server's limit.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 256;

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client: Client::builder().timeout(timeout).build()?,
            vector_size,
            batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn url(&self, path: &str) -> Result<Url, SearchError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{}", self.collection, path))?)
    }

    /// Creates the collection (cosine distance) unless it already exists with
    /// the configured vector size.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self.client.get(self.url("")?).send().await?;

        if response.status() == StatusCode::OK {
            let info: Value = response.json().await?;
            let existing = info
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .map(|size| size as usize);
            return match existing {
                Some(size) if size != self.vector_size => Err(SearchError::Request(format!(
                    "collection {} has vector size {} but embedder produces {}",
                    self.collection, size, self.vector_size
                ))),
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

/// Qdrant only accepts integers or UUIDs as point ids.
pub fn point_id(record_id: &str) -> Uuid {
    let digest = Sha256::digest(record_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

fn hit_from_value(hit: &Value) -> Result<RetrievedChunk, SearchError> {
    let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
    let id = payload
        .pointer("/chunk_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| hit.pointer("/id").map(|id| id.to_string()))
        .unwrap_or_default();
    let text = payload
        .pointer("/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = match payload.pointer("/metadata") {
        Some(value) => serde_json::from_value::<ChunkMetadata>(value.clone())?,
        None => ChunkMetadata::default(),
    };
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;

    Ok(RetrievedChunk {
        id,
        text,
        score,
        metadata,
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), SearchError> {
        let points = records
            .iter()
            .map(|record| {
                if record.vector.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        record.vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_id(&record.id).to_string(),
                    "vector": record.vector,
                    "payload": {
                        "chunk_id": record.id,
                        "text": record.text,
                        "metadata": record.metadata,
                    },
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let url = self.url("/points?wait=true")?;
        for batch in points.chunks(self.batch_size) {
            let response = self
                .client
                .put(url.clone())
                .json(&json!({ "points": batch }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(SearchError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: response.status().to_string(),
                });
            }
        }

        Ok(())
    }

    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().take(k).map(hit_from_value).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn count(&self) -> Result<usize, SearchError> {
        let response = self
            .client
            .post(self.url("/points/count")?)
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn point_ids_are_stable_uuids() {
        assert_eq!(point_id("chunk-1"), point_id("chunk-1"));
        assert_ne!(point_id("chunk-1"), point_id("chunk-2"));
    }

    #[test]
    fn collection_urls_are_joined_under_the_endpoint() {
        let store = QdrantStore::new("http://localhost:6333/", "doc_chunks", 128, Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            store.url("/points/search").unwrap().as_str(),
            "http://localhost:6333/collections/doc_chunks/points/search"
        );
    }

    #[test]
    fn search_hits_keep_original_chunk_ids_and_metadata() {
        let hit = json!({
            "id": "5c1b5b0e-0000-4000-8000-000000000000",
            "score": 0.75,
            "payload": {
                "chunk_id": "abc123",
                "text": "Cats are mammals.",
                "metadata": {
                    "source": "cats.pdf",
                    "document_id": null,
                    "chunk_index": 0,
                    "char_start": 0,
                    "char_end": 17
                }
            }
        });

        let chunk = hit_from_value(&hit).unwrap();
        assert_eq!(chunk.id, "abc123");
        assert_eq!(chunk.text, "Cats are mammals.");
        assert_eq!(chunk.metadata.source, "cats.pdf");
        assert!((chunk.score - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let result = QdrantStore::new("not a url", "doc_chunks", 128, Duration::from_secs(1));
        assert!(matches!(result, Err(SearchError::Url(_))));
    }

    #[test]
    fn upsert_batch_size_is_bounded_and_never_empty() {
        let store = QdrantStore::new("http://localhost:6333/", "doc_chunks", 128, Duration::from_secs(1))
            .unwrap();
        assert_eq!(store.batch_size, DEFAULT_UPSERT_BATCH_SIZE);
        assert_eq!(store.with_batch_size(0).batch_size, 1);
    }
}
