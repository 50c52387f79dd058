use crate::{ModelError, RetrievedChunk, SearchError, VectorRecord};
use async_trait::async_trait;

/// Storage half of the vector index: records in, nearest records out.
///
/// Implementations must be safe to share between an ingesting task and a
/// querying task. Records are upserted by id and never removed.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), SearchError>;

    /// At most `k` records, most similar first.
    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}
