use crate::traits::VectorIndex;
use crate::{RetrievedChunk, SearchError, VectorRecord};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local index guarded by a `RwLock`: writers are serialized,
/// readers see either all or none of an upsert batch.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), SearchError> {
        let mut store = self.records.write().await;
        let expected = store
            .values()
            .next()
            .or_else(|| records.first())
            .map(|record| record.vector.len());
        if let Some(dim) = expected {
            if let Some(record) = records.iter().find(|record| record.vector.len() != dim) {
                return Err(SearchError::Request(format!(
                    "vector dim {} for {} is not {dim}",
                    record.vector.len(),
                    record.id
                )));
            }
        }

        for record in records {
            store.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let store = self.records.read().await;
        if let Some(record) = store.values().find(|record| record.vector.len() != query_vector.len()) {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                record.vector.len()
            )));
        }

        let mut scored: Vec<RetrievedChunk> = store
            .values()
            .map(|record| RetrievedChunk {
                id: record.id.clone(),
                text: record.text.clone(),
                score: cosine_similarity(&record.vector, query_vector),
                metadata: record.metadata.clone(),
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .score
                .partial_cmp(&left.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.id.cmp(&right.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.records.read().await.len())
    }
}
