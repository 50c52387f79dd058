use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{ChunkMetadata, RetrievedChunk, SearchError, VectorRecord};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Embeds chunks into a vector store and answers nearest-chunk queries.
///
/// The embedder is held here and used for both directions, so indexed
/// vectors and query vectors always come from the same model.
#[derive(Clone)]
pub struct ChunkIndex {
    store: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

/// Chunks embedded and upserted per round trip.
pub const DEFAULT_INDEX_BATCH_SIZE: usize = 256;

impl ChunkIndex {
    pub fn new(store: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            batch_size: DEFAULT_INDEX_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_id()
    }

    pub async fn len(&self) -> Result<usize, SearchError> {
        self.store.count().await
    }

    pub async fn is_empty(&self) -> Result<bool, SearchError> {
        Ok(self.len().await? == 0)
    }

    /// Indexes `chunks` and returns the ids they were stored under.
    ///
    /// Without `ids`, each chunk gets a content hash of its source, position
    /// and text, so chunks of different documents do not collide. Without
    /// `metadata`, every chunk is tagged with the default source.
    pub async fn add_chunks(
        &self,
        chunks: &[String],
        ids: Option<Vec<String>>,
        metadata: Option<Vec<ChunkMetadata>>,
    ) -> Result<Vec<String>, SearchError> {
        let metadata = match metadata {
            Some(metadata) if metadata.len() != chunks.len() => {
                return Err(SearchError::Request(format!(
                    "metadata count {} doesn't match chunk count {}",
                    metadata.len(),
                    chunks.len()
                )))
            }
            Some(metadata) => metadata,
            None => vec![ChunkMetadata::default(); chunks.len()],
        };

        let ids = match ids {
            Some(ids) if ids.len() != chunks.len() => {
                return Err(SearchError::Request(format!(
                    "id count {} doesn't match chunk count {}",
                    ids.len(),
                    chunks.len()
                )))
            }
            Some(ids) => ids,
            None => chunks
                .iter()
                .zip(metadata.iter())
                .enumerate()
                .map(|(position, (text, meta))| make_chunk_id(&meta.source, position, text))
                .collect(),
        };

        let mut seen = HashSet::new();
        if let Some(duplicate) = ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(SearchError::Request(format!(
                "chunk id {duplicate} appears more than once in one batch"
            )));
        }

        if chunks.is_empty() {
            return Ok(ids);
        }

        // Batches already stored stay stored if a later one fails; ids are
        // deterministic, so a retry overwrites them.
        let mut metadata = metadata;
        for (batch_ids, batch_texts) in ids
            .chunks(self.batch_size)
            .zip(chunks.chunks(self.batch_size))
        {
            let vectors = self.embedder.embed_batch(batch_texts).await?;
            if vectors.len() != batch_texts.len() {
                return Err(SearchError::Request(format!(
                    "embedding count {} doesn't match chunk count {}",
                    vectors.len(),
                    batch_texts.len()
                )));
            }

            let records = batch_ids
                .iter()
                .zip(vectors)
                .zip(batch_texts.iter().zip(metadata.drain(..batch_texts.len())))
                .map(|((id, vector), (text, metadata))| VectorRecord {
                    id: id.clone(),
                    vector,
                    text: text.clone(),
                    metadata,
                })
                .collect();

            self.store.upsert(records).await?;
        }

        info!(
            chunk_count = chunks.len(),
            model = self.embedder.model_id(),
            "indexed chunks"
        );

        Ok(ids)
    }

    /// At most `k` chunks, most similar to `query` first. A blank query
    /// returns nothing without touching the embedder.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        let mut hits = self.store.nearest(&query_vector, k).await?;
        hits.truncate(k);
        Ok(hits)
    }

    pub async fn search_texts(&self, query: &str, k: usize) -> Result<Vec<String>, SearchError> {
        Ok(self
            .search(query, k)
            .await?
            .into_iter()
            .map(|hit| hit.text)
            .collect())
    }
}

pub fn make_chunk_id(source: &str, position: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update((position as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CharacterNgramEmbedder, InMemoryVectorIndex};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct BatchRecordingEmbedder {
        inner: CharacterNgramEmbedder,
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for BatchRecordingEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        fn model_id(&self) -> &str {
            "batch-recording"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
            Ok(self.inner.embed_sync(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            self.batch_sizes.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|text| self.inner.embed_sync(text)).collect())
        }
    }

    fn index() -> ChunkIndex {
        ChunkIndex::new(
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(CharacterNgramEmbedder::default()),
        )
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn search_returns_at_most_min_of_n_and_k() {
        let index = index();
        index
            .add_chunks(&texts(&["Cats are mammals.", "Granite is a rock."]), None, None)
            .await
            .unwrap();

        let hits = index.search("mammals", 3).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn exact_chunk_text_ranks_first() {
        let index = index();
        let chunks = texts(&[
            "Hydraulic pumps move fluid under pressure.",
            "Cats are mammals.",
            "Invoices are due within thirty days.",
            "The boiler must be inspected yearly.",
        ]);
        index.add_chunks(&chunks, None, None).await.unwrap();

        for chunk in &chunks {
            let hits = index.search(chunk, 3).await.unwrap();
            assert_eq!(&hits[0].text, chunk);
        }
    }

    #[tokio::test]
    async fn cat_question_finds_the_cat_chunk() {
        let index = index();
        index
            .add_chunks(&texts(&["Cats are mammals."]), None, None)
            .await
            .unwrap();

        let hits = index.search_texts("What are cats?", 1).await.unwrap();
        assert_eq!(hits, vec!["Cats are mammals.".to_string()]);
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let index = index();
        index
            .add_chunks(&texts(&["Cats are mammals."]), None, None)
            .await
            .unwrap();
        assert!(index.search("   ", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_ids_do_not_collide_across_documents() {
        let index = index();
        let first = index
            .add_chunks(
                &texts(&["Introduction"]),
                None,
                Some(vec![ChunkMetadata::for_source("a.pdf")]),
            )
            .await
            .unwrap();
        let second = index
            .add_chunks(
                &texts(&["Introduction"]),
                None,
                Some(vec![ChunkMetadata::for_source("b.pdf")]),
            )
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(index.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn default_metadata_is_the_generic_tag() {
        let index = index();
        index
            .add_chunks(&texts(&["Cats are mammals."]), None, None)
            .await
            .unwrap();
        let hits = index.search("cats", 1).await.unwrap();
        assert_eq!(hits[0].metadata.source, "pdf_document");
    }

    #[tokio::test]
    async fn mismatched_or_duplicate_ids_are_rejected() {
        let index = index();
        let chunks = texts(&["one", "two"]);

        let short = index
            .add_chunks(&chunks, Some(vec!["only".to_string()]), None)
            .await;
        assert!(matches!(short, Err(SearchError::Request(_))));

        let duplicate = index
            .add_chunks(&chunks, Some(vec!["x".to_string(), "x".to_string()]), None)
            .await;
        assert!(matches!(duplicate, Err(SearchError::Request(_))));
        assert!(index.is_empty().await.unwrap());
    }

    #[test]
    fn chunk_ids_are_content_hashes() {
        assert_eq!(make_chunk_id("a.pdf", 0, "text"), make_chunk_id("a.pdf", 0, "text"));
        assert_ne!(make_chunk_id("a.pdf", 0, "text"), make_chunk_id("a.pdf", 1, "text"));
        assert_eq!(make_chunk_id("a.pdf", 0, "text").len(), 64);
    }

    #[tokio::test]
    async fn large_inputs_are_embedded_in_bounded_batches() {
        let embedder = Arc::new(BatchRecordingEmbedder::default());
        let index = ChunkIndex::new(Arc::new(InMemoryVectorIndex::new()), embedder.clone())
            .with_batch_size(2);
        let chunks: Vec<String> = (0..5).map(|item| format!("chunk number {item}")).collect();
        let metadata: Vec<ChunkMetadata> = (0..5)
            .map(|item| ChunkMetadata {
                chunk_index: Some(item),
                ..ChunkMetadata::for_source("big.pdf")
            })
            .collect();

        let ids = index.add_chunks(&chunks, None, Some(metadata)).await.unwrap();

        assert_eq!(*embedder.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(ids.len(), 5);
        assert_eq!(index.len().await.unwrap(), 5);
        let hits = index.search("chunk number 4", 1).await.unwrap();
        assert_eq!(hits[0].text, "chunk number 4");
        assert_eq!(hits[0].metadata.chunk_index, Some(4));
    }
}
