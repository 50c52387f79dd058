use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SOURCE_TAG: &str = "pdf_document";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub source: String,
    pub document_id: Option<String>,
    pub chunk_index: Option<u64>,
    pub char_start: Option<usize>,
    pub char_end: Option<usize>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE_TAG.to_string(),
            document_id: None,
            chunk_index: None,
            char_start: None,
            char_end: None,
        }
    }
}

impl ChunkMetadata {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

/// The indexed unit: one per chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub top_k: usize,
    pub embedding_model: String,
    pub language_model: String,
    pub request_timeout_secs: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 200,
            top_k: 3,
            embedding_model: crate::embeddings::LOCAL_NGRAM_MODEL.to_string(),
            language_model: crate::llm::DEFAULT_CHAT_MODEL.to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        crate::chunking::ChunkingConfig::from(self).validate()?;
        if self.top_k == 0 {
            return Err(IngestError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = PipelineOptions::default();
        assert_eq!(options.chunk_max_chars, 1_000);
        assert_eq!(options.chunk_overlap_chars, 200);
        assert_eq!(options.top_k, 3);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn overlap_not_smaller_than_max_is_rejected() {
        let options = PipelineOptions {
            chunk_max_chars: 100,
            chunk_overlap_chars: 100,
            ..PipelineOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let options = PipelineOptions {
            top_k: 0,
            ..PipelineOptions::default()
        };
        assert!(matches!(options.validate(), Err(IngestError::InvalidArgument(_))));
    }

    #[test]
    fn default_metadata_carries_generic_source_tag() {
        assert_eq!(ChunkMetadata::default().source, "pdf_document");
    }
}
