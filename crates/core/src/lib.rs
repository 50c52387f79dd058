pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod history;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod stores;
pub mod traits;

pub use answer::{
    build_prompt, Answer, AnswerOutcome, RetrievalAnswerer, DEFAULT_TOP_K, NO_RELEVANT_CONTENT,
};
pub use chunking::{chunk_spans, split_text, ChunkSpan, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    LOCAL_NGRAM_MODEL,
};
pub use error::{IngestError, ModelError, SearchError};
pub use extractor::{
    ExtractedDocument, PageOutcome, PageOutcomeCounts, PageText, PdfTextExtractor, TextExtractor,
    EMPTY_PAGE_PLACEHOLDER, OCR_FAILED_PLACEHOLDER,
};
pub use history::{HistoryEntry, HistoryLog};
pub use index::{make_chunk_id, ChunkIndex};
pub use ingest::{
    digest_bytes, discover_pdf_files, expand_pdf_inputs, DocumentIngestor, IngestionReport,
    PreparedDocument,
};
pub use llm::{ChatCompletionsModel, DEFAULT_CHAT_MODEL, GROQ_CHAT_COMPLETIONS_URL};
pub use models::{ChunkMetadata, PipelineOptions, RetrievedChunk, VectorRecord, DEFAULT_SOURCE_TAG};
pub use normalize::normalize_text;
pub use ocr::{
    DisabledOcr, HttpOcrEngine, ImageFormat, OcrEndpointConfig, OcrEngine, RasterImage,
    TesseractOcr,
};
pub use stores::{InMemoryVectorIndex, QdrantStore};
pub use traits::{LanguageModel, VectorIndex};
