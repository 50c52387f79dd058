use crate::chunking::{chunk_spans, ChunkSpan, ChunkingConfig};
use crate::extractor::{ExtractedDocument, PageOutcomeCounts, TextExtractor};
use crate::index::{make_chunk_id, ChunkIndex};
use crate::normalize::normalize_text;
use crate::{ChunkMetadata, IngestError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Files are taken as given; directories are searched recursively for PDFs.
pub fn expand_pdf_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(discover_pdf_files(input));
        } else {
            files.push(input.clone());
        }
    }
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// One document taken through extraction, normalization and chunking.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub document_id: String,
    pub extracted: ExtractedDocument,
    pub normalized: String,
    pub spans: Vec<ChunkSpan>,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub source: String,
    pub document_id: String,
    pub pages: PageOutcomeCounts,
    pub chunk_ids: Vec<String>,
    pub open_error: Option<String>,
}

impl IngestionReport {
    pub fn chunk_count(&self) -> usize {
        self.chunk_ids.len()
    }
}

/// The ingestion path: bytes → text → normalized text → chunks → index.
#[derive(Clone)]
pub struct DocumentIngestor {
    extractor: Arc<dyn TextExtractor>,
    index: ChunkIndex,
    chunking: ChunkingConfig,
}

impl DocumentIngestor {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        index: ChunkIndex,
        chunking: ChunkingConfig,
    ) -> Result<Self, IngestError> {
        chunking.validate()?;
        Ok(Self {
            extractor,
            index,
            chunking,
        })
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// Extraction runs on the blocking pool; OCR may shell out or use a
    /// blocking HTTP client.
    pub async fn prepare(&self, document: Vec<u8>) -> Result<PreparedDocument, IngestError> {
        let document_id = digest_bytes(&document);
        let extractor = Arc::clone(&self.extractor);
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&document)).await?;

        let normalized = normalize_text(&extracted.text());
        let spans = chunk_spans(&normalized, self.chunking)?;
        let chars: Vec<char> = normalized.chars().collect();
        let chunks: Vec<String> = spans
            .iter()
            .map(|span| chars[span.start..span.end].iter().collect())
            .collect();

        Ok(PreparedDocument {
            document_id,
            extracted,
            normalized,
            spans,
            chunks,
        })
    }

    pub async fn ingest(&self, source: &str, document: Vec<u8>) -> Result<IngestionReport, IngestError> {
        let prepared = self.prepare(document).await?;

        if let Some(error) = &prepared.extracted.open_error {
            warn!(source = %source, %error, "document could not be opened, nothing indexed");
        }

        let metadata: Vec<ChunkMetadata> = prepared
            .spans
            .iter()
            .enumerate()
            .map(|(position, span)| ChunkMetadata {
                source: source.to_string(),
                document_id: Some(prepared.document_id.clone()),
                chunk_index: Some(position as u64),
                char_start: Some(span.start),
                char_end: Some(span.end),
            })
            .collect();
        let ids: Vec<String> = prepared
            .chunks
            .iter()
            .enumerate()
            .map(|(position, text)| make_chunk_id(&prepared.document_id, position, text))
            .collect();

        let chunk_ids = self
            .index
            .add_chunks(&prepared.chunks, Some(ids), Some(metadata))
            .await?;

        let report = IngestionReport {
            source: source.to_string(),
            document_id: prepared.document_id,
            pages: prepared.extracted.counts(),
            chunk_ids,
            open_error: prepared.extracted.open_error,
        };
        info!(
            source = %report.source,
            pages = prepared.extracted.pages.len(),
            chunks = report.chunk_count(),
            "ingested document"
        );

        Ok(report)
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<IngestionReport, IngestError> {
        let bytes = tokio::fs::read(path).await?;
        let source = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        self.ingest(&source, bytes).await
    }
}
