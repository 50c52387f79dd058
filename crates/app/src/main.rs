use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_qa_core::{
    expand_pdf_inputs, normalize_text, ChatCompletionsModel, CharacterNgramEmbedder, ChunkIndex,
    ChunkingConfig, DisabledOcr, DocumentIngestor, Embedder, HistoryEntry, HistoryLog,
    HttpEmbedder, HttpOcrEngine, InMemoryVectorIndex, OcrEndpointConfig, OcrEngine, PageOutcome,
    PdfTextExtractor, PipelineOptions, QdrantStore, RetrievalAnswerer, TesseractOcr, VectorIndex,
    DEFAULT_CHAT_MODEL, LOCAL_NGRAM_MODEL,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OcrChoice {
    /// Pipe page images into the local tesseract binary.
    Tesseract,
    /// Post page images to a multimodal OCR endpoint.
    Endpoint,
    /// Image-only pages are reported as OCR failures.
    Disabled,
}

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Maximum characters per chunk
    #[arg(long, env = "PDF_QA_CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "PDF_QA_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Chunks retrieved as context for an answer
    #[arg(long, env = "PDF_QA_TOP_K", default_value_t = 3)]
    top_k: usize,

    /// Timeout for every outbound HTTP request, in seconds
    #[arg(long, env = "PDF_QA_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    /// Qdrant base URL; without it chunks live in memory for this invocation only
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, env = "PDF_QA_QDRANT_COLLECTION", default_value = "pdf_chunks")]
    qdrant_collection: String,

    /// API key for the chat completions provider
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    groq_api_key: Option<String>,

    /// Chat model used to answer questions
    #[arg(long, env = "PDF_QA_LLM_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    llm_model: String,

    /// OpenAI-compatible chat completions URL, if not Groq
    #[arg(long, env = "PDF_QA_LLM_ENDPOINT")]
    llm_endpoint: Option<String>,

    /// Enables remote embeddings; the local trigram embedder is used otherwise
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Remote embedding model
    #[arg(long, env = "PDF_QA_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Vector size of the remote embedding model
    #[arg(long, env = "PDF_QA_EMBEDDING_DIMENSIONS", default_value_t = 1536)]
    embedding_dimensions: usize,

    /// OCR engine for pages without a text layer
    #[arg(long, env = "PDF_QA_OCR", value_enum, default_value_t = OcrChoice::Tesseract)]
    ocr: OcrChoice,

    /// Tesseract executable
    #[arg(long, env = "PDF_QA_TESSERACT", default_value = "tesseract")]
    tesseract_bin: String,

    /// Tesseract language
    #[arg(long, env = "PDF_QA_OCR_LANGUAGE", default_value = "eng")]
    ocr_language: String,

    /// Multimodal OCR endpoint, used with `--ocr endpoint`
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Bearer key for the OCR endpoint
    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,

    /// JSON-lines file answered questions are appended to
    #[arg(long, env = "PDF_QA_HISTORY", default_value = "pdf_qa_history.jsonl")]
    history_file: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Print the normalized text of a PDF and how each page was read.
    Extract {
        #[arg(long)]
        pdf: PathBuf,
    },
    /// Extract, chunk and index PDFs.
    Ingest {
        /// PDF files or folders searched recursively.
        #[arg(long, required = true, num_args = 1..)]
        pdf: Vec<PathBuf>,
    },
    /// Answer a question from the indexed chunks.
    Ask {
        #[arg(long)]
        question: String,
        /// PDFs to ingest before answering.
        #[arg(long, num_args = 1..)]
        pdf: Vec<PathBuf>,
        /// Name the answer is recorded under in the history file.
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Show recently answered questions.
    History {
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

impl Cli {
    fn remote_embedding_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }

    fn options(&self) -> anyhow::Result<PipelineOptions> {
        let embedding_model = match self.remote_embedding_key() {
            Some(_) => self.embedding_model.clone(),
            None => LOCAL_NGRAM_MODEL.to_string(),
        };
        let options = PipelineOptions {
            chunk_max_chars: self.chunk_size,
            chunk_overlap_chars: self.chunk_overlap,
            top_k: self.top_k,
            embedding_model,
            language_model: self.llm_model.clone(),
            request_timeout_secs: self.timeout_secs,
        };
        options.validate()?;
        Ok(options)
    }

    fn ocr_engine(&self, timeout: Duration) -> anyhow::Result<Box<dyn OcrEngine>> {
        Ok(match self.ocr {
            OcrChoice::Tesseract => Box::new(TesseractOcr {
                binary: self.tesseract_bin.clone(),
                language: self.ocr_language.clone(),
            }),
            OcrChoice::Endpoint => {
                let Some(endpoint) = self.ocr_endpoint.as_deref().map(str::trim).filter(|url| !url.is_empty())
                else {
                    bail!("--ocr endpoint needs --ocr-endpoint or LLM_OCR_ENDPOINT");
                };
                let config = OcrEndpointConfig {
                    endpoint: endpoint.to_string(),
                    api_key: self.ocr_api_key.clone().filter(|key| !key.trim().is_empty()),
                };
                Box::new(HttpOcrEngine::new(config, timeout))
            }
            OcrChoice::Disabled => Box::new(DisabledOcr),
        })
    }

    fn embedder(&self, options: &PipelineOptions) -> anyhow::Result<Arc<dyn Embedder>> {
        match self.remote_embedding_key() {
            Some(key) => Ok(Arc::new(HttpEmbedder::new(
                key,
                options.embedding_model.clone(),
                self.embedding_dimensions,
                options.request_timeout(),
            )?)),
            None => Ok(Arc::new(CharacterNgramEmbedder::default())),
        }
    }

    async fn chunk_index(&self, options: &PipelineOptions) -> anyhow::Result<ChunkIndex> {
        let timeout = options.request_timeout();
        let embedder = self.embedder(options)?;
        let store: Arc<dyn VectorIndex> = match &self.qdrant_url {
            Some(url) => {
                let store = QdrantStore::new(
                    url,
                    self.qdrant_collection.clone(),
                    embedder.dimensions(),
                    timeout,
                )?;
                store
                    .ensure_collection()
                    .await
                    .with_context(|| format!("preparing qdrant collection {}", self.qdrant_collection))?;
                Arc::new(store)
            }
            None => Arc::new(InMemoryVectorIndex::new()),
        };

        let index = ChunkIndex::new(store, embedder);
        let store_kind = if self.qdrant_url.is_some() { "qdrant" } else { "memory" };
        info!(
            embedding_model = index.embedding_model(),
            store = store_kind,
            "chunk index ready"
        );
        Ok(index)
    }

    fn language_model(&self, options: &PipelineOptions) -> anyhow::Result<ChatCompletionsModel> {
        let model = ChatCompletionsModel::new(
            self.groq_api_key.clone(),
            options.language_model.clone(),
            options.request_timeout(),
        )?;
        Ok(match &self.llm_endpoint {
            Some(endpoint) => model.with_endpoint(endpoint, "custom")?,
            None => model,
        })
    }
}

async fn ingest_all(ingestor: &DocumentIngestor, inputs: &[PathBuf]) -> usize {
    let files = expand_pdf_inputs(inputs);
    let mut total_chunks = 0;

    for path in files {
        match ingestor.ingest_path(&path).await {
            Ok(report) => {
                if let Some(reason) = &report.open_error {
                    warn!(path = %path.display(), %reason, "skipped pdf");
                }
                println!(
                    "{}: pages direct={} ocr={} empty={} ocr_failed={} chunks={}",
                    path.display(),
                    report.pages.direct,
                    report.pages.ocr,
                    report.pages.empty,
                    report.pages.ocr_failed,
                    report.chunk_count()
                );
                total_chunks += report.chunk_count();
            }
            Err(error) => warn!(path = %path.display(), %error, "failed to ingest pdf"),
        }
    }

    total_chunks
}

async fn extract(path: &Path, ocr: Box<dyn OcrEngine>) -> anyhow::Result<()> {
    let owned = path.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || PdfTextExtractor::new(ocr).extract_path(&owned))
        .await?
        .with_context(|| format!("reading {}", path.display()))?;

    if let Some(reason) = &extracted.open_error {
        bail!("{} could not be opened: {reason}", path.display());
    }

    for page in &extracted.pages {
        let how = match &page.outcome {
            PageOutcome::DirectText(_) => "text".to_string(),
            PageOutcome::OcrText(_) => "ocr".to_string(),
            PageOutcome::Empty => "empty".to_string(),
            PageOutcome::OcrFailed { reason } => format!("ocr failed ({reason})"),
        };
        println!("[page {}] {how}", page.number);
    }
    println!("{}", normalize_text(&extracted.text()));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let options = cli.options()?;
    let timeout = options.request_timeout();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-qa boot"
    );

    match &cli.command {
        Command::Extract { pdf } => {
            extract(pdf, cli.ocr_engine(timeout)?).await?;
        }
        Command::Ingest { pdf } => {
            if cli.qdrant_url.is_none() {
                warn!("no --qdrant-url given, chunks are discarded when this command exits");
            }
            let index = cli.chunk_index(&options).await?;
            let extractor = Arc::new(PdfTextExtractor::new(cli.ocr_engine(timeout)?));
            let ingestor = DocumentIngestor::new(extractor, index, ChunkingConfig::from(&options))?;

            let total = ingest_all(&ingestor, pdf).await;
            println!("{total} chunks ingested at {}", Utc::now().to_rfc3339());
        }
        Command::Ask {
            question,
            pdf,
            user,
        } => {
            let index = cli.chunk_index(&options).await?;
            if !pdf.is_empty() {
                let extractor = Arc::new(PdfTextExtractor::new(cli.ocr_engine(timeout)?));
                let ingestor =
                    DocumentIngestor::new(extractor, index.clone(), ChunkingConfig::from(&options))?;
                ingest_all(&ingestor, pdf).await;
            }

            let answerer =
                RetrievalAnswerer::new(index, cli.language_model(&options)?).with_top_k(options.top_k);
            let answer = answerer.answer(question).await?;

            println!("{}", answer.display_text());
            for (rank, chunk) in answer.context.iter().enumerate() {
                println!(
                    "\n[{}] score={:.4} source={}\n{}",
                    rank + 1,
                    chunk.score,
                    chunk.metadata.source,
                    chunk.text
                );
            }

            if let Some(text) = answer.generated_text() {
                let log = HistoryLog::new(&cli.history_file);
                log.record(&HistoryEntry::now(user.as_str(), question.as_str(), text))
                    .await
                    .with_context(|| format!("writing {}", log.path().display()))?;
            }
        }
        Command::History { user, limit } => {
            let entries = HistoryLog::new(&cli.history_file).recent(user, *limit).await?;
            if entries.is_empty() {
                println!("no history for {user}");
            }
            for entry in entries {
                println!(
                    "{} Q: {}\nA: {}\n",
                    entry.asked_at.to_rfc3339(),
                    entry.query,
                    entry.response
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_embedder_is_recorded_without_a_remote_key() {
        let cli = Cli::parse_from([
            "pdf-qa",
            "--openai-api-key",
            "",
            "--llm-model",
            "llama-test",
            "history",
        ]);
        let options = cli.options().unwrap();

        assert_eq!(options.embedding_model, LOCAL_NGRAM_MODEL);
        assert_eq!(options.language_model, "llama-test");
        assert_eq!(cli.embedder(&options).unwrap().model_id(), LOCAL_NGRAM_MODEL);
    }

    #[test]
    fn remote_key_selects_the_configured_embedding_model() {
        let cli = Cli::parse_from([
            "pdf-qa",
            "--openai-api-key",
            "sk-test",
            "--embedding-model",
            "text-embedding-3-large",
            "history",
        ]);
        let options = cli.options().unwrap();

        assert_eq!(options.embedding_model, "text-embedding-3-large");
        assert_eq!(
            cli.embedder(&options).unwrap().model_id(),
            "text-embedding-3-large"
        );
    }

    #[test]
    fn invalid_chunking_flags_fail_before_any_work() {
        let cli = Cli::parse_from([
            "pdf-qa",
            "--chunk-size",
            "100",
            "--chunk-overlap",
            "100",
            "history",
        ]);
        assert!(cli.options().is_err());
    }
}
