use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("unsupported image encoding: {0}")]
    ImageDecode(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Index(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("embedding failed ({provider}): {message}")]
    Embedding { provider: String, message: String },
}

/// Failures of the hosted language model. Kept as values so the caller can
/// tell an auth or quota problem from a transport problem.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{0} returned an empty completion")]
    EmptyCompletion(String),
}

impl ModelError {
    /// 401/403 from the provider.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ModelError::MissingCredential(_))
            || matches!(self, ModelError::Status { status, .. } if *status == 401 || *status == 403)
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, ModelError::Status { status, .. } if *status == 429)
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
