//! Error types for ragbox.

use thiserror::Error;

/// Main error type for ragbox operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Text extraction failed
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    /// Chunking failed
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Indexing job failed or was cancelled
    #[error("indexing error: {0}")]
    Indexing(#[from] IndexError),

    /// Packed vector handling failed
    #[error("vector error: {0}")]
    Vector(#[from] VectorError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error came from cooperative cancellation.
    ///
    /// Cancelled jobs must never be recorded as document failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Indexing(IndexError::Cancelled))
    }
}

/// Text extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction produced no text")]
    Empty,

    #[error("extracted text too short: {chars} chars")]
    TooShort { chars: usize },

    #[error("extracted text too repetitive: unique line ratio {ratio:.2}")]
    TooRepetitive { ratio: f32 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunking errors.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("chunking produced no chunks")]
    ProducedNone,
}

/// Embedding errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedder not attached")]
    NotAttached,

    #[error("embedding failed: {0}")]
    Failed(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Indexing errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The job was cancelled at a stage boundary
    #[error("cancelled")]
    Cancelled,
}

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("corrupt document data: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Packed float vector errors.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("byte length {0} is not a multiple of 4")]
    InvalidLength(usize),
}

/// Result type alias for ragbox operations.
pub type Result<T> = std::result::Result<T, Error>;
