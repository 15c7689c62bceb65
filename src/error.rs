//! Error taxonomy for indexing and retrieval.
//!
//! Soft conditions (unsupported language, parse failure, missing file) are
//! collected into [`IndexStats::errors`](crate::indexer::core::IndexStats)
//! and never escape an `index` call. Everything else is hard: the current
//! operation unwinds and persisted state stays at its last commit.
use thiserror::Error;

use crate::embedder::EmbedderError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("embedding failed: {0}")]
    Embedding(EmbedderError),

    #[error("index corrupted: {0} (run reset and rebuild)")]
    IndexCorrupted(String),

    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("reset requires explicit confirmation")]
    ResetNotConfirmed,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid tree-sitter query: {0}")]
    Query(#[from] tree_sitter::QueryError),

    #[error("grammar load failed: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker task failed: {0}")]
    Task(String),
}

impl IndexError {
    /// Soft errors are reported per file and never abort a batch.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            IndexError::UnsupportedLanguage(_)
                | IndexError::Parse { .. }
                | IndexError::FileNotFound(_)
        )
    }
}

impl From<EmbedderError> for IndexError {
    fn from(err: EmbedderError) -> Self {
        match err {
            EmbedderError::ModelUnavailable(msg) => IndexError::ModelUnavailable(msg),
            EmbedderError::DimensionMismatch { expected, actual } => {
                IndexError::DimensionMismatch { expected, actual }
            }
            other => IndexError::Embedding(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
