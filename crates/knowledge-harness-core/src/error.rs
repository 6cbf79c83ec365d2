//! Error taxonomy shared by the core components.
//!
//! Admission rejections are deliberately absent: a rejected path is a
//! [`Verdict::Reject`](crate::filter::Verdict) decision that gets counted,
//! never an error that propagates.

use thiserror::Error;

/// Errors surfaced by the normalizer, retrieval engine and storage backends.
#[derive(Debug, Error)]
pub enum KbError {
    /// A single file could not be turned into text. Recoverable per file.
    #[error("extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    /// The embedding backend failed after retries.
    #[error("embedding backend error: {0}")]
    EmbeddingBackend(String),

    /// Vector dimensionality does not match the stored collection.
    #[error("dimension mismatch: store holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The backing store cannot be reached or failed mid-operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("knowledge base not found: {0}")]
    KnowledgeBaseNotFound(String),

    #[error("knowledge base already exists: {0}")]
    KnowledgeBaseExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl KbError {
    /// Whether this error must abort a whole indexing run rather than a
    /// single file or batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KbError::DimensionMismatch { .. } | KbError::StoreUnavailable(_) | KbError::Cancelled
        )
    }

    /// Short machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            KbError::ExtractionFailed { .. } => "extraction_failed",
            KbError::EmbeddingBackend(_) => "embedding_backend_error",
            KbError::DimensionMismatch { .. } => "dimension_mismatch",
            KbError::StoreUnavailable(_) => "store_unavailable",
            KbError::KnowledgeBaseNotFound(_) => "knowledge_base_not_found",
            KbError::KnowledgeBaseExists(_) => "knowledge_base_exists",
            KbError::InvalidInput(_) => "invalid_input",
            KbError::Cancelled => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, KbError>;
