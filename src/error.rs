//! Error handling for the form analysis backend

use thiserror::Error;

/// Result type alias for the backend
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the backend
#[derive(Error, Debug)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors related to language model operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Agent escalated: {0}")]
    Escalated(String),

    #[error("No final response from model")]
    NoFinalResponse,

    #[error("Max retries exceeded. Last error: {0}")]
    RetriesExhausted(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

/// Errors related to the vector index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Collection not initialized: {0}")]
    NotInitialized(String),

    #[error("Add failed: {0}")]
    AddFailed(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Errors related to document processing
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("PDF parse failed: {0}")]
    PdfParseFailed(String),

    #[error("Image decode failed: {0}")]
    ImageDecodeFailed(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Llm(LlmError::Timeout)
                | Error::Llm(LlmError::ConnectionFailed(_))
                | Error::Llm(LlmError::NoFinalResponse)
                | Error::Llm(LlmError::Escalated(_))
                | Error::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Llm(_) => "llm",
            Error::Index(_) => "index",
            Error::Document(_) => "document",
            Error::Config(_) => "config",
            Error::Pipeline(_) => "pipeline",
            Error::Conflict(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Http(_) => "http",
            Error::Database(_) => "database",
            Error::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_error = Error::Llm(LlmError::Timeout);
        assert!(timeout_error.is_retryable());

        let config_error = Error::Config("invalid config".to_string());
        assert!(!config_error.is_retryable());

        let escalation = Error::Llm(LlmError::Escalated("safety".to_string()));
        assert!(escalation.is_retryable());
    }

    #[test]
    fn test_error_category() {
        let llm_error = Error::Llm(LlmError::Timeout);
        assert_eq!(llm_error.category(), "llm");

        let index_error = Error::Index(IndexError::SearchFailed("down".to_string()));
        assert_eq!(index_error.category(), "index");

        let conflict = Error::Conflict("active request exists".to_string());
        assert_eq!(conflict.category(), "conflict");
    }
}
