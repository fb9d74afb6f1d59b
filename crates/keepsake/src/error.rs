//! Error types for keepsake

use thiserror::Error;

/// Main error type for keepsake operations
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// Storage-related errors (LanceDB, file system, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// LLM completion errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rule compilation or extraction errors
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Distributed lock errors
    #[error("Lock error: {0}")]
    Lock(String),

    /// Memory operation errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for KeepsakeError {
    fn from(e: serde_json::Error) -> Self {
        KeepsakeError::Serialization(e.to_string())
    }
}

/// Result type alias for keepsake operations
pub type Result<T> = std::result::Result<T, KeepsakeError>;
