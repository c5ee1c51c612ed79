use async_openai::error::OpenAIError;
use thiserror::Error;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unique constraint conflict: {0}")]
    Conflict(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// Substrings of database errors that a fresh attempt of the same write can resolve: a unique
/// index rejecting a row another writer just created, or an aborted optimistic transaction.
const RETRYABLE_MARKERS: [&str; 3] = [
    "already contains",
    "read or write conflict",
    "can be retried",
];

pub(crate) fn is_retryable_message(message: &str) -> bool {
    RETRYABLE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

impl AppError {
    /// Whether the error stems from a concurrent writer, so the write can be resolved again.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Database(err) => is_retryable_message(&err.to_string()),
            _ => false,
        }
    }
}
