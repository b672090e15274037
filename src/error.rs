//! Error types for the semantic code memory.
//!
//! Structured errors via thiserror. Every fatal variant carries the offending
//! path or SHA and, where the failure is recoverable by the user, a concrete
//! next action in the message.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the chunk blob store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Chunk '{sha}' not found in the chunk store at '{dir}'")]
    NotFound { sha: String, dir: PathBuf },

    #[error(
        "Chunk '{sha}' is corrupt: {reason}\nSuggestion: Re-run indexing to regenerate the chunk"
    )]
    CorruptBlob { sha: String, reason: String },

    #[error(
        "Chunk '{sha}' is encrypted but no encryption key is configured\nSuggestion: Set PAMPAX_ENCRYPTION_KEY to the key this project was indexed with"
    )]
    EncryptionKeyRequired { sha: String },

    #[error(
        "Failed to decrypt chunk '{sha}': authentication failed\nSuggestion: Verify PAMPAX_ENCRYPTION_KEY matches the key used at indexing time"
    )]
    DecryptFailed { sha: String },

    #[error(
        "Invalid encryption key: {reason}\nSuggestion: PAMPAX_ENCRYPTION_KEY must be 32 bytes, base64 or hex encoded"
    )]
    InvalidKey { reason: String },

    #[error("I/O error on chunk '{sha}': {source}")]
    Io {
        sha: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the metadata database.
#[derive(Error, Debug)]
pub enum DbError {
    #[error(
        "No index database found at '{path}'\nSuggestion: Run indexing first to create the database"
    )]
    DatabaseNotFound { path: PathBuf },

    #[error("Database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stored embedding for chunk '{chunk_id}' is malformed: {reason}")]
    MalformedEmbedding { chunk_id: String, reason: String },
}

/// Errors from embedding providers and the rate limiter.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding provider '{provider}': {reason}")]
    Init { provider: String, reason: String },

    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider '{provider}' returned an unexpected response: {reason}")]
    BadResponse { provider: String, reason: String },

    #[error(
        "Embedding dimension mismatch: provider '{provider}' returned {actual}, expected {expected}"
    )]
    DimensionMismatch {
        provider: String,
        expected: usize,
        actual: usize,
    },

    #[error("Rate limited by provider")]
    RateLimited,

    #[error(
        "Rate limit retries exhausted after {attempts} attempts\nSuggestion: Lower PAMPAX_RATE_LIMIT or wait before retrying"
    )]
    RateLimitExhausted { attempts: usize },
}

impl EmbeddingError {
    /// Whether this failure should be retried on the 429 schedule.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::Http(e) => e
                .status()
                .is_some_and(|s| s == reqwest::StatusCode::TOO_MANY_REQUESTS),
            Self::BadResponse { reason, .. } => {
                let lower = reason.to_lowercase();
                lower.contains("rate limit") || lower.contains("too many requests")
            }
            _ => false,
        }
    }
}

/// Errors from the reranker backends. Rerank failures are soft at the search
/// layer (the prior ordering is kept) but still carry diagnostics.
#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Failed to initialize reranker '{backend}': {reason}")]
    Init { backend: String, reason: String },

    #[error("Rerank API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rerank API returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Rerank response did not match any accepted schema: {reason}")]
    BadSchema { reason: String },
}

/// Errors from indexing operations.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize parser for {language}: {reason}")]
    ParserInit { language: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to persist '{path}': {source}")]
    Persist {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

/// Errors from the file watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(
        "Failed to initialize file watcher: {reason}\nSuggestion: Check file system permissions and inotify limits"
    )]
    Init { reason: String },

    #[error(
        "Cannot watch path '{path}': {reason}\nSuggestion: Verify the path exists and is readable"
    )]
    PathWatch { path: PathBuf, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type DbResult<T> = Result<T, DbError>;
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;
pub type RerankResult<T> = Result<T, RerankError>;
pub type IndexResult<T> = Result<T, IndexError>;
pub type WatchResult<T> = Result<T, WatchError>;
