//! Error types for the `persona-rag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or querying the knowledge index.
#[derive(Debug, Error)]
pub enum RagError {
    /// A source document could not be read or decoded as UTF-8 text.
    ///
    /// The Indexer skips the document and keeps going.
    #[error("Read error ({}): {message}", path.display())]
    ReadError {
        /// The file that failed to load.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The embedding provider failed in a way that may clear up on retry:
    /// network errors, timeouts, rate limits, server errors.
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding provider refused the request: bad credentials, invalid
    /// input, unknown model. Never retried.
    #[error("Embedding rejected ({provider}): {message}")]
    EmbeddingRejected {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The query-time embedding model does not match the one the index was built with.
    #[error(
        "Embedding mismatch: index built with '{index_model}' ({index_dimensions} dims), \
         query uses '{query_model}' ({query_dimensions} dims)"
    )]
    EmbeddingMismatchError {
        /// Model identifier recorded in the index manifest.
        index_model: String,
        /// Dimensionality recorded in the index manifest.
        index_dimensions: usize,
        /// Model identifier of the query-time provider.
        query_model: String,
        /// Dimensionality of the query embedding.
        query_dimensions: usize,
    },

    /// The embedding provider could not be reached while answering a query.
    ///
    /// Callers fall back to an un-augmented prompt.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The index artifact could not be read or written.
    #[error("Index error ({}): {message}", path.display())]
    IndexError {
        /// Path of the index artifact.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Whether retrying the failed operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::EmbeddingUnavailable { .. })
    }

    pub(crate) fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::EmbeddingUnavailable { provider: provider.into(), message: message.into() }
    }

    /// Classify a failed HTTP response from an embedding API.
    ///
    /// Statuses accepted by [`is_recoverable_status`](crate::retry::is_recoverable_status)
    /// become [`RagError::EmbeddingUnavailable`], everything else
    /// [`RagError::EmbeddingRejected`].
    pub fn from_http_status(provider: impl Into<String>, status: u16, detail: impl std::fmt::Display) -> Self {
        let provider = provider.into();
        let message = format!("API returned {status}: {detail}");
        if crate::retry::is_recoverable_status(status) {
            RagError::EmbeddingUnavailable { provider, message }
        } else {
            RagError::EmbeddingRejected { provider, message }
        }
    }

    pub(crate) fn index(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        RagError::IndexError { path: path.into(), message: message.to_string() }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
