//! Configuration for the Indexer and the Retriever.
//!
//! A [`RagConfig`] is built once at startup, either through
//! [`RagConfig::builder()`] or from `RAG_*` environment variables via
//! [`RagConfig::from_env()`], and passed by reference to the components.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingStrategy;
use crate::context::ContextStrategy;
use crate::error::{RagError, Result};
use crate::provider::{EmbeddingBackend, EmbeddingConfig};
use crate::retry::RetryPolicy;

/// Default directory of the persisted index.
pub const DEFAULT_INDEX_PATH: &str = "./knowledge_base";
/// Default table (file stem) inside the index directory.
pub const DEFAULT_TABLE: &str = "documents";
/// Default heading placed above retrieved snippets in the prompt.
pub const DEFAULT_CONTEXT_HEADER: &str = "Relevant information about me:";

/// Configuration parameters for indexing and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Whether retrieval-augmented prompts are enabled at all.
    pub enabled: bool,
    /// Directory holding the index artifact.
    pub index_path: PathBuf,
    /// Name of the table file inside `index_path`.
    pub table: String,
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Number of overlapping bytes between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunking strategy used at build time.
    pub chunking: ChunkingStrategy,
    /// Number of results returned per query.
    pub top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Queries shorter than this many characters are not embedded.
    pub min_query_length: usize,
    /// Which embedding backend and model to use.
    pub embedding: EmbeddingConfig,
    /// Retry policy for embedding chunks at build time.
    pub build_retry: RetryPolicy,
    /// Retry policy for embedding queries at run time.
    pub query_retry: RetryPolicy,
    /// Overall deadline for the build-time embedding pass.
    pub build_timeout: Duration,
    /// Maximum number of chunks embedded concurrently during a build.
    pub embed_concurrency: usize,
    /// How retrieved context is injected into chat messages.
    pub context_strategy: ContextStrategy,
    /// Heading placed above retrieved snippets.
    pub context_header: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            table: DEFAULT_TABLE.to_string(),
            chunk_size: 2000,
            chunk_overlap: 200,
            chunking: ChunkingStrategy::default(),
            top_k: 3,
            similarity_threshold: 0.5,
            min_query_length: 8,
            embedding: EmbeddingConfig::default(),
            build_retry: RetryPolicy::default(),
            query_retry: RetryPolicy::query_default(),
            build_timeout: Duration::from_secs(600),
            embed_concurrency: 1,
            context_strategy: ContextStrategy::default(),
            context_header: DEFAULT_CONTEXT_HEADER.to_string(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Load configuration from `RAG_*` environment variables.
    ///
    /// See [`from_lookup`](RagConfig::from_lookup) for the variables read.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults. Recognised keys: `RAG_ENABLED`,
    /// `RAG_INDEX_PATH`, `RAG_TABLE`, `RAG_CHUNK_SIZE`, `RAG_CHUNK_OVERLAP`,
    /// `RAG_CHUNKING`, `RAG_MATCH_COUNT`, `RAG_MATCH_THRESHOLD`,
    /// `RAG_MIN_QUERY_LENGTH`, `RAG_EMBEDDING_PROVIDER`, `RAG_EMBEDDING_MODEL`,
    /// `RAG_EMBEDDING_DIMENSIONS`, `RAG_EMBED_CONCURRENCY`,
    /// `RAG_BUILD_TIMEOUT_SECS`, `RAG_CONTEXT_STRATEGY`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] naming the variable when a value does
    /// not parse, or when the resulting configuration fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = RagConfig::default();

        if let Some(v) = get("RAG_ENABLED") {
            config.enabled = v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes");
        }
        if let Some(v) = get("RAG_INDEX_PATH") {
            config.index_path = PathBuf::from(v);
        }
        if let Some(v) = get("RAG_TABLE") {
            config.table = v;
        }
        if let Some(v) = get("RAG_CHUNK_SIZE") {
            config.chunk_size = parse_var("RAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("RAG_CHUNK_OVERLAP") {
            config.chunk_overlap = parse_var("RAG_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("RAG_CHUNKING") {
            config.chunking = parse_var("RAG_CHUNKING", &v)?;
        }
        if let Some(v) = get("RAG_MATCH_COUNT") {
            config.top_k = parse_var("RAG_MATCH_COUNT", &v)?;
        }
        if let Some(v) = get("RAG_MATCH_THRESHOLD") {
            config.similarity_threshold = parse_var("RAG_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = get("RAG_MIN_QUERY_LENGTH") {
            config.min_query_length = parse_var("RAG_MIN_QUERY_LENGTH", &v)?;
        }
        if let Some(v) = get("RAG_EMBEDDING_PROVIDER") {
            config.embedding.backend = parse_var::<EmbeddingBackend>("RAG_EMBEDDING_PROVIDER", &v)?;
        }
        if let Some(v) = get("RAG_EMBEDDING_MODEL") {
            config.embedding.model = Some(v);
        }
        if let Some(v) = get("RAG_EMBEDDING_DIMENSIONS") {
            config.embedding.dimensions = Some(parse_var("RAG_EMBEDDING_DIMENSIONS", &v)?);
        }
        if let Some(v) = get("RAG_EMBED_CONCURRENCY") {
            config.embed_concurrency = parse_var("RAG_EMBED_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("RAG_BUILD_TIMEOUT_SECS") {
            config.build_timeout = Duration::from_secs(parse_var("RAG_BUILD_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("RAG_CONTEXT_STRATEGY") {
            config.context_strategy = parse_var("RAG_CONTEXT_STRATEGY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Full path of the table file inside the index directory.
    pub fn table_path(&self) -> PathBuf {
        crate::index::table_path(&self.index_path, &self.table)
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size < 4`
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `similarity_threshold` is not finite
    /// - `embed_concurrency == 0`
    /// - `table` is empty or contains a path separator
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 4 {
            return Err(RagError::ConfigError(format!(
                "chunk_size ({}) must be at least 4",
                self.chunk_size
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if !self.similarity_threshold.is_finite() {
            return Err(RagError::ConfigError("similarity_threshold must be finite".to_string()));
        }
        if self.embed_concurrency == 0 {
            return Err(RagError::ConfigError(
                "embed_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.table.is_empty() || self.table.contains(['/', '\\']) {
            return Err(RagError::ConfigError(format!("invalid table name '{}'", self.table)));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| RagError::ConfigError(format!("{key}='{value}': {e}")))
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Enable or disable retrieval.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Set the index directory.
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_path = path.into();
        self
    }

    /// Set the table name inside the index directory.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.table = table.into();
        self
    }

    /// Set the maximum chunk size in bytes.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in bytes.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Set the number of results returned per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the minimum query length in characters.
    pub fn min_query_length(mut self, length: usize) -> Self {
        self.config.min_query_length = length;
        self
    }

    /// Set the embedding backend configuration.
    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    /// Set the build-time retry policy.
    pub fn build_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.build_retry = policy;
        self
    }

    /// Set the query-time retry policy.
    pub fn query_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.query_retry = policy;
        self
    }

    /// Set the overall deadline for the build-time embedding pass.
    pub fn build_timeout(mut self, timeout: Duration) -> Self {
        self.config.build_timeout = timeout;
        self
    }

    /// Set how many chunks may be embedded concurrently during a build.
    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = concurrency;
        self
    }

    /// Set the context injection strategy.
    pub fn context_strategy(mut self, strategy: ContextStrategy) -> Self {
        self.config.context_strategy = strategy;
        self
    }

    /// Set the heading placed above retrieved snippets.
    pub fn context_header(mut self, header: impl Into<String>) -> Self {
        self.config.context_header = header.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
