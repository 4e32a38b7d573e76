//! Run-time retrieval against a persisted index.
//!
//! A [`Retriever`] loads the index table once, read-only, and answers
//! similarity queries from memory. Missing or empty tables open as an empty
//! index whose queries always return no results.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::{IndexEntry, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{self, IndexArtifact, IndexManifest};
use crate::retry::embed_with_retry;

/// Answers similarity queries against an immutable index.
///
/// Cloning is cheap: the loaded entries are shared.
#[derive(Clone)]
pub struct Retriever {
    config: RagConfig,
    provider: Arc<dyn EmbeddingProvider>,
    manifest: Option<Arc<IndexManifest>>,
    entries: Arc<[IndexEntry]>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("provider", &self.provider.model_id())
            .field("manifest", &self.manifest)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Retriever {
    /// Open the index table configured by `config.index_path` and `config.table`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the table exists but cannot be
    /// parsed. A missing directory, missing table, or empty file is not an
    /// error.
    pub fn open(config: &RagConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open_path(&config.table_path(), config, provider)
    }

    /// Open a specific table file.
    ///
    /// # Errors
    ///
    /// See [`Retriever::open`].
    pub fn open_path(path: &Path, config: &RagConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let Some(artifact) = IndexArtifact::read(path)? else {
            warn!(path = %path.display(), "index not found or empty; retrieval will return no context");
            return Ok(Self::empty(config, provider));
        };

        info!(
            path = %path.display(),
            entries = artifact.entries.len(),
            model = %artifact.manifest.embedding_model,
            dimensions = artifact.manifest.dimensions,
            degraded = artifact.manifest.degraded,
            "opened index"
        );
        if !artifact.entries.is_empty() && artifact.manifest.embedding_model != provider.model_id() {
            warn!(
                index_model = %artifact.manifest.embedding_model,
                query_model = provider.model_id(),
                "query provider differs from the model the index was built with; queries will fail"
            );
        }

        Ok(Self {
            config: config.clone(),
            provider,
            manifest: Some(Arc::new(artifact.manifest)),
            entries: artifact.entries.into(),
        })
    }

    /// A retriever over an empty index.
    pub fn empty(config: &RagConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { config: config.clone(), provider, manifest: None, entries: Arc::from(Vec::new()) }
    }

    /// The manifest of the loaded table, if one was found.
    pub fn manifest(&self) -> Option<&IndexManifest> {
        self.manifest.as_deref()
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retrieve using the configured `top_k` and `similarity_threshold`.
    ///
    /// # Errors
    ///
    /// See [`Retriever::retrieve`].
    pub async fn retrieve_default(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.retrieve(query, self.config.top_k, self.config.similarity_threshold).await
    }

    /// Find the chunks most similar to `query`.
    ///
    /// Returns at most `max_results` results scoring at least `threshold`,
    /// ordered by descending score with ties in index order. Queries shorter
    /// than `min_query_length` characters (after trimming) and queries against
    /// an empty index return no results without calling the provider.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingMismatchError`] if the provider's model or vector
    ///   length differs from the index manifest.
    /// - [`RagError::RetrievalUnavailable`] if the provider keeps failing or
    ///   rejects the request.
    pub async fn retrieve(&self, query: &str, max_results: usize, threshold: f32) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.chars().count() < self.config.min_query_length {
            debug!(query, "skipping retrieval for short query");
            return Ok(Vec::new());
        }
        if self.entries.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        self.check_model()?;
        let embedding = embed_with_retry(self.provider.as_ref(), query, &self.config.query_retry)
            .await
            .map_err(|e| match e {
                RagError::EmbeddingUnavailable { provider, message }
                | RagError::EmbeddingRejected { provider, message } => {
                    warn!(provider = %provider, error = %message, "query embedding failed");
                    RagError::RetrievalUnavailable(format!("{provider}: {message}"))
                }
                other => other,
            })?;

        let results = self.search_by_embedding(&embedding, max_results, threshold)?;
        debug!(query_len = query.len(), result_count = results.len(), "retrieval completed");
        Ok(results)
    }

    /// Rank the index against an already-computed query vector.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingMismatchError`] if `embedding` has a
    /// different length than the indexed vectors.
    pub fn search_by_embedding(
        &self,
        embedding: &[f32],
        max_results: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let Some(manifest) = self.manifest.as_deref() else {
            return Ok(Vec::new());
        };
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if embedding.len() != manifest.dimensions {
            return Err(self.mismatch(manifest, embedding.len()));
        }
        Ok(index::search(&self.entries, embedding, max_results, threshold))
    }

    fn check_model(&self) -> Result<()> {
        match self.manifest.as_deref() {
            Some(manifest) if manifest.embedding_model != self.provider.model_id() => {
                Err(self.mismatch(manifest, self.provider.dimensions()))
            }
            _ => Ok(()),
        }
    }

    fn mismatch(&self, manifest: &IndexManifest, query_dimensions: usize) -> RagError {
        RagError::EmbeddingMismatchError {
            index_model: manifest.embedding_model.clone(),
            index_dimensions: manifest.dimensions,
            query_model: self.provider.model_id().to_string(),
            query_dimensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::document::Chunk;
    use crate::hashing::HashingEmbeddingProvider;
    use crate::index::{FORMAT_VERSION, SimilarityMetric};

    async fn write_index(dir: &Path, provider: &HashingEmbeddingProvider, texts: &[&str]) {
        let mut entries = Vec::new();
        for (ordinal, text) in texts.iter().enumerate() {
            entries.push(IndexEntry {
                chunk: Chunk {
                    id: format!("persona.md#{ordinal}"),
                    text: text.to_string(),
                    source_id: "persona.md".into(),
                    ordinal,
                    start: 0,
                    end: text.len(),
                    metadata: BTreeMap::new(),
                },
                embedding: provider.embed(text).await.unwrap(),
            });
        }
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            table: "documents".into(),
            embedding_model: provider.model_id().to_string(),
            dimensions: provider.dimensions(),
            metric: SimilarityMetric::Cosine,
            chunk_size: 2000,
            chunk_overlap: 200,
            entry_count: 0,
            built_at: Utc::now(),
            degraded: false,
        };
        IndexArtifact::new(manifest, entries).write(dir).unwrap();
    }

    fn config(dir: &Path) -> RagConfig {
        RagConfig::builder().index_path(dir).similarity_threshold(0.0).build().unwrap()
    }

    #[tokio::test]
    async fn missing_index_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let retriever =
            Retriever::open(&config(&dir.path().join("nowhere")), Arc::new(HashingEmbeddingProvider::new(32)))
                .unwrap();
        assert!(retriever.is_empty());
        assert!(retriever.manifest().is_none());
        assert!(retriever.retrieve("tell me about your hobbies", 3, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ranks_the_matching_chunk_first() {
        let dir = tempfile::tempdir().unwrap();
        let provider = HashingEmbeddingProvider::new(256);
        write_index(
            dir.path(),
            &provider,
            &["I grew up in Lisbon near the river", "My favourite food is grilled sardines"],
        )
        .await;

        let retriever = Retriever::open(&config(dir.path()), Arc::new(provider)).unwrap();
        assert_eq!(retriever.len(), 2);
        let results = retriever.retrieve("what is your favourite food", 1, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.ordinal, 1);
    }

    #[tokio::test]
    async fn different_model_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), &HashingEmbeddingProvider::new(64), &["I live by the sea"]).await;

        let retriever = Retriever::open(&config(dir.path()), Arc::new(HashingEmbeddingProvider::new(32))).unwrap();
        let err = retriever.retrieve("where do you live nowadays", 3, 0.0).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::EmbeddingMismatchError { index_dimensions: 64, query_dimensions: 32, .. }
        ));
    }

    #[tokio::test]
    async fn search_by_embedding_checks_length() {
        let dir = tempfile::tempdir().unwrap();
        let provider = HashingEmbeddingProvider::new(16);
        write_index(dir.path(), &provider, &["I play the cello"]).await;

        let retriever = Retriever::open(&config(dir.path()), Arc::new(provider)).unwrap();
        assert!(retriever.search_by_embedding(&[1.0; 8], 3, 0.0).is_err());
        assert_eq!(retriever.search_by_embedding(&[1.0; 16], 3, -1.0).unwrap().len(), 1);
    }
}
