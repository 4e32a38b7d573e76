//! Build-time indexing: documents → chunks → embeddings → index artifact.
//!
//! The [`Indexer`] favours shipping *some* index over failing the build.
//! Unreadable files and chunks whose embedding keeps failing are skipped with a
//! warning; if nothing survives, an empty but valid index is still written.
//! Only a missing source directory, an invalid pattern, or a failure to write
//! the artifact itself is reported as an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use persona_rag::{HashingEmbeddingProvider, Indexer, RagConfig};
//!
//! let config = RagConfig::default();
//! let indexer = Indexer::new(&config, Arc::new(HashingEmbeddingProvider::default()));
//! let report = indexer.build("knowledge".as_ref(), "*.md", "./knowledge_base".as_ref()).await?;
//! println!("{} chunks, {} files skipped", report.chunks_indexed, report.files_skipped);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use glob::Pattern;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunking::{Chunker, ChunkingStrategy, MarkdownChunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, Document, DocumentFormat, IndexEntry};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{FORMAT_VERSION, IndexArtifact, IndexManifest, SimilarityMetric};
use crate::retry::embed_with_retry;

/// Documents found under a source directory plus the files that could not be read.
#[derive(Debug, Default)]
pub struct DocumentScan {
    /// Successfully decoded documents, in path order.
    pub documents: Vec<Document>,
    /// One [`RagError::ReadError`] per file that was skipped.
    pub skipped: Vec<RagError>,
}

/// Summary of one index build.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexReport {
    /// Path of the table file written.
    pub path: PathBuf,
    /// Documents that contributed at least one chunk.
    pub documents_indexed: usize,
    /// Files skipped because they could not be read.
    pub files_skipped: usize,
    /// Chunks written to the index.
    pub chunks_indexed: usize,
    /// Chunks dropped because embedding failed.
    pub chunks_skipped: usize,
    /// Whether the build deadline cut the embedding pass short.
    pub timed_out: bool,
    /// Whether anything was dropped.
    pub degraded: bool,
}

/// Recursively find files under `dir` whose name matches `pattern` and read them.
///
/// Patterns without a `/` are matched against the file name; patterns with a
/// `/` are matched against the path relative to `dir`. Files that are not
/// valid UTF-8 are reported in [`DocumentScan::skipped`]; files that are empty
/// after trimming are ignored.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if `dir` is not an existing directory or
/// `pattern` is not a valid glob.
pub fn discover_documents(dir: &Path, pattern: &str) -> Result<DocumentScan> {
    if !dir.is_dir() {
        return Err(RagError::ConfigError(format!(
            "source directory does not exist: {}",
            dir.display()
        )));
    }
    let matcher = Pattern::new(pattern)
        .map_err(|e| RagError::ConfigError(format!("invalid pattern '{pattern}': {e}")))?;
    let match_full_path = pattern.contains('/');

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let candidate = if match_full_path {
                relative_id(dir, path)
            } else {
                path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
            };
            matcher.matches(&candidate)
        })
        .collect();
    paths.sort();

    let mut scan = DocumentScan::default();
    for path in paths {
        match read_document(dir, &path) {
            Ok(Some(document)) => scan.documents.push(document),
            Ok(None) => debug!(path = %path.display(), "skipping empty file"),
            Err(e) => {
                warn!(error = %e, "skipping unreadable document");
                scan.skipped.push(e);
            }
        }
    }
    Ok(scan)
}

fn relative_id(dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(dir).unwrap_or(path);
    relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

fn read_document(dir: &Path, path: &Path) -> Result<Option<Document>> {
    let bytes = fs::read(path)
        .map_err(|e| RagError::ReadError { path: path.to_path_buf(), message: e.to_string() })?;
    let text = String::from_utf8(bytes).map_err(|e| RagError::ReadError {
        path: path.to_path_buf(),
        message: format!("not valid UTF-8: {e}"),
    })?;
    let text = text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text);
    if text.trim().is_empty() {
        return Ok(None);
    }

    let id = relative_id(dir, path);
    let format = DocumentFormat::from_path(path);
    let mut document = Document::new(id, text, format);
    if let Some(name) = path.file_name() {
        document.metadata.insert("source".to_string(), name.to_string_lossy().into_owned());
    }
    document.source_uri = Some(path.display().to_string());
    Ok(Some(document))
}

fn chunker_for(config: &RagConfig) -> Arc<dyn Chunker> {
    match config.chunking {
        ChunkingStrategy::Recursive => Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap)),
        ChunkingStrategy::Markdown => Arc::new(MarkdownChunker::new(config.chunk_size, config.chunk_overlap)),
    }
}

fn new_manifest(config: &RagConfig, embedding_model: &str, dimensions: usize, degraded: bool) -> IndexManifest {
    IndexManifest {
        format_version: FORMAT_VERSION,
        table: config.table.clone(),
        embedding_model: embedding_model.to_string(),
        dimensions,
        metric: SimilarityMetric::Cosine,
        chunk_size: config.chunk_size,
        chunk_overlap: config.chunk_overlap,
        entry_count: 0,
        built_at: Utc::now(),
        degraded,
    }
}

/// Write an empty, degraded index for a build whose embedding provider could
/// not be constructed (model host or endpoint unreachable).
///
/// Sources are still scanned and chunked so the report says what was left
/// out. The manifest records the model `config.embedding` names, so a later
/// build with a working provider replaces it cleanly.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] for a missing source directory or bad
/// pattern, and [`RagError::IndexError`] if the artifact cannot be written.
pub fn write_degraded_index(
    config: &RagConfig,
    source_dir: &Path,
    pattern: &str,
    output: &Path,
    cause: &RagError,
) -> Result<IndexReport> {
    warn!(error = %cause, output = %output.display(), "embedding provider unavailable; writing an empty index");
    let scan = discover_documents(source_dir, pattern)?;
    let chunker = chunker_for(config);
    let chunks_skipped = scan.documents.iter().map(|doc| chunker.chunk(doc).len()).sum();

    let manifest = new_manifest(config, &config.embedding.model_id(), config.embedding.expected_dimensions(), true);
    let artifact = IndexArtifact::new(manifest, Vec::new());
    let path = artifact.write(output)?;

    Ok(IndexReport {
        path,
        documents_indexed: 0,
        files_skipped: scan.skipped.len(),
        chunks_indexed: 0,
        chunks_skipped,
        timed_out: false,
        degraded: true,
    })
}

/// Builds index artifacts. The only writer of the index.
pub struct Indexer {
    config: RagConfig,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
}

impl Indexer {
    /// Create an indexer using the chunking strategy named in `config`.
    pub fn new(config: &RagConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { config: config.clone(), provider, chunker: chunker_for(config) }
    }

    /// Replace the chunker.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Index every file under `source_dir` matching `pattern` into `output`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for a missing source directory or bad
    /// pattern, and [`RagError::IndexError`] if the artifact cannot be written.
    /// Read and embedding failures never fail the build.
    pub async fn build(&self, source_dir: &Path, pattern: &str, output: &Path) -> Result<IndexReport> {
        info!(source = %source_dir.display(), pattern, output = %output.display(), "building index");
        let scan = discover_documents(source_dir, pattern)?;
        if scan.documents.is_empty() {
            warn!(source = %source_dir.display(), pattern, "no documents found to index");
        }
        let report = self.index_documents(&scan.documents, scan.skipped.len(), output).await?;

        info!(
            chunks_indexed = report.chunks_indexed,
            documents_indexed = report.documents_indexed,
            files_skipped = report.files_skipped,
            chunks_skipped = report.chunks_skipped,
            degraded = report.degraded,
            "index build finished"
        );
        Ok(report)
    }

    /// Chunk, embed, and persist already-loaded documents.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the artifact cannot be written.
    pub async fn build_from_documents(&self, documents: &[Document], output: &Path) -> Result<IndexReport> {
        self.index_documents(documents, 0, output).await
    }

    async fn index_documents(
        &self,
        documents: &[Document],
        files_skipped: usize,
        output: &Path,
    ) -> Result<IndexReport> {
        let mut chunks: Vec<Chunk> = Vec::new();
        for document in documents {
            let doc_chunks = self.chunker.chunk(document);
            info!(document.id = %document.id, chunk_count = doc_chunks.len(), "chunked document");
            chunks.extend(doc_chunks);
        }

        let total = chunks.len();
        let (entries, timed_out) = self.embed_chunks(chunks).await;
        let (entries, dimensions) = self.enforce_dimensions(entries);
        let chunks_skipped = total - entries.len();

        if total > 0 && entries.is_empty() {
            warn!(chunks = total, "every embedding attempt failed; writing an empty index");
        }

        let mut documents_indexed: Vec<&str> = entries.iter().map(|e| e.chunk.source_id.as_str()).collect();
        documents_indexed.dedup();
        let documents_indexed = documents_indexed.len();

        let manifest = new_manifest(
            &self.config,
            self.provider.model_id(),
            dimensions,
            files_skipped > 0 || chunks_skipped > 0 || timed_out,
        );
        let artifact = IndexArtifact::new(manifest, entries);
        let path = artifact.write(output)?;

        Ok(IndexReport {
            path,
            documents_indexed,
            files_skipped,
            chunks_indexed: artifact.entries.len(),
            chunks_skipped,
            timed_out,
            degraded: artifact.manifest.degraded,
        })
    }

    /// Embed chunks with bounded concurrency, keeping their order.
    ///
    /// Chunks whose embedding fails after retries, or that are still pending
    /// when the build deadline passes, are dropped.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> (Vec<IndexEntry>, bool) {
        let deadline = tokio::time::Instant::now() + self.config.build_timeout;
        let provider: &dyn EmbeddingProvider = self.provider.as_ref();
        let policy = &self.config.build_retry;

        let outcomes: Vec<(Chunk, Result<Vec<f32>>, bool)> = futures::stream::iter(chunks)
            .map(|chunk| async move {
                match tokio::time::timeout_at(deadline, embed_with_retry(provider, &chunk.text, policy)).await {
                    Ok(result) => (chunk, result, false),
                    Err(_) => {
                        let err = RagError::embedding(provider.model_id(), "build deadline elapsed");
                        (chunk, Err(err), true)
                    }
                }
            })
            .buffered(self.config.embed_concurrency.max(1))
            .collect()
            .await;

        let mut timed_out = false;
        let mut entries = Vec::with_capacity(outcomes.len());
        for (chunk, result, deadline_hit) in outcomes {
            timed_out |= deadline_hit;
            match result {
                Ok(embedding) => entries.push(IndexEntry { chunk, embedding }),
                Err(e) => warn!(chunk.id = %chunk.id, error = %e, "skipping chunk"),
            }
        }
        (entries, timed_out)
    }

    /// Drop entries whose vector length disagrees with the first usable vector.
    fn enforce_dimensions(&self, entries: Vec<IndexEntry>) -> (Vec<IndexEntry>, usize) {
        let dimensions = entries
            .iter()
            .map(|e| e.embedding.len())
            .find(|len| *len > 0)
            .unwrap_or_else(|| self.provider.dimensions());
        if dimensions != self.provider.dimensions() {
            warn!(
                reported = self.provider.dimensions(),
                observed = dimensions,
                "provider returned vectors of unexpected length; recording observed dimensions"
            );
        }

        let kept = entries
            .into_iter()
            .filter(|e| {
                let ok = e.embedding.len() == dimensions;
                if !ok {
                    warn!(chunk.id = %e.chunk.id, len = e.embedding.len(), dimensions, "skipping chunk with inconsistent embedding length");
                }
                ok
            })
            .collect();
        (kept, dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_matches_names_recursively_and_sorts() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("b.md"), "bee").unwrap();
        fs::write(root.join("nested/a.md"), "ay").unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();
        fs::write(root.join("empty.md"), "  \n").unwrap();

        let scan = discover_documents(root, "*.md").unwrap();
        let ids: Vec<_> = scan.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b.md", "nested/a.md"]);
        assert!(scan.skipped.is_empty());
        assert_eq!(scan.documents[0].format, DocumentFormat::Markdown);
        assert_eq!(scan.documents[1].metadata.get("source").map(String::as_str), Some("a.md"));
    }

    #[test]
    fn path_patterns_match_relative_paths() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("faq")).unwrap();
        fs::write(root.join("faq/q.md"), "question").unwrap();
        fs::write(root.join("top.md"), "top").unwrap();

        let scan = discover_documents(root, "faq/*.md").unwrap();
        assert_eq!(scan.documents.len(), 1);
        assert_eq!(scan.documents[0].id, "faq/q.md");
    }

    #[test]
    fn invalid_utf8_is_a_read_error() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("bad.md"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let scan = discover_documents(temp.path(), "*.md").unwrap();
        assert!(scan.documents.is_empty());
        assert!(matches!(scan.skipped.as_slice(), [RagError::ReadError { .. }]));
    }

    #[test]
    fn missing_directory_and_bad_pattern_are_config_errors() {
        let temp = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_documents(&temp.path().join("nope"), "*.md"),
            Err(RagError::ConfigError(_))
        ));
        assert!(matches!(discover_documents(temp.path(), "[*.md"), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn byte_order_mark_is_stripped() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("bom.md"), "\u{feff}hello").unwrap();
        let scan = discover_documents(temp.path(), "*.md").unwrap();
        assert_eq!(scan.documents[0].text, "hello");
    }
}
