//! The persisted, file-backed vector index.
//!
//! An index lives in a directory and consists of one JSON table file per table
//! (`<index_path>/<table>.json`). The file is self-describing: an
//! [`IndexManifest`] records the embedding model, dimensionality and metric
//! alongside the [`IndexEntry`] rows, so opening it needs no external schema.
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the table file, so readers only ever see a complete index.
//!
//! ```text
//! knowledge_base/
//! └── documents.json   { "manifest": {...}, "entries": [ {...}, ... ] }
//! ```

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::{IndexEntry, SearchResult};
use crate::error::{RagError, Result};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Similarity metric the stored vectors are meant to be compared with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine similarity in `[-1, 1]`.
    #[default]
    Cosine,
}

/// Self-describing header of an index table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// On-disk format version.
    pub format_version: u32,
    /// Table name.
    pub table: String,
    /// Identifier of the embedding model that produced every vector.
    pub embedding_model: String,
    /// Length of every stored vector.
    pub dimensions: usize,
    /// Metric used for search.
    pub metric: SimilarityMetric,
    /// Chunk size used at build time.
    pub chunk_size: usize,
    /// Chunk overlap used at build time.
    pub chunk_overlap: usize,
    /// Number of entries in the table.
    pub entry_count: usize,
    /// When the build finished.
    pub built_at: DateTime<Utc>,
    /// Whether some documents or chunks were dropped during the build.
    pub degraded: bool,
}

/// A complete index table: manifest plus entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexArtifact {
    /// The table header.
    pub manifest: IndexManifest,
    /// The stored chunks, sorted by `(source_id, ordinal)`.
    pub entries: Vec<IndexEntry>,
}

/// Path of the table file for `table` inside `index_path`.
pub fn table_path(index_path: &Path, table: &str) -> PathBuf {
    index_path.join(format!("{table}.json"))
}

impl IndexArtifact {
    /// Assemble an artifact, sorting entries into their canonical order.
    pub fn new(mut manifest: IndexManifest, mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.chunk.source_id.cmp(&b.chunk.source_id).then(a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        manifest.entry_count = entries.len();
        Self { manifest, entries }
    }

    /// Write the artifact to `<index_path>/<table>.json`, replacing any
    /// existing table atomically.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the directory cannot be created or
    /// the file cannot be written or renamed.
    pub fn write(&self, index_path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(index_path).map_err(|e| RagError::index(index_path, e))?;
        let target = table_path(index_path, &self.manifest.table);

        let tmp = tempfile::NamedTempFile::new_in(index_path).map_err(|e| RagError::index(index_path, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, self).map_err(|e| RagError::index(&target, e))?;
            writer.flush().map_err(|e| RagError::index(&target, e))?;
        }
        tmp.as_file().sync_all().map_err(|e| RagError::index(&target, e))?;
        tmp.persist(&target).map_err(|e| RagError::index(&target, e.error))?;

        info!(
            path = %target.display(),
            entries = self.entries.len(),
            model = %self.manifest.embedding_model,
            "wrote index artifact"
        );
        Ok(target)
    }

    /// Read a table file.
    ///
    /// Returns `Ok(None)` when the file does not exist or is zero bytes long,
    /// both of which denote an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the file cannot be read, is not a
    /// valid index, or uses an unsupported format version.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "index table not found");
                return Ok(None);
            }
            Err(e) => return Err(RagError::index(path, e)),
        };
        let len = file.metadata().map_err(|e| RagError::index(path, e))?.len();
        if len == 0 {
            return Ok(None);
        }

        let artifact: IndexArtifact =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| RagError::index(path, e))?;
        if artifact.manifest.format_version != FORMAT_VERSION {
            return Err(RagError::index(
                path,
                format!("unsupported format version {}", artifact.manifest.format_version),
            ));
        }
        if let Some(bad) = artifact.entries.iter().find(|e| e.embedding.len() != artifact.manifest.dimensions) {
            return Err(RagError::index(
                path,
                format!(
                    "entry '{}' has {} dims, manifest says {}",
                    bad.chunk.id,
                    bad.embedding.len(),
                    artifact.manifest.dimensions
                ),
            ));
        }
        Ok(Some(artifact))
    }
}

/// Compute cosine similarity between two vectors.
///
/// Accumulates in `f64`. Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Rank `entries` against `embedding`.
///
/// Keeps entries scoring at least `threshold`, orders them by descending score
/// with ties kept in storage order, and returns at most `top_k`.
pub fn search(entries: &[IndexEntry], embedding: &[f32], top_k: usize, threshold: f32) -> Vec<SearchResult> {
    let mut scored: Vec<SearchResult> = entries
        .iter()
        .filter_map(|entry| {
            let score = cosine_similarity(&entry.embedding, embedding);
            (score >= threshold).then(|| SearchResult { chunk: entry.chunk.clone(), score })
        })
        .collect();

    // `sort_by` is stable, which keeps equal scores in insertion order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}
