//! Data types for documents, chunks, index entries, and search results.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The kind of text a [`Document`] holds, derived from its file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Markdown prose (`.md`, `.markdown`).
    Markdown,
    /// Plain text, and anything without a recognised extension.
    #[default]
    Plain,
    /// Structured data files (`.json`, `.yaml`, `.yml`, `.toml`, `.csv`).
    Structured,
}

impl DocumentFormat {
    /// Guess the format from a file path's extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" => DocumentFormat::Markdown,
            "json" | "yaml" | "yml" | "toml" | "csv" => DocumentFormat::Structured,
            _ => DocumentFormat::Plain,
        }
    }

    /// The lowercase name stored in chunk metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Plain => "plain",
            DocumentFormat::Structured => "structured",
        }
    }
}

/// A source document read once at index-build time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier of the document, the path relative to the source directory.
    pub id: String,
    /// The full text content of the document.
    pub text: String,
    /// Format tag used to pick chunk metadata and chunking hints.
    pub format: DocumentFormat,
    /// Key-value metadata inherited by every chunk.
    pub metadata: BTreeMap<String, String>,
    /// Optional URI pointing to the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    /// Create a document with no extra metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>, format: DocumentFormat) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            format,
            metadata: BTreeMap::new(),
            source_uri: None,
        }
    }
}

/// A contiguous span of a [`Document`]'s text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, `{source_id}#{ordinal}`.
    pub id: String,
    /// The trimmed chunk text. Never empty.
    pub text: String,
    /// The ID of the parent [`Document`].
    pub source_id: String,
    /// Position of this chunk within its document, starting at zero.
    pub ordinal: usize,
    /// Byte offset in the document where the chunk's body starts.
    pub start: usize,
    /// Byte offset in the document where the chunk's body ends (exclusive).
    pub end: usize,
    /// Metadata inherited from the document plus chunk-specific fields.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A [`Chunk`] paired with its embedding, as stored in the index artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The indexed chunk.
    #[serde(flatten)]
    pub chunk: Chunk,
    /// The vector embedding of the chunk text.
    pub embedding: Vec<f32>,
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The cosine similarity score (higher is more relevant).
    pub score: f32,
}
