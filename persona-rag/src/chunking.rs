//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`]: a size-bounded sliding window that prefers
//!   paragraph breaks, then sentence breaks, then whitespace, before falling
//!   back to a hard cut
//! - [`MarkdownChunker`]: splits by markdown headings first, prefixing each
//!   chunk with its heading path
//!
//! Sizes and overlaps are measured in bytes of UTF-8 text; cuts always land on
//! char boundaries.

use serde::{Deserialize, Serialize};

use crate::document::{Chunk, Document};

/// A strategy for splitting documents into chunks.
///
/// Implementations never return chunks whose text is empty or whitespace-only.
/// Ordinals are assigned in document order starting at zero.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Which [`Chunker`] the Indexer uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// [`RecursiveChunker`].
    #[default]
    Recursive,
    /// [`MarkdownChunker`] for markdown documents, [`RecursiveChunker`] otherwise.
    Markdown,
}

impl std::str::FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(ChunkingStrategy::Recursive),
            "markdown" => Ok(ChunkingStrategy::Markdown),
            other => Err(format!("unknown chunking strategy '{other}'")),
        }
    }
}

/// Splits text into windows of at most `chunk_size` bytes.
///
/// Consecutive windows share `chunk_overlap` bytes. Within each window the cut
/// is placed at the last paragraph break (`\n\n`), else the last sentence end
/// (`. `, `! `, `? ` or a newline), else the last whitespace, else exactly at
/// the window edge. Each chunk is trimmed; its `start`/`end` fields locate the
/// trimmed text in the document.
///
/// # Example
///
/// ```rust,ignore
/// use persona_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(512, 64);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of bytes per chunk
    /// * `chunk_overlap`: number of bytes repeated at the start of the next chunk
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (start, end) in window_spans(&document.text, 0, self.chunk_size, self.chunk_overlap) {
            if let Some((start, end)) = trim_span(&document.text, start, end) {
                let ordinal = chunks.len();
                chunks.push(make_chunk(document, ordinal, start, end, document.text[start..end].to_string()));
            }
        }
        chunks
    }
}

/// Splits markdown by headings, keeping each section together where it fits.
///
/// Every chunk text is prefixed with the section's heading path
/// (`Experience > Projects`), which is also recorded under the `header_path`
/// metadata key. Sections larger than `chunk_size` are windowed with the same
/// rules as [`RecursiveChunker`]. Lines inside fenced code blocks are never
/// treated as headings. Non-markdown documents fall back to the recursive
/// behaviour.
#[derive(Debug, Clone)]
pub struct MarkdownChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl MarkdownChunker {
    /// Create a new `MarkdownChunker`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

impl MarkdownChunker {
    /// Smallest body window a heading prefix may leave in a chunk.
    fn min_body_window(&self) -> usize {
        (self.chunk_size / 2).max((self.chunk_overlap + 4).min(self.chunk_size))
    }

    /// The heading path as it is written in front of each chunk body.
    ///
    /// Paths too long for the chunk budget are cut at a char boundary; the
    /// full path is still recorded in the `header_path` metadata.
    fn heading_prefix<'a>(&self, header_path: &'a str) -> &'a str {
        let budget = self.chunk_size.saturating_sub(self.min_body_window());
        if header_path.len() < budget {
            return header_path;
        }
        let cut = floor_char_boundary(header_path, budget.saturating_sub(1));
        header_path[..cut].trim_end()
    }
}

/// A markdown section: heading hierarchy plus the byte span of its body.
struct MarkdownSection {
    header_path: String,
    body_start: usize,
    body_end: usize,
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
        Some((level, rest.trim()))
    } else {
        None
    }
}

/// Parse markdown text into sections split by headings.
fn parse_markdown_sections(text: &str) -> Vec<MarkdownSection> {
    let mut sections = Vec::new();
    let mut headers: Vec<String> = Vec::new();
    let mut header_path = String::new();
    let mut body_start = 0;
    let mut offset = 0;
    let mut in_fence = false;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some((level, title)) = heading_level(line.trim_end()) else {
            continue;
        };

        sections.push(MarkdownSection {
            header_path: header_path.clone(),
            body_start,
            body_end: line_start,
        });

        headers.truncate(level - 1);
        headers.push(title.to_string());
        header_path = headers.iter().filter(|h| !h.is_empty()).cloned().collect::<Vec<_>>().join(" > ");
        body_start = offset;
    }

    sections.push(MarkdownSection { header_path, body_start, body_end: text.len() });
    sections
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        if document.format != crate::document::DocumentFormat::Markdown {
            return RecursiveChunker::new(self.chunk_size, self.chunk_overlap).chunk(document);
        }

        let text = &document.text;
        let mut chunks = Vec::new();

        for section in parse_markdown_sections(text) {
            let body = &text[section.body_start..section.body_end];
            if body.trim().is_empty() {
                continue;
            }

            let prefix = self.heading_prefix(&section.header_path);
            let prefix_len = if prefix.is_empty() { 0 } else { prefix.len() + 1 };
            let window = self.chunk_size.saturating_sub(prefix_len);

            for (start, end) in window_spans(body, section.body_start, window, self.chunk_overlap) {
                let Some((start, end)) = trim_span(text, start, end) else {
                    continue;
                };
                let body_text = &text[start..end];
                let chunk_text = if prefix.is_empty() {
                    body_text.to_string()
                } else {
                    format!("{prefix}\n{body_text}")
                };

                let ordinal = chunks.len();
                let mut chunk = make_chunk(document, ordinal, start, end, chunk_text);
                chunk.metadata.insert("header_path".to_string(), section.header_path.clone());
                chunks.push(chunk);
            }
        }

        chunks
    }
}

fn make_chunk(document: &Document, ordinal: usize, start: usize, end: usize, text: String) -> Chunk {
    let mut metadata = document.metadata.clone();
    metadata.insert("chunk_index".to_string(), ordinal.to_string());
    metadata.insert("format".to_string(), document.format.as_str().to_string());
    Chunk {
        id: format!("{}#{ordinal}", document.id),
        text,
        source_id: document.id.clone(),
        ordinal,
        start,
        end,
        metadata,
    }
}

/// Shrink `[start, end)` to exclude surrounding whitespace.
///
/// Returns `None` when nothing but whitespace remains.
fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    Some((start + lead, start + lead + trimmed.len()))
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Compute the raw (untrimmed) window spans over `text`, offset by `base`.
///
/// Spans are contiguous-or-overlapping: each span starts at most
/// `chunk_overlap` bytes before the previous one ended, so their union covers
/// the whole text.
fn window_spans(text: &str, base: usize, chunk_size: usize, chunk_overlap: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if text.trim().is_empty() {
        return spans;
    }

    let mut start = 0;
    while start < text.len() {
        if text.len() - start <= chunk_size {
            spans.push((base + start, base + text.len()));
            break;
        }

        let mut window_end = floor_char_boundary(text, start + chunk_size);
        if window_end <= start {
            window_end = ceil_char_boundary(text, start + 1);
        }

        // Breaks must leave more than `chunk_overlap` bytes behind so the next
        // window always starts further along.
        let search_from = ceil_char_boundary(text, (start + chunk_overlap + 1).min(window_end));
        let end = find_break(text, search_from, window_end).unwrap_or(window_end);
        spans.push((base + start, base + end));

        let mut next = ceil_char_boundary(text, end.saturating_sub(chunk_overlap));
        if next <= start || next > end {
            next = end;
        }
        start = next;
    }

    spans
}

/// Find the preferred cut in `text[from..to]`, returned as an absolute end offset.
fn find_break(text: &str, from: usize, to: usize) -> Option<usize> {
    if from >= to {
        return None;
    }
    let region = &text[from..to];

    if let Some(pos) = region.rfind("\n\n") {
        return Some(from + pos + 2);
    }

    let sentence = [". ", "! ", "? ", ".\n", "!\n", "?\n", "\n"]
        .iter()
        .filter_map(|sep| region.rfind(sep))
        .max();
    if let Some(pos) = sentence {
        return Some(from + pos + 1);
    }

    region
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(pos, c)| from + pos + c.len_utf8())
}
