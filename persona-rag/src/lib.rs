//! # persona-rag
//!
//! Retrieval-augmented generation for persona voice agents.
//!
//! Knowledge files describing a persona are chunked, embedded and written to
//! a small file-backed vector index at build time by the [`Indexer`]. At run
//! time the [`Retriever`] answers each user utterance with the closest
//! snippets, and [`KnowledgeContext`] folds them into the LLM prompt.
//!
//! ## Features
//!
//! - **Deterministic offline embeddings**: [`HashingEmbeddingProvider`] needs
//!   no model download or network access
//! - **Hosted embeddings**: OpenAI (`openai`) and Gemini (`gemini`)
//! - **Local models**: FastEmbed ONNX models (`fastembed`)
//! - **Graceful degradation**: a failed build still ships a valid, possibly
//!   empty, index and a failed query yields no context instead of an error
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use persona_rag::{HashingEmbeddingProvider, Indexer, RagConfig, Retriever};
//!
//! #[tokio::main]
//! async fn main() -> persona_rag::Result<()> {
//!     let config = RagConfig::builder().index_path("./knowledge_base").build()?;
//!     let provider = Arc::new(HashingEmbeddingProvider::default());
//!
//!     let indexer = Indexer::new(&config, provider.clone());
//!     indexer.build("./knowledge".as_ref(), "*.md", &config.index_path).await?;
//!
//!     let retriever = Retriever::open(&config, provider)?;
//!     for result in retriever.retrieve_default("where did you grow up?").await? {
//!         println!("[{:.3}] {}", result.score, result.chunk.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod index;
pub mod indexer;
pub mod provider;
pub mod retriever;
pub mod retry;

#[cfg(feature = "fastembed")]
pub mod fastembed;
#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, ChunkingStrategy, MarkdownChunker, RecursiveChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use context::{ChatMessage, ContextStrategy, KnowledgeContext, augment_messages, format_context};
pub use document::{Chunk, Document, DocumentFormat, IndexEntry, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use hashing::HashingEmbeddingProvider;
pub use index::{IndexArtifact, IndexManifest, SimilarityMetric, cosine_similarity};
pub use indexer::{DocumentScan, IndexReport, Indexer, discover_documents, write_degraded_index};
pub use provider::{EmbeddingBackend, EmbeddingConfig, build_embedding_provider};
pub use retriever::Retriever;
pub use retry::RetryPolicy;

#[cfg(feature = "fastembed")]
pub use self::fastembed::FastEmbedProvider;
#[cfg(feature = "gemini")]
pub use gemini::GeminiEmbeddingProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
