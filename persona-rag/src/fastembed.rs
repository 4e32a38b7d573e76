//! Local embedding provider running an ONNX model through FastEmbed.
//!
//! This module is only available when the `fastembed` feature is enabled.
//! Model weights are downloaded on first use and cached by FastEmbed.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::provider::fastembed_dimensions;

/// The default local model.
pub const DEFAULT_MODEL: &str = "BAAI/bge-small-en-v1.5";

fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    let model = match name {
        "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "BAAI/bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
        "sentence-transformers/all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
        other => return Err(RagError::ConfigError(format!("unsupported fastembed model '{other}'"))),
    };
    let dimensions = fastembed_dimensions(name)
        .ok_or_else(|| RagError::ConfigError(format!("unknown dimensions for fastembed model '{name}'")))?;
    Ok((model, dimensions))
}

/// An [`EmbeddingProvider`] that runs a sentence-embedding model in process.
///
/// Inference is blocking, so calls are moved onto tokio's blocking pool.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_id: String,
    dimensions: usize,
}

impl FastEmbedProvider {
    /// Load the named model.
    pub fn new(model_name: &str) -> Result<Self> {
        let (model, dimensions) = resolve_model(model_name)?;
        let embedding = TextEmbedding::try_new(InitOptions::new(model)).map_err(|e| {
            RagError::embedding("FastEmbed", format!("failed to load '{model_name}': {e}"))
        })?;
        info!(model = model_name, dimensions, "loaded local embedding model");
        Ok(Self { model: Arc::new(embedding), model_id: format!("fastembed/{model_name}"), dimensions })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| RagError::embedding("FastEmbed", "model returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = "FastEmbed", batch_size = texts.len(), "embedding batch");

        let model = Arc::clone(&self.model);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        tokio::task::spawn_blocking(move || model.embed(owned, None))
            .await
            .map_err(|e| RagError::embedding("FastEmbed", format!("embedding task failed: {e}")))?
            .map_err(|e| RagError::embedding("FastEmbed", e.to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
