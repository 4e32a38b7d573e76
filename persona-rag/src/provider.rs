//! Selection of the embedding backend from configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::hashing::HashingEmbeddingProvider;

/// The embedding backends this crate knows how to construct.
///
/// The default is [`FastEmbed`](EmbeddingBackend::FastEmbed) when the
/// `fastembed` feature is compiled in and [`Hashing`](EmbeddingBackend::Hashing)
/// otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// [`HashingEmbeddingProvider`], offline and deterministic.
    Hashing,
    /// OpenAI embeddings API (feature `openai`).
    #[serde(rename = "openai")]
    OpenAI,
    /// Gemini embeddings API (feature `gemini`).
    Gemini,
    /// Local ONNX model through FastEmbed (feature `fastembed`).
    #[serde(rename = "fastembed")]
    FastEmbed,
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        if cfg!(feature = "fastembed") { EmbeddingBackend::FastEmbed } else { EmbeddingBackend::Hashing }
    }
}

impl EmbeddingBackend {
    /// The model used when none is configured. The hashing backend has none.
    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            EmbeddingBackend::Hashing => None,
            EmbeddingBackend::OpenAI => Some("text-embedding-3-small"),
            EmbeddingBackend::Gemini => Some("gemini-embedding-001"),
            EmbeddingBackend::FastEmbed => Some("BAAI/bge-small-en-v1.5"),
        }
    }

    /// The name used in configuration values.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingBackend::Hashing => "hashing",
            EmbeddingBackend::OpenAI => "openai",
            EmbeddingBackend::Gemini => "gemini",
            EmbeddingBackend::FastEmbed => "fastembed",
        }
    }
}

impl std::fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashing" | "hash" => Ok(EmbeddingBackend::Hashing),
            "openai" => Ok(EmbeddingBackend::OpenAI),
            "gemini" | "google" => Ok(EmbeddingBackend::Gemini),
            "fastembed" | "local" => Ok(EmbeddingBackend::FastEmbed),
            other => Err(format!("unknown embedding provider '{other}'")),
        }
    }
}

/// Which embedding backend and model to build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EmbeddingConfig {
    /// The backend to use.
    pub backend: EmbeddingBackend,
    /// Model name override; each backend has its own default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Output dimensionality override, where the backend supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

impl EmbeddingConfig {
    /// The model name the backend will use.
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().or(self.backend.default_model())
    }

    /// The [`model_id`](EmbeddingProvider::model_id) a provider built from
    /// this configuration reports.
    pub fn model_id(&self) -> String {
        match (self.backend, self.model_name()) {
            (EmbeddingBackend::Hashing, _) | (_, None) => {
                HashingEmbeddingProvider::new(self.expected_dimensions()).model_id().to_string()
            }
            (backend, Some(model)) => format!("{backend}/{model}"),
        }
    }

    /// The vector length a provider built from this configuration produces.
    pub fn expected_dimensions(&self) -> usize {
        if let Some(dims) = self.dimensions {
            return dims;
        }
        match self.backend {
            EmbeddingBackend::Hashing => HashingEmbeddingProvider::DEFAULT_DIMENSIONS,
            EmbeddingBackend::OpenAI => 1536,
            EmbeddingBackend::Gemini => 3072,
            EmbeddingBackend::FastEmbed => {
                self.model_name().and_then(fastembed_dimensions).unwrap_or(384)
            }
        }
    }
}

/// Output length of the local models FastEmbed can load.
pub(crate) fn fastembed_dimensions(model: &str) -> Option<usize> {
    match model {
        "BAAI/bge-small-en-v1.5" | "sentence-transformers/all-MiniLM-L6-v2" => Some(384),
        "BAAI/bge-base-en-v1.5" => Some(768),
        "BAAI/bge-large-en-v1.5" => Some(1024),
        _ => None,
    }
}

/// Construct the configured [`EmbeddingProvider`].
///
/// Hosted backends read their API keys from the environment
/// (`OPENAI_API_KEY`, `GOOGLE_API_KEY`/`GEMINI_API_KEY`).
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] when the backend was not compiled in or
/// its API key is missing, and [`RagError::EmbeddingUnavailable`] when a
/// local model cannot be downloaded or loaded.
pub fn build_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.backend {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbeddingProvider::new(
            config.dimensions.unwrap_or(HashingEmbeddingProvider::DEFAULT_DIMENSIONS),
        ))),
        EmbeddingBackend::OpenAI => build_openai(config),
        EmbeddingBackend::Gemini => build_gemini(config),
        EmbeddingBackend::FastEmbed => build_fastembed(config),
    }
}

#[cfg(feature = "openai")]
fn build_openai(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let mut provider = crate::openai::OpenAIEmbeddingProvider::from_env()?;
    if let Some(model) = &config.model {
        provider = provider.with_model(model.clone());
    }
    if let Some(dims) = config.dimensions {
        provider = provider.with_dimensions(dims);
    }
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "openai"))]
fn build_openai(_config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(missing_feature(EmbeddingBackend::OpenAI))
}

#[cfg(feature = "gemini")]
fn build_gemini(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let mut provider = crate::gemini::GeminiEmbeddingProvider::from_env()?;
    if let Some(model) = &config.model {
        provider = provider.with_model(model.clone());
    }
    if let Some(dims) = config.dimensions {
        provider = provider.with_output_dimensionality(dims);
    }
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "gemini"))]
fn build_gemini(_config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(missing_feature(EmbeddingBackend::Gemini))
}

#[cfg(feature = "fastembed")]
fn build_fastembed(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let model = config.model_name().unwrap_or(crate::fastembed::DEFAULT_MODEL);
    Ok(Arc::new(crate::fastembed::FastEmbedProvider::new(model)?))
}

#[cfg(not(feature = "fastembed"))]
fn build_fastembed(_config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(missing_feature(EmbeddingBackend::FastEmbed))
}

#[allow(dead_code)]
fn missing_feature(backend: EmbeddingBackend) -> RagError {
    RagError::ConfigError(format!(
        "embedding provider '{backend}' requires the `{backend}` cargo feature"
    ))
}
