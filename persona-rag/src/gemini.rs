//! Gemini embedding provider using the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-embedding-001";

/// The purpose the embedding is computed for; Gemini tunes vectors per task.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Vectors for documents stored in the index.
    RetrievalDocument,
    /// Vectors for search queries.
    RetrievalQuery,
    /// Vectors compared symmetrically.
    SemanticSimilarity,
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// # Configuration
///
/// - `task_type` – defaults to [`TaskType::SemanticSimilarity`] so the same
///   provider can serve both the Indexer and the Retriever.
/// - `output_dimensionality` – optional truncation of the output vector.
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    model_id: String,
    task_type: TaskType,
    output_dimensionality: Option<usize>,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Default embedding dimensions for `gemini-embedding-001`.
    const DEFAULT_DIMENSIONS: usize = 3072;

    /// Create a new provider using the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.into(),
            model_id: format!("gemini/{DEFAULT_MODEL}"),
            task_type: TaskType::SemanticSimilarity,
            output_dimensionality: None,
            dimensions: Self::DEFAULT_DIMENSIONS,
        })
    }

    /// Create a new provider from `GOOGLE_API_KEY` or `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                RagError::ConfigError("GOOGLE_API_KEY or GEMINI_API_KEY must be set".into())
            })?;
        Self::new(api_key)
    }

    /// Set the model name (e.g. `text-embedding-004`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.model_id = format!("gemini/{}", self.model);
        self
    }

    /// Set the task type used for embedding requests.
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Set the output dimensionality (truncates the embedding vector).
    pub fn with_output_dimensionality(mut self, dims: usize) -> Self {
        self.output_dimensionality = Some(dims);
        self.dimensions = dims;
        self
    }

    fn request<'a>(&'a self, text: &'a str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: format!("models/{}", self.model),
            content: Content { parts: vec![Part { text }] },
            task_type: self.task_type,
            output_dimensionality: self.output_dimensionality,
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, method: &str, body: &B) -> Result<R> {
        let url = format!("{GEMINI_BASE_URL}/models/{}:{method}", self.model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = "Gemini", error = %e, "embedding request failed");
                RagError::embedding("Gemini", format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(provider = "Gemini", %status, "API error");
            return Err(RagError::from_http_status("Gemini", status.as_u16(), body));
        }

        response.json::<R>().await.map_err(|e| {
            error!(provider = "Gemini", error = %e, "failed to parse response");
            RagError::embedding("Gemini", format!("failed to parse response: {e}"))
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<ContentEmbedding>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "Gemini", text_len = text.len(), "embedding single text");
        let response: EmbedContentResponse = self.post("embedContent", &self.request(text)).await?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = "Gemini", batch_size = texts.len(), "embedding batch");
        let body = BatchEmbedRequest { requests: texts.iter().map(|t| self.request(t)).collect() };
        let response: BatchEmbedResponse = self.post("batchEmbedContents", &body).await?;
        if response.embeddings.len() != texts.len() {
            return Err(RagError::embedding(
                "Gemini",
                format!("expected {} embeddings, got {}", texts.len(), response.embeddings.len()),
            ));
        }
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_in_camel_case() {
        let provider = GeminiEmbeddingProvider::new("key").unwrap().with_output_dimensionality(768);
        let json = serde_json::to_value(provider.request("hello")).unwrap();
        assert_eq!(json["model"], "models/gemini-embedding-001");
        assert_eq!(json["taskType"], "SEMANTIC_SIMILARITY");
        assert_eq!(json["outputDimensionality"], 768);
        assert_eq!(json["content"]["parts"][0]["text"], "hello");
        assert_eq!(provider.dimensions(), 768);
    }
}
