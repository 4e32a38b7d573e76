//! Fake embedding providers shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use persona_rag::{EmbeddingProvider, HashingEmbeddingProvider, RagError, Result, RetryPolicy};

/// Delegates to a [`HashingEmbeddingProvider`] and counts calls.
pub struct CountingProvider {
    inner: HashingEmbeddingProvider,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { inner: HashingEmbeddingProvider::new(dimensions), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

/// Always fails: with a retryable error, or as a rejected request.
pub struct FailingProvider {
    model_id: String,
    dimensions: usize,
    rejected: bool,
    calls: AtomicUsize,
}

impl FailingProvider {
    /// Pretend to be the model a hashing provider of `dimensions` reports.
    pub fn impersonating(dimensions: usize) -> Self {
        Self {
            model_id: HashingEmbeddingProvider::new(dimensions).model_id().to_string(),
            dimensions,
            rejected: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Like [`FailingProvider::impersonating`], answering every call with HTTP 401.
    pub fn rejecting(dimensions: usize) -> Self {
        Self { rejected: true, ..Self::impersonating(dimensions) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.rejected {
            return Err(RagError::from_http_status(self.model_id.clone(), 401, "invalid api key"));
        }
        Err(RagError::EmbeddingUnavailable {
            provider: self.model_id.clone(),
            message: "service unavailable".into(),
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Fails the first `failures` calls, then behaves like a hashing provider.
pub struct FlakyProvider {
    inner: HashingEmbeddingProvider,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyProvider {
    pub fn new(dimensions: usize, failures: usize) -> Self {
        Self { inner: HashingEmbeddingProvider::new(dimensions), failures, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(RagError::EmbeddingUnavailable {
                provider: self.model_id().to_string(),
                message: format!("transient failure #{}", call + 1),
            });
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

/// Maps texts to fixed vectors by keyword; unmatched text gets the zero vector.
pub struct FixedVectorProvider {
    vectors: Vec<(String, Vec<f32>)>,
    dimensions: usize,
}

impl FixedVectorProvider {
    pub fn new(vectors: Vec<(&str, Vec<f32>)>) -> Self {
        let dimensions = vectors.first().map(|(_, v)| v.len()).unwrap_or(0);
        Self { vectors: vectors.into_iter().map(|(k, v)| (k.to_string(), v)).collect(), dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedVectorProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self
            .vectors
            .iter()
            .find(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| vec![0.0; self.dimensions]);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "fixed-vectors"
    }
}

/// Never answers within any reasonable deadline.
pub struct SlowProvider {
    inner: HashingEmbeddingProvider,
    delay: Duration,
}

impl SlowProvider {
    pub fn new(dimensions: usize, delay: Duration) -> Self {
        Self { inner: HashingEmbeddingProvider::new(dimensions), delay }
    }
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

/// A retry policy that retries immediately.
pub fn instant_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        attempt_timeout: Duration::from_secs(5),
    }
}

/// Write `files` (relative path, contents) under `dir`.
pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (name, contents) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}
