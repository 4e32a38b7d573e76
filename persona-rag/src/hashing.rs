//! Deterministic lexical embeddings that need no model or network.
//!
//! [`HashingEmbeddingProvider`] uses the hashing trick: every lower-cased
//! alphanumeric token adds one to the bucket picked by its FNV-1a hash, and the
//! result is L2-normalised. Cosine similarity between two such vectors is a
//! bag-of-words overlap score, which is good enough for small persona
//! knowledge bases and makes tests fully reproducible.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A local [`EmbeddingProvider`] based on token feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbeddingProvider {
    /// Default number of hash buckets.
    pub const DEFAULT_DIMENSIONS: usize = 512;

    /// Create a provider producing vectors of `dimensions` buckets.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self { dimensions, model_id: format!("hashing-fnv1a-{dimensions}") }
    }

    fn bucket(&self, token: &str) -> usize {
        let hash = token.bytes().fold(FNV_OFFSET, |acc, b| (acc ^ u64::from(b)).wrapping_mul(FNV_PRIME));
        (hash % self.dimensions as u64) as usize
    }

    /// Embed without going through the async trait.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
