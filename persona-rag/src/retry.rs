//! Bounded retry with exponential backoff for embedding calls.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Retry policy for embedding provider calls.
///
/// Controls how many times a failed call is retried, how long each attempt
/// may take, and how long to wait between attempts using exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Time allowed for a single attempt before it counts as failed.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy for the query path, where latency matters more than completeness.
    pub fn query_default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(3),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO, max_delay: Duration::ZERO, attempt_timeout }
    }

    /// Delay before retry number `attempt + 1`.
    ///
    /// Doubles from `base_delay` up to `max_delay`, then shaves off up to a
    /// quarter of it. The shave is derived from `salt` and `attempt`, so
    /// chunks embedded concurrently back off at different moments while a
    /// given chunk always waits the same amount.
    #[must_use]
    pub fn backoff(&self, attempt: u32, salt: u64) -> Duration {
        let capped = self.base_delay.saturating_mul(2u32.saturating_pow(attempt)).min(self.max_delay);
        let mixed = mix(salt ^ u64::from(attempt));
        let shave = (mixed % 250) as f64 / 1000.0;
        capped.mul_f64(1.0 - shave)
    }

    /// Upper bound on time spent sleeping between attempts.
    #[must_use]
    pub fn max_total_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.base_delay.saturating_mul(2u32.saturating_pow(attempt)).min(self.max_delay))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Whether an HTTP status from an embedding API is worth retrying.
///
/// Rate limiting (429) and server errors (5xx) are; any other status means
/// the request itself is wrong (bad key, oversized input, unknown model).
pub fn is_recoverable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn mix(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn salt_for(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Embed `text`, retrying retryable failures according to `policy`.
///
/// Each attempt is bounded by `policy.attempt_timeout`; a timeout counts as a
/// retryable [`RagError::EmbeddingUnavailable`]. At most
/// `policy.max_retries + 1` calls are made. Non-retryable errors, such as
/// [`RagError::EmbeddingRejected`], are returned immediately.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>> {
    let salt = salt_for(text);
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, provider.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::embedding(
                provider.model_id(),
                format!("attempt timed out after {:?}", policy.attempt_timeout),
            )),
        };

        match outcome {
            Ok(embedding) => return Ok(embedding),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt, salt);
                warn!(
                    provider = provider.model_id(),
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    ?delay,
                    error = %e,
                    "embedding attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(provider = provider.model_id(), attempts = attempt + 1, error = %e, "giving up on embedding");
                return Err(e);
            }
        }
    }
}
