//! Bounded exponential backoff for retryable provider failures

use super::{EmbeddingError, EmbeddingModelInfo, EmbeddingProvider};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based). A server hint wins if larger.
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let delay = exp.min(self.max_delay);
        match hint {
            Some(h) if h > delay => h.min(self.max_delay),
            _ => delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently or the retry budget is spent
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbeddingError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt, e.retry_after());
                    warn!(
                        target_item = label,
                        attempt,
                        wait_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable provider error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single-text embedding with this policy, with the model that produced it
    pub async fn embed_with_info(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
    ) -> Result<(Vec<f32>, EmbeddingModelInfo), EmbeddingError> {
        self.run(text, || provider.generate_embedding_with_info(text))
            .await
    }
}
