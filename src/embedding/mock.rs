/// Deterministic in-process provider for tests and offline dry runs
use super::{EmbeddingError, EmbeddingModelInfo, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Failure kinds the mock can be told to raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Authentication,
    RateLimited,
    TransientServer,
    InvalidResponse,
}

impl MockFailure {
    fn to_error(self, text: &str) -> EmbeddingError {
        let detail = format!("mock failure for '{}'", text);
        match self {
            MockFailure::Authentication => EmbeddingError::Authentication(detail),
            MockFailure::RateLimited => EmbeddingError::RateLimited {
                message: detail,
                retry_after: Some(Duration::from_millis(1)),
            },
            MockFailure::TransientServer => EmbeddingError::TransientServer(detail),
            MockFailure::InvalidResponse => EmbeddingError::InvalidResponse(detail),
        }
    }
}

/// Produces unit vectors derived from a blake3 hash of the text, so the same
/// text always maps to the same vector.
#[derive(Debug)]
pub struct MockProvider {
    info: EmbeddingModelInfo,
    fail_on: Vec<(String, MockFailure)>,
    /// Fail the first N calls, then succeed
    fail_first: Option<(usize, MockFailure)>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            info: EmbeddingModelInfo::new("mock-embedding", dimensions, "1"),
            fail_on: Vec::new(),
            fail_first: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.info.name = model.into();
        self
    }

    /// Fail any text containing `needle`
    pub fn fail_when_contains(mut self, needle: impl Into<String>, kind: MockFailure) -> Self {
        self.fail_on.push((needle.into(), kind));
        self
    }

    pub fn fail_first_calls(mut self, count: usize, kind: MockFailure) -> Self {
        self.fail_first = Some((count, kind));
        self
    }

    /// Number of generate calls made so far, successful or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str, call: usize) -> Result<Vec<f32>, EmbeddingError> {
        if let Some((count, kind)) = self.fail_first {
            if call < count {
                return Err(kind.to_error(text));
            }
        }
        if let Some((_, kind)) = self.fail_on.iter().find(|(needle, _)| text.contains(needle)) {
            return Err(kind.to_error(text));
        }
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }
        Ok(hash_vector(text, self.info.dimensions))
    }
}

/// Expand the blake3 XOF stream into `dimensions` floats in [-1, 1] and normalise
pub fn hash_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let mut bytes = vec![0u8; dimensions * 4];
    blake3::Hasher::new()
        .update(text.as_bytes())
        .finalize_xof()
        .fill(&mut bytes);

    let mut vector: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| {
            let n = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            (n as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
        })
        .collect();

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.embed_one(text, call)
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        texts.iter().map(|t| self.embed_one(t, call)).collect()
    }

    fn model_info(&self) -> EmbeddingModelInfo {
        self.info.clone()
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_unit_vectors() {
        let provider = MockProvider::new(64);
        let a = provider.generate_embedding("alpha").await.unwrap();
        let b = provider.generate_embedding("alpha").await.unwrap();
        let c = provider.generate_embedding("beta").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_batch_matches_single_calls() {
        let provider = MockProvider::new(16);
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let batch = provider.generate_embeddings(&texts).await.unwrap();
        for (text, vector) in texts.iter().zip(batch.iter()) {
            assert_eq!(&provider.generate_embedding(text).await.unwrap(), vector);
        }
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let provider = MockProvider::new(8)
            .fail_when_contains("poison", MockFailure::Authentication)
            .fail_first_calls(1, MockFailure::TransientServer);

        let first = provider.generate_embedding("fine").await.unwrap_err();
        assert!(first.is_retryable());

        assert!(provider.generate_embedding("fine").await.is_ok());
        let poisoned = provider.generate_embedding("poison pill").await.unwrap_err();
        assert!(matches!(poisoned, EmbeddingError::Authentication(_)));
        assert_eq!(provider.calls(), 3);
    }
}
