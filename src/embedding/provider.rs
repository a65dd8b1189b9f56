/// Embedding provider trait, model metadata and the provider failure taxonomy
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    #[error("Provider initialization failed: {0}")]
    Initialization(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient server error: {0}")]
    TransientServer(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request rejected: {0}")]
    Request(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("All embedding providers failed: {}", summarize_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },
}

impl EmbeddingError {
    /// Rate limits and transient server failures can be retried; everything else is final
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::RateLimited { .. } | EmbeddingError::TransientServer(_)
        )
    }

    /// Server-provided wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbeddingError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Last failure of one provider inside a fallback chain
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

fn summarize_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.provider, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// What a provider produces. Fixed for the lifetime of a provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelInfo {
    pub name: String,
    pub dimensions: usize,
    pub version: String,
}

impl EmbeddingModelInfo {
    pub fn new(name: impl Into<String>, dimensions: usize, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions,
            version: version.into(),
        }
    }
}

/// Trait for embedding providers
///
/// Allows abstraction over the remote APIs, the local ONNX models and the
/// in-process test provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts; output order matches input order
    async fn generate_embeddings(&self, texts: &[String])
        -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Model name, dimension and version this provider produces
    fn model_info(&self) -> EmbeddingModelInfo;

    /// Embedding together with the model that actually produced it.
    /// Chains override this to report the member that answered.
    async fn generate_embedding_with_info(
        &self,
        text: &str,
    ) -> Result<(Vec<f32>, EmbeddingModelInfo), EmbeddingError> {
        let vector = self.generate_embedding(text).await?;
        Ok((vector, self.model_info()))
    }

    /// Short label used in logs and fallback error reports
    fn provider_name(&self) -> &str;
}

/// Reject vectors that do not have the advertised length
pub(crate) fn check_dimensions(
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingError> {
    for vector in vectors {
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EmbeddingError::TransientServer("502".into()).is_retryable());
        assert!(EmbeddingError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(2)),
        }
        .is_retryable());
        assert!(!EmbeddingError::Authentication("401".into()).is_retryable());
        assert!(!EmbeddingError::InvalidResponse("empty".into()).is_retryable());
    }

    #[test]
    fn test_all_failed_names_each_provider() {
        let err = EmbeddingError::AllProvidersFailed {
            failures: vec![
                ProviderFailure {
                    provider: "openai".into(),
                    reason: "Authentication failed: bad key".into(),
                },
                ProviderFailure {
                    provider: "local".into(),
                    reason: "Provider initialization failed: no model".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("openai: Authentication failed"));
        assert!(msg.contains("local: Provider initialization failed"));
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(3, &[vec![0.0; 3], vec![1.0; 3]]).is_ok());
        let err = check_dimensions(3, &[vec![0.0; 3], vec![1.0; 4]]).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }
}
