/// Ordered provider chain: try each provider until one succeeds
use super::provider::ProviderFailure;
use super::{EmbeddingError, EmbeddingModelInfo, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct FallbackProvider {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
}

impl std::fmt::Debug for FallbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.provider_name()).collect();
        f.debug_struct("FallbackProvider")
            .field("providers", &names)
            .finish()
    }
}

impl FallbackProvider {
    /// Every provider in the chain must produce the same dimension, otherwise
    /// a fallback write would break the index.
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Result<Self, EmbeddingError> {
        let first = providers.first().ok_or_else(|| {
            EmbeddingError::Initialization("Fallback chain needs at least one provider".to_string())
        })?;
        let expected = first.model_info().dimensions;

        for provider in &providers[1..] {
            let info = provider.model_info();
            if info.dimensions != expected {
                return Err(EmbeddingError::Initialization(format!(
                    "Fallback provider '{}' ({}) produces {} dimensions, primary produces {}",
                    provider.provider_name(),
                    info.name,
                    info.dimensions,
                    expected
                )));
            }
        }

        Ok(Self { providers })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn record(
        failures: &mut Vec<ProviderFailure>,
        provider: &dyn EmbeddingProvider,
        error: &EmbeddingError,
    ) {
        warn!(
            provider = provider.provider_name(),
            error = %error,
            "Embedding provider failed, trying next"
        );
        failures.push(ProviderFailure {
            provider: provider.provider_name().to_string(),
            reason: error.to_string(),
        });
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackProvider {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let (vector, _) = self.generate_embedding_with_info(text).await?;
        Ok(vector)
    }

    async fn generate_embedding_with_info(
        &self,
        text: &str,
    ) -> Result<(Vec<f32>, EmbeddingModelInfo), EmbeddingError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.generate_embedding_with_info(text).await {
                Ok((vector, info)) => {
                    debug!(
                        provider = provider.provider_name(),
                        model = %info.name,
                        "Embedding generated"
                    );
                    return Ok((vector, info));
                }
                Err(e) => Self::record(&mut failures, provider.as_ref(), &e),
            }
        }
        Err(EmbeddingError::AllProvidersFailed { failures })
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.generate_embeddings(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => Self::record(&mut failures, provider.as_ref(), &e),
            }
        }
        Err(EmbeddingError::AllProvidersFailed { failures })
    }

    /// The primary provider's model describes the chain. Per-vector
    /// provenance comes from `generate_embedding_with_info`.
    fn model_info(&self) -> EmbeddingModelInfo {
        self.providers[0].model_info()
    }

    fn provider_name(&self) -> &str {
        "fallback"
    }
}
