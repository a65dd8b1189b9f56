/// Embedding generation
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - OpenAI-like and Voyage-like HTTP providers
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - MockProvider for deterministic offline vectors
/// - FallbackProvider chaining any of the above
/// - RetryPolicy for bounded backoff on retryable failures
mod fallback;
pub(crate) mod http;
mod local;
mod mock;
mod openai;
mod provider;
mod retry;
mod voyage;

pub use fallback::FallbackProvider;
pub use local::FastEmbedProvider;
pub use mock::{hash_vector, MockFailure, MockProvider};
pub use openai::{OpenAiProvider, OPENAI_BASE_URL};
pub use provider::{EmbeddingError, EmbeddingModelInfo, EmbeddingProvider, ProviderFailure};
pub use retry::RetryPolicy;
pub use voyage::{VoyageProvider, VOYAGE_BASE_URL};

use crate::config::{Config, FallbackProviderConfig, ProviderKind, ResolvedDimensions};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Concrete provider selected by configuration
#[derive(Debug)]
pub enum Provider {
    OpenAi(OpenAiProvider),
    Voyage(VoyageProvider),
    Local(FastEmbedProvider),
    Mock(MockProvider),
    Fallback(FallbackProvider),
}

#[async_trait]
impl EmbeddingProvider for Provider {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            Provider::OpenAi(p) => p.generate_embedding(text).await,
            Provider::Voyage(p) => p.generate_embedding(text).await,
            Provider::Local(p) => p.generate_embedding(text).await,
            Provider::Mock(p) => p.generate_embedding(text).await,
            Provider::Fallback(p) => p.generate_embedding(text).await,
        }
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            Provider::OpenAi(p) => p.generate_embeddings(texts).await,
            Provider::Voyage(p) => p.generate_embeddings(texts).await,
            Provider::Local(p) => p.generate_embeddings(texts).await,
            Provider::Mock(p) => p.generate_embeddings(texts).await,
            Provider::Fallback(p) => p.generate_embeddings(texts).await,
        }
    }

    async fn generate_embedding_with_info(
        &self,
        text: &str,
    ) -> Result<(Vec<f32>, EmbeddingModelInfo), EmbeddingError> {
        match self {
            Provider::OpenAi(p) => p.generate_embedding_with_info(text).await,
            Provider::Voyage(p) => p.generate_embedding_with_info(text).await,
            Provider::Local(p) => p.generate_embedding_with_info(text).await,
            Provider::Mock(p) => p.generate_embedding_with_info(text).await,
            Provider::Fallback(p) => p.generate_embedding_with_info(text).await,
        }
    }

    fn model_info(&self) -> EmbeddingModelInfo {
        match self {
            Provider::OpenAi(p) => p.model_info(),
            Provider::Voyage(p) => p.model_info(),
            Provider::Local(p) => p.model_info(),
            Provider::Mock(p) => p.model_info(),
            Provider::Fallback(p) => p.model_info(),
        }
    }

    fn provider_name(&self) -> &str {
        match self {
            Provider::OpenAi(p) => p.provider_name(),
            Provider::Voyage(p) => p.provider_name(),
            Provider::Local(p) => p.provider_name(),
            Provider::Mock(p) => p.provider_name(),
            Provider::Fallback(p) => p.provider_name(),
        }
    }
}

/// Build the configured provider, wrapping it in a fallback chain when
/// fallbacks are listed.
pub fn provider_from_config(
    config: &Config,
    dims: &ResolvedDimensions,
) -> Result<Provider, EmbeddingError> {
    let embedding = &config.embedding;
    let timeout = Duration::from_secs(embedding.timeout_secs);
    let output_dimension = embedding.dimensions.or(embedding.output_dimension);

    let primary = build_single(
        &FallbackProviderConfig {
            provider: embedding.provider,
            model: embedding.model.clone(),
            api_key_env: embedding.api_key_env.clone(),
            base_url: embedding.base_url.clone(),
        },
        dims.embedding_dimensions,
        output_dimension,
        embedding.input_type.as_deref(),
        timeout,
    )?;

    if embedding.fallback.is_empty() {
        return Ok(primary);
    }

    let mut chain: Vec<Arc<dyn EmbeddingProvider>> = vec![Arc::new(primary)];
    for fallback in &embedding.fallback {
        let provider = build_single(
            fallback,
            dims.embedding_dimensions,
            output_dimension,
            embedding.input_type.as_deref(),
            timeout,
        )?;
        chain.push(Arc::new(provider));
    }

    Ok(Provider::Fallback(FallbackProvider::new(chain)?))
}

fn build_single(
    entry: &FallbackProviderConfig,
    dimensions: usize,
    output_dimension: Option<usize>,
    input_type: Option<&str>,
    timeout: Duration,
) -> Result<Provider, EmbeddingError> {
    let provider = match entry.provider {
        ProviderKind::OpenAi => Provider::OpenAi(OpenAiProvider::new(
            api_key(&entry.api_key_env)?,
            &entry.model,
            dimensions,
            output_dimension,
            entry.base_url.clone(),
            timeout,
        )?),
        ProviderKind::Voyage => {
            let mut provider = VoyageProvider::new(
                api_key(&entry.api_key_env)?,
                &entry.model,
                dimensions,
                output_dimension,
                entry.base_url.clone(),
                timeout,
            )?;
            if let Some(input_type) = input_type {
                provider = provider.with_input_type(input_type);
            }
            Provider::Voyage(provider)
        }
        ProviderKind::Local => Provider::Local(FastEmbedProvider::new(&entry.model)?),
        ProviderKind::Mock => Provider::Mock(MockProvider::new(dimensions).with_model(&entry.model)),
    };

    let produced = provider.model_info().dimensions;
    if produced != dimensions {
        return Err(EmbeddingError::Initialization(format!(
            "Provider '{}' model '{}' produces {} dimensions but {} are configured",
            provider.provider_name(),
            entry.model,
            produced,
            dimensions
        )));
    }
    Ok(provider)
}

fn api_key(env_var: &str) -> Result<String, EmbeddingError> {
    match std::env::var(env_var) {
        Ok(key) if !key.is_empty() => Ok(key),
        Ok(_) => Err(EmbeddingError::Initialization(format!(
            "Environment variable {} is empty",
            env_var
        ))),
        Err(_) => Err(EmbeddingError::Initialization(format!(
            "Environment variable {} is not set",
            env_var
        ))),
    }
}
