/// OpenAI-compatible embedding API provider
use super::http::{ordered_embeddings, EmbeddingHttpClient, EmbeddingResponse};
use super::provider::check_dimensions;
use super::{EmbeddingError, EmbeddingModelInfo, EmbeddingProvider};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// The API accepts up to 2048 inputs per request
const MAX_BATCH: usize = 2048;

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug)]
pub struct OpenAiProvider {
    client: EmbeddingHttpClient,
    info: EmbeddingModelInfo,
    /// Sent as `dimensions` when the model supports shortened output
    output_dimension: Option<usize>,
}

impl OpenAiProvider {
    /// Create a provider for `model` producing `dimensions`-long vectors
    pub fn new(
        api_key: impl Into<String>,
        model: &str,
        dimensions: usize,
        output_dimension: Option<usize>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = EmbeddingHttpClient::new(
            base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key,
            timeout,
        )?;

        Ok(Self {
            client,
            info: EmbeddingModelInfo::new(model, dimensions, "openai-v1"),
            output_dimension,
        })
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = OpenAiRequest {
            input: texts,
            model: &self.info.name,
            dimensions: self.output_dimension,
        };
        let response: EmbeddingResponse = self.client.post("embeddings", &request).await?;
        let embeddings = ordered_embeddings(response, texts.len())?;
        check_dimensions(self.info.dimensions, &embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }
        let mut embeddings = self.embed_chunk(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embeddings generated".to_string()))
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "Batch contains empty text".to_string(),
            ));
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            debug!(count = chunk.len(), "Embedding chunk via OpenAI");
            all.extend(self.embed_chunk(chunk).await?);
        }
        Ok(all)
    }

    fn model_info(&self) -> EmbeddingModelInfo {
        self.info.clone()
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_unset_dimensions() {
        let input = vec!["hello".to_string()];
        let request = OpenAiRequest {
            input: &input,
            model: "text-embedding-3-small",
            dimensions: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("dimensions").is_none());
        assert_eq!(json["model"], "text-embedding-3-small");
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let result = OpenAiProvider::new(
            "",
            "text-embedding-3-small",
            1536,
            None,
            None,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(EmbeddingError::Initialization(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let provider = OpenAiProvider::new(
            "sk-test",
            "text-embedding-3-small",
            1536,
            None,
            Some("http://127.0.0.1:9".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let result = provider.generate_embeddings(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires OPENAI_API_KEY and network access
    async fn test_live_embedding() {
        let key = std::env::var("OPENAI_API_KEY").unwrap();
        let provider = OpenAiProvider::new(
            key,
            "text-embedding-3-small",
            1536,
            None,
            None,
            Duration::from_secs(30),
        )
        .unwrap();
        let embedding = provider.generate_embedding("hello world").await.unwrap();
        assert_eq!(embedding.len(), 1536);
    }
}
