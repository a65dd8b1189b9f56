/// Voyage-style embedding API provider
use super::http::{ordered_embeddings, EmbeddingHttpClient, EmbeddingResponse};
use super::provider::check_dimensions;
use super::{EmbeddingError, EmbeddingModelInfo, EmbeddingProvider};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Voyage caps a request at 128 inputs
const MAX_BATCH: usize = 128;

#[derive(Debug, Serialize)]
struct VoyageRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
}

#[derive(Debug)]
pub struct VoyageProvider {
    client: EmbeddingHttpClient,
    info: EmbeddingModelInfo,
    output_dimension: Option<usize>,
    /// "document" for stored entities, "query" for search text
    input_type: Option<String>,
}

impl VoyageProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: &str,
        dimensions: usize,
        output_dimension: Option<usize>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = EmbeddingHttpClient::new(
            base_url.unwrap_or_else(|| VOYAGE_BASE_URL.to_string()),
            api_key,
            timeout,
        )?;

        Ok(Self {
            client,
            info: EmbeddingModelInfo::new(model, dimensions, "voyage-v1"),
            output_dimension,
            input_type: None,
        })
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = VoyageRequest {
            input: texts,
            model: &self.info.name,
            output_dimension: self.output_dimension,
            input_type: self.input_type.as_deref(),
        };
        let response: EmbeddingResponse = self.client.post("embeddings", &request).await?;
        let embeddings = ordered_embeddings(response, texts.len())?;
        check_dimensions(self.info.dimensions, &embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
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
            debug!(count = chunk.len(), "Embedding chunk via Voyage");
            all.extend(self.embed_chunk(chunk).await?);
        }
        Ok(all)
    }

    fn model_info(&self) -> EmbeddingModelInfo {
        self.info.clone()
    }

    fn provider_name(&self) -> &str {
        "voyage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_output_dimension_and_input_type() {
        let input = vec!["alpha".to_string(), "beta".to_string()];
        let request = VoyageRequest {
            input: &input,
            model: "voyage-3-large",
            output_dimension: Some(2048),
            input_type: Some("document"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["output_dimension"], 2048);
        assert_eq!(json["input_type"], "document");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_text_rejected_before_request() {
        let provider = VoyageProvider::new(
            "pa-test",
            "voyage-3",
            1024,
            None,
            Some("http://127.0.0.1:9".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = provider.generate_embedding("   ").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    }
}
