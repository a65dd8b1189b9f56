//! Shared HTTP plumbing for the remote embedding APIs

use super::EmbeddingError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Response shape shared by the OpenAI and Voyage embedding endpoints
#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    pub data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingDatum {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: Option<usize>,
}

/// Bearer-authenticated JSON client for one embedding API
#[derive(Clone)]
pub(crate) struct EmbeddingHttpClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for EmbeddingHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingHttpClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl EmbeddingHttpClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(EmbeddingError::Initialization(
                "API key is required".to_string(),
            ));
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Initialization(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// POST a JSON body to `{base_url}/{path}` and decode the JSON reply
    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, EmbeddingError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Sending embedding API request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_after));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

/// Map a non-success HTTP status onto the provider failure taxonomy
pub(crate) fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> EmbeddingError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        401 | 403 => EmbeddingError::Authentication(detail),
        429 => EmbeddingError::RateLimited {
            message: detail,
            retry_after,
        },
        408 | 500..=599 => EmbeddingError::TransientServer(detail),
        _ => EmbeddingError::Request(detail),
    }
}

/// Timeouts and connection failures are worth retrying; body decode failures are not
pub(crate) fn classify_transport(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        EmbeddingError::TransientServer(e.to_string())
    } else if e.is_decode() {
        EmbeddingError::InvalidResponse(e.to_string())
    } else {
        EmbeddingError::TransientServer(e.to_string())
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Put response vectors back into request order and verify the count
pub(crate) fn ordered_embeddings(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if response.data.len() != expected {
        return Err(EmbeddingError::InvalidResponse(format!(
            "Embedding count mismatch: expected {}, got {}",
            expected,
            response.data.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, datum) in response.data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        if index >= expected || slots[index].is_some() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "Unexpected embedding index {}",
                index
            )));
        }
        if datum.embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "Empty embedding at index {}",
                index
            )));
        }
        slots[index] = Some(datum.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| {
                EmbeddingError::InvalidResponse(format!("Missing embedding at index {}", i))
            })
        })
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}
