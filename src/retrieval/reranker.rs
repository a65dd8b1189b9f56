//! Second-stage reranking of search results
//!
//! Providers score (query, document) pairs; `Reranker` validates what they
//! return and orders it. Voyage-style HTTP reranking and a local FastEmbed
//! cross-encoder are available.

use super::{SearchMethod, VectorSearchResult};
use crate::config::{RerankConfig, RerankProviderKind};
use crate::embedding::http::EmbeddingHttpClient;
use crate::embedding::{EmbeddingError, VOYAGE_BASE_URL};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker authentication failed: {0}")]
    Authentication(String),

    #[error("Reranker rate limited: {0}")]
    RateLimited(String),

    #[error("Reranker server error: {0}")]
    Server(String),

    #[error("Invalid reranker response: {0}")]
    InvalidResponse(String),

    #[error("Reranker initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reranking failed: {0}")]
    Other(String),
}

impl From<EmbeddingError> for RerankError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Authentication(msg) => RerankError::Authentication(msg),
            EmbeddingError::RateLimited { message, .. } => RerankError::RateLimited(message),
            EmbeddingError::TransientServer(msg) => RerankError::Server(msg),
            EmbeddingError::InvalidResponse(msg) => RerankError::InvalidResponse(msg),
            EmbeddingError::Initialization(msg) => RerankError::Initialization(msg),
            EmbeddingError::InvalidInput(msg) => RerankError::InvalidInput(msg),
            other => RerankError::Other(other.to_string()),
        }
    }
}

/// Relevance of the document at `index` in the request
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f32,
}

#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Score documents against the query, at most `top_k` of them
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankScore>, RerankError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct VoyageRerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct VoyageRerankResponse {
    data: Vec<RerankScore>,
}

/// Voyage-style `/rerank` endpoint
#[derive(Debug)]
pub struct VoyageReranker {
    client: EmbeddingHttpClient,
    model: String,
}

impl VoyageReranker {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RerankError> {
        let client = EmbeddingHttpClient::new(
            base_url.unwrap_or_else(|| VOYAGE_BASE_URL.to_string()),
            api_key,
            timeout,
        )?;
        Ok(Self {
            client,
            model: model.into(),
        })
    }
}

#[async_trait]
impl RerankProvider for VoyageReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankScore>, RerankError> {
        let request = VoyageRerankRequest {
            query,
            documents,
            model: &self.model,
            top_k,
        };
        let response: VoyageRerankResponse = self.client.post("rerank", &request).await?;
        Ok(response.data)
    }

    fn name(&self) -> &str {
        "voyage"
    }
}

/// Cross-encoder reranking using FastEmbed
pub struct LocalReranker {
    model: Arc<TextRerank>,
    model_name: String,
}

impl std::fmt::Debug for LocalReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReranker")
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl LocalReranker {
    /// Models are downloaded to the FastEmbed cache on first use
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let model = match model_name {
            "bge-reranker-base" | "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "jina-reranker-v1-turbo-en" | "jinaai/jina-reranker-v1-turbo-en" => {
                RerankerModel::JINARerankerV1TurboEn
            }
            _ => {
                return Err(RerankError::Initialization(format!(
                    "Unsupported reranker model: {}. Supported: bge-reranker-base, jina-reranker-v1-turbo-en",
                    model_name
                )));
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(model).with_show_download_progress(true);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::Initialization(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl RerankProvider for LocalReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankScore>, RerankError> {
        let model = self.model.clone();
        let query = query.to_string();
        let documents = documents.to_vec();

        let results = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = documents.iter().map(String::as_str).collect();
            model.rerank(query.as_str(), refs, false, None)
        })
        .await
        .map_err(|e| RerankError::Other(e.to_string()))?
        .map_err(|e| RerankError::Other(e.to_string()))?;

        Ok(results
            .into_iter()
            .take(top_k)
            .map(|r| RerankScore {
                index: r.index,
                relevance_score: r.score,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Document handed to the reranker; `score` is its first-stage score
#[derive(Debug, Clone, PartialEq)]
pub struct RerankDocument {
    pub id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankedDocument {
    pub id: String,
    /// Position in the input slice
    pub index: usize,
    pub score: f32,
    pub relevance_score: f32,
}

/// Provider-agnostic reranking front end
pub struct Reranker {
    provider: Arc<dyn RerankProvider>,
}

impl Reranker {
    pub fn new(provider: Arc<dyn RerankProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Rerank documents by relevance, best first, at most `top_n`
    ///
    /// No documents means no provider call. Equal relevance keeps the
    /// provider's order.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_n: usize,
    ) -> Result<Vec<RerankedDocument>, RerankError> {
        if documents.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let top_k = top_n.min(documents.len());
        let scores = self.provider.rerank(query, &texts, top_k).await?;

        let mut reranked = Vec::with_capacity(scores.len());
        for score in scores {
            let document = documents.get(score.index).ok_or_else(|| {
                RerankError::InvalidResponse(format!(
                    "index {} out of range for {} documents",
                    score.index,
                    documents.len()
                ))
            })?;
            reranked.push(RerankedDocument {
                id: document.id.clone(),
                index: score.index,
                score: document.score,
                relevance_score: score.relevance_score,
            });
        }

        reranked.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        reranked.truncate(top_n);

        tracing::debug!(
            provider = self.provider.name(),
            "Reranked {} documents down to {}",
            documents.len(),
            reranked.len()
        );
        Ok(reranked)
    }
}

/// Reorder vector results by reranker relevance
///
/// `documents[i]` is the text of `results[i]`. The relevance score replaces
/// `similarity`; the first-stage score and method move to
/// `originalSimilarity` and `originalMethod`.
pub async fn rerank_vector_search_results(
    reranker: &Reranker,
    query: &str,
    results: Vec<VectorSearchResult>,
    documents: &[String],
    top_n: usize,
) -> Result<Vec<VectorSearchResult>, RerankError> {
    if results.len() != documents.len() {
        return Err(RerankError::InvalidInput(format!(
            "{} results but {} documents",
            results.len(),
            documents.len()
        )));
    }

    let inputs: Vec<RerankDocument> = results
        .iter()
        .zip(documents)
        .map(|(result, text)| RerankDocument {
            id: result.id.clone(),
            text: text.clone(),
            score: result.similarity,
        })
        .collect();

    let reranked = reranker.rerank(query, &inputs, top_n).await?;
    Ok(reranked
        .into_iter()
        .map(|doc| {
            let mut result = results[doc.index].clone();
            result.metadata.original_similarity = Some(doc.score);
            result.metadata.original_method = Some(result.metadata.search_method);
            result.metadata.search_method = SearchMethod::VectorRerank;
            result.similarity = doc.relevance_score;
            result
        })
        .collect())
}

/// Build the configured reranker, `None` when reranking is disabled
pub fn reranker_from_config(config: &RerankConfig) -> Result<Option<Reranker>, RerankError> {
    if !config.enabled {
        return Ok(None);
    }

    let provider: Arc<dyn RerankProvider> = match config.provider {
        RerankProviderKind::Voyage => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    RerankError::Initialization(format!(
                        "Environment variable {} is not set",
                        config.api_key_env
                    ))
                })?;
            Arc::new(VoyageReranker::new(
                api_key,
                &config.model,
                config.base_url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)
        }
        RerankProviderKind::Local => Arc::new(LocalReranker::new(&config.model)?),
    };

    Ok(Some(Reranker::new(provider)))
}
