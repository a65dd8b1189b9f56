//! Vector, keyword and hybrid retrieval over entity embeddings
//!
//! Hybrid search fuses a nearest-neighbour ranking with a keyword ranking by
//! Reciprocal Rank Fusion. Any failure on the query path, a degenerate query
//! vector, or an empty primary result routes to a deterministic pattern
//! search; `SearchRoute` records which path answered and why.

mod fallback;
mod fusion;
mod hybrid;
mod reranker;

pub use fallback::{pattern_search, PATTERN_MATCH_SCORE, RECENCY_FILL_SCORE};
pub use fusion::{reciprocal_rank_fusion, FusedHit};
pub use hybrid::{keyword_scores, KeywordRanking, VectorStore};
pub use reranker::{
    rerank_vector_search_results, reranker_from_config, LocalReranker, RerankDocument,
    RerankError, RerankProvider, RerankScore, RerankedDocument, Reranker, VoyageReranker,
};

use crate::config::SearchConfig;
use crate::embedding::EmbeddingError;
use crate::storage::StoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Reranking failed: {0}")]
    Rerank(#[from] RerankError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search task failed: {0}")]
    Task(String),
}

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchMethod {
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "hybrid-rrf")]
    HybridRrf,
    #[serde(rename = "fallback")]
    Fallback,
    #[serde(rename = "vector+rerank")]
    VectorRerank,
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SearchMethod::Vector => "vector",
            SearchMethod::HybridRrf => "hybrid-rrf",
            SearchMethod::Fallback => "fallback",
            SearchMethod::VectorRerank => "vector+rerank",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub entity_type: String,
    pub search_method: SearchMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_similarity: Option<f32>,
    /// First-stage method of a reranked result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_method: Option<SearchMethod>,
}

impl ResultMetadata {
    pub fn new(entity_type: impl Into<String>, search_method: SearchMethod) -> Self {
        Self {
            entity_type: entity_type.into(),
            search_method,
            vector_score: None,
            bm25_score: None,
            rrf_score: None,
            original_similarity: None,
            original_method: None,
        }
    }
}

/// One ranked entity. `id` is the entity name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorSearchResult {
    pub id: String,
    pub similarity: f32,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Post-filter for pure vector mode only
    pub min_similarity: f32,
    pub hybrid_search: bool,
    pub query_text: Option<String>,
    pub rrf_k: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_similarity: 0.5,
            hybrid_search: true,
            query_text: None,
            rrf_k: 60.0,
        }
    }
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            limit: config.default_limit,
            min_similarity: config.min_similarity,
            hybrid_search: config.hybrid,
            query_text: None,
            rrf_k: config.rrf_k,
        }
    }

    pub fn with_query_text(mut self, text: impl Into<String>) -> Self {
        self.query_text = Some(text.into());
        self
    }

    /// Query text if present and not blank
    pub fn text(&self) -> Option<&str> {
        self.query_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Why the deterministic fallback answered instead of the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", content = "detail", rename_all = "kebab-case")]
pub enum FallbackCause {
    /// Zero-norm or non-finite query vector; the index was never called
    DegenerateInput(String),
    /// The primary path returned an error
    QueryFailed(String),
    /// The primary path succeeded with nothing to return
    NoResults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchRoute {
    Primary,
    Fallback(FallbackCause),
}

impl SearchRoute {
    pub fn is_fallback(&self) -> bool {
        matches!(self, SearchRoute::Fallback(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<VectorSearchResult>,
    pub route: SearchRoute,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_method_always_serialized() {
        let result = VectorSearchResult {
            id: "alice".into(),
            similarity: 0.5,
            metadata: ResultMetadata::new("person", SearchMethod::VectorRerank),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["metadata"]["searchMethod"], "vector+rerank");
        assert_eq!(json["metadata"]["entityType"], "person");
        assert!(json["metadata"].get("rrfScore").is_none());
    }

    #[test]
    fn test_blank_query_text_is_ignored() {
        let options = SearchOptions::default().with_query_text("   ");
        assert_eq!(options.text(), None);
        let options = SearchOptions::default().with_query_text(" rust ");
        assert_eq!(options.text(), Some("rust"));
    }
}
