//! Hybrid search combining semantic and keyword search

use super::fallback::pattern_search;
use super::fusion::reciprocal_rank_fusion;
use super::reranker::{rerank_vector_search_results, Reranker};
use super::{
    FallbackCause, ResultMetadata, SearchError, SearchMethod, SearchOptions, SearchOutcome,
    SearchRoute, VectorSearchResult,
};
use crate::embedding::EmbeddingProvider;
use crate::reindex::embedding_text;
use crate::storage::similarity::l2_norm;
use crate::storage::{
    contains_folded, Entity, GraphStore, ScoredEntity, StoreError, StoredEmbedding,
};
use ahash::AHashMap;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Weight for a query match inside the entity name
const NAME_MATCH_SCORE: f32 = 2.0;

/// Weight for each observation containing the query
const OBSERVATION_MATCH_SCORE: f32 = 0.5;

/// Buffered hits below which the ranking never compacts
const COMPACT_FLOOR: usize = 64;

/// Model recorded for vectors added without one
const EXTERNAL_MODEL: &str = "external";

fn keyword_score(entity: &Entity, needle: &str) -> Option<f32> {
    let mut score = 0.0;
    if contains_folded(&entity.name, needle) {
        score += NAME_MATCH_SCORE;
    }
    score += entity
        .observations
        .iter()
        .filter(|o| contains_folded(o, needle))
        .count() as f32
        * OBSERVATION_MATCH_SCORE;
    (score > 0.0).then_some(score)
}

/// Running best-first keyword ranking over a stream of entities.
///
/// Every offered entity is scored; only the best `cap` survive. Entities
/// with equal scores keep the order they were offered in, so feeding the
/// stream newest first breaks ties by recency.
pub struct KeywordRanking {
    needle: String,
    cap: usize,
    hits: Vec<(Entity, f32)>,
    matched: usize,
}

impl KeywordRanking {
    pub fn new(query_text: &str, cap: usize) -> Self {
        Self {
            needle: query_text.trim().to_lowercase(),
            cap,
            hits: Vec::new(),
            matched: 0,
        }
    }

    pub fn offer(&mut self, entity: Entity) {
        if self.needle.is_empty() {
            return;
        }
        let Some(score) = keyword_score(&entity, &self.needle) else {
            return;
        };
        self.matched += 1;
        if self.cap == 0 {
            return;
        }
        self.hits.push((entity, score));
        if self.hits.len() >= self.cap.saturating_mul(2).max(COMPACT_FLOOR) {
            self.compact();
        }
    }

    /// Entities that scored above zero, kept or not
    pub fn matched(&self) -> usize {
        self.matched
    }

    pub fn into_hits(mut self) -> Vec<(Entity, f32)> {
        self.compact();
        self.hits
    }

    fn compact(&mut self) {
        self.hits
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        self.hits.truncate(self.cap);
    }
}

/// Score entities against a keyword query, best first. Ties keep the
/// candidates' order; entities that do not match at all are dropped.
pub fn keyword_scores(candidates: Vec<Entity>, query_text: &str) -> Vec<(Entity, f32)> {
    let mut ranking = KeywordRanking::new(query_text, usize::MAX);
    for entity in candidates {
        ranking.offer(entity);
    }
    ranking.into_hits()
}

fn degeneracy(vector: &[f32]) -> Option<String> {
    if let Some(i) = vector.iter().position(|x| !x.is_finite()) {
        return Some(format!("component {} is not finite", i));
    }
    let norm = l2_norm(vector);
    if !norm.is_finite() {
        Some("norm is not finite".to_string())
    } else if norm == 0.0 {
        Some("zero norm".to_string())
    } else {
        None
    }
}

/// Query front end over one named vector index
pub struct VectorStore {
    store: Arc<dyn GraphStore>,
    index_name: String,
    dimensions: usize,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<Reranker>>,
}

impl VectorStore {
    pub fn new(store: Arc<dyn GraphStore>, index_name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            store,
            index_name: index_name.into(),
            dimensions,
            provider: None,
            reranker: None,
        }
    }

    /// Needed by `search_text`
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Store a vector for an entity. Never truncates or pads.
    pub fn add_vector(
        &self,
        id: &str,
        vector: &[f32],
        model: Option<&str>,
    ) -> Result<(), SearchError> {
        if vector.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if let Some(i) = vector.iter().position(|x| !x.is_finite()) {
            return Err(SearchError::InvalidVector(format!(
                "component {} is not finite",
                i
            )));
        }

        self.store.set_embedding(
            id,
            &StoredEmbedding {
                vector: vector.to_vec(),
                model: model.unwrap_or(EXTERNAL_MODEL).to_string(),
                updated_at: Utc::now(),
            },
        )?;
        Ok(())
    }

    /// Search by query vector
    ///
    /// Only a wrong query length is an error. A degenerate vector, a failing
    /// index query, or an empty primary result all answer from the pattern
    /// fallback, with the cause in `route`.
    pub async fn search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<SearchOutcome, SearchError> {
        if query.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        if let Some(reason) = degeneracy(query) {
            warn!("Degenerate query vector ({}), using fallback search", reason);
            return self
                .fallback(options, FallbackCause::DegenerateInput(reason))
                .await;
        }

        let primary = match options.text() {
            Some(text) if options.hybrid_search => self.hybrid_search(query, text, options).await,
            _ => self.vector_search(query, options).await,
        };

        match primary {
            Ok(results) if !results.is_empty() => Ok(SearchOutcome {
                results,
                route: SearchRoute::Primary,
            }),
            Ok(_) => {
                debug!("Primary search returned nothing, using fallback search");
                self.fallback(options, FallbackCause::NoResults).await
            }
            Err(e) => {
                warn!("Search failed ({}), using fallback search", e);
                self.fallback(options, FallbackCause::QueryFailed(e.to_string()))
                    .await
            }
        }
    }

    /// Embed `query_text` with the configured provider, then search
    pub async fn search_text(
        &self,
        query_text: &str,
        options: &SearchOptions,
    ) -> Result<SearchOutcome, SearchError> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            SearchError::InvalidQuery("no embedding provider configured".to_string())
        })?;

        let mut options = options.clone();
        if options.query_text.is_none() {
            options.query_text = Some(query_text.to_string());
        }

        match provider.generate_embedding(query_text).await {
            Ok(vector) => self.search(&vector, &options).await,
            Err(e) => {
                warn!("Query embedding failed ({}), using fallback search", e);
                self.fallback(&options, FallbackCause::QueryFailed(e.to_string()))
                    .await
            }
        }
    }

    /// `search_text` followed by reranking of whatever it returned
    pub async fn search_with_rerank(
        &self,
        query_text: &str,
        options: &SearchOptions,
        top_n: usize,
    ) -> Result<SearchOutcome, SearchError> {
        let outcome = self.search_text(query_text, options).await?;
        let Some(reranker) = &self.reranker else {
            return Ok(outcome);
        };
        if outcome.results.is_empty() {
            return Ok(outcome);
        }

        let names: Vec<String> = outcome.results.iter().map(|r| r.id.clone()).collect();
        let texts: AHashMap<String, String> = self
            .store
            .get_entities(&names)?
            .iter()
            .map(|e| (e.name.clone(), embedding_text(e)))
            .collect();
        let documents: Vec<String> = outcome
            .results
            .iter()
            .map(|r| texts.get(&r.id).cloned().unwrap_or_else(|| r.id.clone()))
            .collect();

        let results =
            rerank_vector_search_results(reranker, query_text, outcome.results, &documents, top_n)
                .await?;
        Ok(SearchOutcome {
            results,
            route: outcome.route,
        })
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntity>, SearchError> {
        let store = self.store.clone();
        let index = self.index_name.clone();
        let query = query.to_vec();
        tokio::task::spawn_blocking(move || store.nearest(&index, k, &query))
            .await
            .map_err(|e| SearchError::Task(e.to_string()))?
            .map_err(SearchError::from)
    }

    async fn vector_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<VectorSearchResult>, SearchError> {
        let hits = self.nearest(query, options.limit).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.score >= options.min_similarity)
            .map(|hit| {
                let mut metadata =
                    ResultMetadata::new(hit.entity.entity_type.clone(), SearchMethod::Vector);
                metadata.vector_score = Some(hit.score);
                VectorSearchResult {
                    id: hit.entity.name,
                    similarity: hit.score,
                    metadata,
                }
            })
            .collect())
    }

    async fn hybrid_search(
        &self,
        query: &[f32],
        text: &str,
        options: &SearchOptions,
    ) -> Result<Vec<VectorSearchResult>, SearchError> {
        let candidates = options.limit.saturating_mul(2);

        let keyword_store = self.store.clone();
        let keyword_text = text.to_string();
        let keyword = tokio::task::spawn_blocking(move || {
            let mut ranking = KeywordRanking::new(&keyword_text, candidates);
            keyword_store.scan_keyword_matches(&keyword_text, &mut |entity| ranking.offer(entity))?;
            debug!(matched = ranking.matched(), "Keyword scan finished");
            Ok::<_, StoreError>(ranking.into_hits())
        });

        let (vector_hits, keyword_hits) = tokio::join!(self.nearest(query, candidates), keyword);
        let vector_hits = vector_hits?;
        let keyword_hits = keyword_hits.map_err(|e| SearchError::Task(e.to_string()))??;

        let mut entity_types: AHashMap<String, String> = AHashMap::new();
        let vector_list: Vec<(String, f32)> = vector_hits
            .into_iter()
            .map(|hit| {
                entity_types
                    .entry(hit.entity.name.clone())
                    .or_insert(hit.entity.entity_type);
                (hit.entity.name, hit.score)
            })
            .collect();
        let keyword_list: Vec<(String, f32)> = keyword_hits
            .into_iter()
            .map(|(entity, score)| {
                entity_types
                    .entry(entity.name.clone())
                    .or_insert(entity.entity_type);
                (entity.name, score)
            })
            .collect();

        debug!(
            vector = vector_list.len(),
            keyword = keyword_list.len(),
            "Fusing hybrid search results"
        );

        let mut fused = reciprocal_rank_fusion(&vector_list, &keyword_list, options.rrf_k);
        fused.truncate(options.limit);

        Ok(fused
            .into_iter()
            .map(|hit| {
                let entity_type = entity_types.remove(&hit.id).unwrap_or_default();
                let mut metadata = ResultMetadata::new(entity_type, SearchMethod::HybridRrf);
                metadata.vector_score = hit.vector_score;
                metadata.bm25_score = hit.keyword_score;
                metadata.rrf_score = Some(hit.rrf_score);
                VectorSearchResult {
                    id: hit.id,
                    similarity: hit.rrf_score,
                    metadata,
                }
            })
            .collect())
    }

    async fn fallback(
        &self,
        options: &SearchOptions,
        cause: FallbackCause,
    ) -> Result<SearchOutcome, SearchError> {
        let store = self.store.clone();
        let text = options.text().map(str::to_string);
        let limit = options.limit;
        let results =
            tokio::task::spawn_blocking(move || pattern_search(store.as_ref(), text.as_deref(), limit))
                .await
                .map_err(|e| SearchError::Task(e.to_string()))??;

        Ok(SearchOutcome {
            results,
            route: SearchRoute::Fallback(cause),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entity(name: &str, observations: &[&str]) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            entity_type: "thing".to_string(),
            observations: observations.iter().map(|s| s.to_string()).collect(),
            embedding: None,
            embedding_model: None,
            embedding_dimensions: None,
            embedding_updated: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_keyword_boosts() {
        let scored = keyword_scores(
            vec![
                entity("tokio", &["async runtime", "uses mio"]),
                entity("Rust", &["rust is fast", "RUST has traits"]),
                entity("serde", &["works with rust"]),
                entity("python", &["snakes"]),
            ],
            "rust",
        );

        let as_pairs: Vec<_> = scored.iter().map(|(e, s)| (e.name.as_str(), *s)).collect();
        assert_eq!(as_pairs, vec![("Rust", 3.0), ("serde", 0.5)]);
    }

    #[test]
    fn test_keyword_ties_keep_candidate_order() {
        let scored = keyword_scores(
            vec![entity("b-graph", &[]), entity("a-graph", &[])],
            "graph",
        );
        assert_eq!(scored[0].0.name, "b-graph");
        assert_eq!(scored[1].0.name, "a-graph");
    }

    #[test]
    fn test_keyword_scores_fold_unicode_case() {
        let scored = keyword_scores(
            vec![entity("Überblick", &[]), entity("uberblick", &[])],
            "ÜBERBLICK",
        );
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].0.name, "Überblick");
        assert_eq!(scored[0].1, 2.0);
    }

    #[test]
    fn test_ranking_keeps_late_best_hit_past_compaction() {
        let mut ranking = KeywordRanking::new("graph", 3);
        for i in 0..200 {
            ranking.offer(entity(&format!("note-{}", i), &["a graph note"]));
        }
        ranking.offer(entity("graph-db", &[]));
        ranking.offer(entity("unrelated", &["nothing here"]));

        assert_eq!(ranking.matched(), 201);
        let hits = ranking.into_hits();
        let names: Vec<_> = hits.iter().map(|(e, s)| (e.name.as_str(), *s)).collect();
        assert_eq!(
            names,
            vec![("graph-db", 2.0), ("note-0", 0.5), ("note-1", 0.5)]
        );
    }

    #[test]
    fn test_ranking_with_zero_cap_counts_only() {
        let mut ranking = KeywordRanking::new("x", 0);
        ranking.offer(entity("x", &[]));
        assert_eq!(ranking.matched(), 1);
        assert!(ranking.into_hits().is_empty());
    }

    #[test]
    fn test_degeneracy_reasons() {
        assert_eq!(degeneracy(&[0.0, 0.0]).as_deref(), Some("zero norm"));
        assert!(degeneracy(&[1.0, f32::INFINITY]).is_some());
        assert!(degeneracy(&[f32::MAX, f32::MAX]).is_some());
        assert!(degeneracy(&[0.0, 1.0]).is_none());
    }
}
