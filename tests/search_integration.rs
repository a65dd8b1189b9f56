use async_trait::async_trait;
use graphvec::embedding::{MockFailure, MockProvider};
use graphvec::retrieval::{
    FallbackCause, RerankError, RerankProvider, RerankScore, Reranker, SearchError, SearchMethod,
    SearchOptions, SearchRoute, VectorStore,
};
use graphvec::storage::{
    GraphStore, IndexDefinition, NewEntity, SimilarityFunction, SqliteGraphStore,
};
use std::sync::Arc;
use tempfile::TempDir;

const DIMS: usize = 8;
const INDEX: &str = "entity_embeddings";

fn basis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[i] = 1.0;
    v
}

fn setup() -> (TempDir, Arc<SqliteGraphStore>, VectorStore) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(
        SqliteGraphStore::open(&dir.path().join("graph.sqlite")).expect("Failed to open store"),
    );
    store
        .create_vector_index(&IndexDefinition {
            name: INDEX.into(),
            label: "Entity".into(),
            property: "embedding".into(),
            dimensions: DIMS,
            similarity: SimilarityFunction::Cosine,
        })
        .unwrap();

    let vectors = VectorStore::new(store.clone(), INDEX, DIMS);

    let mut tokio_vec = vec![0.0; DIMS];
    tokio_vec[0] = 0.8;
    tokio_vec[1] = 0.6;

    let seed: Vec<(&str, &str, &str, Vec<f32>)> = vec![
        ("rust-lang", "technology", "rust is a systems language", basis(0)),
        ("tokio", "library", "async runtime for rust", tokio_vec),
        ("python", "technology", "dynamic language", basis(2)),
        ("coffee", "drink", "hot", basis(3)),
    ];
    for (name, kind, obs, vector) in seed {
        store
            .insert_entity(&NewEntity::new(name, kind, vec![obs.to_string()]))
            .unwrap();
        vectors.add_vector(name, &vector, Some("test-model")).unwrap();
    }

    (dir, store, vectors)
}

fn vector_only(min_similarity: f32) -> SearchOptions {
    SearchOptions {
        hybrid_search: false,
        min_similarity,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_wrong_length_is_rejected() {
    let (_dir, _store, vectors) = setup();

    let err = vectors
        .search(&[1.0; 4], &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::DimensionMismatch {
            expected: 8,
            actual: 4
        }
    ));

    let err = vectors.add_vector("coffee", &[1.0; 12], None).unwrap_err();
    assert!(matches!(err, SearchError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn test_stored_vector_round_trips() {
    let (_dir, store, _vectors) = setup();
    let entity = store.get_entity("tokio").unwrap().unwrap();
    let stored = entity.embedding.unwrap();
    assert_eq!(stored.len(), DIMS);
    assert_eq!(stored[0], 0.8);
    assert_eq!(stored[1], 0.6);
    assert_eq!(entity.embedding_model.as_deref(), Some("test-model"));
}

#[tokio::test]
async fn test_zero_vector_goes_to_fallback() {
    let (_dir, store, _vectors) = setup();
    // Pointing at a missing index proves the index is never consulted
    let vectors = VectorStore::new(store, "no_such_index", DIMS);

    let outcome = vectors
        .search(&vec![0.0; DIMS], &SearchOptions::default().with_query_text("rust"))
        .await
        .unwrap();

    assert!(matches!(
        outcome.route,
        SearchRoute::Fallback(FallbackCause::DegenerateInput(_))
    ));
    assert!(!outcome.results.is_empty());
    for result in &outcome.results {
        assert_eq!(result.metadata.search_method, SearchMethod::Fallback);
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["metadata"]["searchMethod"], "fallback");
    }
}

#[tokio::test]
async fn test_non_finite_vector_goes_to_fallback() {
    let (_dir, _store, vectors) = setup();
    let mut query = basis(0);
    query[3] = f32::NAN;

    let outcome = vectors
        .search(&query, &SearchOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        outcome.route,
        SearchRoute::Fallback(FallbackCause::DegenerateInput(_))
    ));
}

#[tokio::test]
async fn test_vector_search_applies_min_similarity() {
    let (_dir, _store, vectors) = setup();

    let outcome = vectors.search(&basis(0), &vector_only(0.5)).await.unwrap();

    assert_eq!(outcome.route, SearchRoute::Primary);
    let ids: Vec<_> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["rust-lang", "tokio"]);
    assert!((outcome.results[0].similarity - 1.0).abs() < 1e-6);
    assert!((outcome.results[1].similarity - 0.8).abs() < 1e-6);
    assert_eq!(outcome.results[0].metadata.search_method, SearchMethod::Vector);
    assert_eq!(outcome.results[0].metadata.entity_type, "technology");
}

#[tokio::test]
async fn test_nothing_above_threshold_uses_fallback() {
    let (_dir, _store, vectors) = setup();

    let outcome = vectors.search(&basis(7), &vector_only(0.5)).await.unwrap();
    assert_eq!(outcome.route, SearchRoute::Fallback(FallbackCause::NoResults));
    assert!(outcome
        .results
        .iter()
        .all(|r| r.metadata.search_method == SearchMethod::Fallback));
}

#[tokio::test]
async fn test_missing_index_uses_fallback() {
    let (_dir, store, _vectors) = setup();
    let vectors = VectorStore::new(store, "no_such_index", DIMS);

    let outcome = vectors
        .search(&basis(0), &SearchOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        outcome.route,
        SearchRoute::Fallback(FallbackCause::QueryFailed(_))
    ));
}

#[tokio::test]
async fn test_hybrid_scores_follow_rrf() {
    let (_dir, _store, vectors) = setup();
    let options = SearchOptions::default().with_query_text("rust");

    let outcome = vectors.search(&basis(0), &options).await.unwrap();

    assert_eq!(outcome.route, SearchRoute::Primary);
    let top = &outcome.results[0];
    assert_eq!(top.id, "rust-lang");
    assert_eq!(top.metadata.search_method, SearchMethod::HybridRrf);
    assert!((top.similarity - 2.0 / 61.0).abs() < 1e-7);
    assert_eq!(top.metadata.rrf_score, Some(top.similarity));
    assert_eq!(top.metadata.bm25_score, Some(2.5));
    assert!((top.metadata.vector_score.unwrap() - 1.0).abs() < 1e-6);

    let second = &outcome.results[1];
    assert_eq!(second.id, "tokio");
    assert!((second.similarity - 2.0 / 62.0).abs() < 1e-7);
    assert_eq!(second.metadata.bm25_score, Some(0.5));

    // Vector-only entries carry no keyword score
    let python = outcome.results.iter().find(|r| r.id == "python").unwrap();
    assert_eq!(python.metadata.bm25_score, None);
}

#[tokio::test]
async fn test_hybrid_search_is_deterministic() {
    let (_dir, _store, vectors) = setup();
    let options = SearchOptions::default().with_query_text("language");
    let mut query = basis(0);
    query[2] = 1.0;

    let first = vectors.search(&query, &options).await.unwrap();
    for _ in 0..5 {
        let again = vectors.search(&query, &options).await.unwrap();
        assert_eq!(again.results, first.results);
    }
}

#[tokio::test]
async fn test_search_text_embeds_the_query() {
    let (_dir, _store, vectors) = setup();
    let provider = Arc::new(MockProvider::new(DIMS));
    let vectors = vectors.with_provider(provider.clone());

    let outcome = vectors
        .search_text("rust", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(outcome.route, SearchRoute::Primary);
    assert!(outcome.results.iter().any(|r| r.id == "rust-lang"));
}

#[tokio::test]
async fn test_search_text_falls_back_when_embedding_fails() {
    let (_dir, _store, vectors) = setup();
    let provider = MockProvider::new(DIMS).fail_when_contains("rust", MockFailure::Authentication);
    let vectors = vectors.with_provider(Arc::new(provider));

    let outcome = vectors
        .search_text("rust", &SearchOptions::default())
        .await
        .unwrap();

    assert!(matches!(
        outcome.route,
        SearchRoute::Fallback(FallbackCause::QueryFailed(_))
    ));
    assert!(outcome
        .results
        .iter()
        .any(|r| r.id == "rust-lang" && r.similarity == graphvec::retrieval::PATTERN_MATCH_SCORE));
    assert!(outcome
        .results
        .iter()
        .all(|r| r.id != "coffee" || r.similarity == graphvec::retrieval::RECENCY_FILL_SCORE));
}

fn empty_index() -> (TempDir, Arc<SqliteGraphStore>, VectorStore) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(
        SqliteGraphStore::open(&dir.path().join("graph.sqlite")).expect("Failed to open store"),
    );
    store
        .create_vector_index(&IndexDefinition {
            name: INDEX.into(),
            label: "Entity".into(),
            property: "embedding".into(),
            dimensions: DIMS,
            similarity: SimilarityFunction::Cosine,
        })
        .unwrap();
    let vectors = VectorStore::new(store.clone(), INDEX, DIMS);
    (dir, store, vectors)
}

#[tokio::test]
async fn test_hybrid_keyword_leg_folds_unicode_case() {
    let (_dir, store, vectors) = empty_index();
    store
        .insert_entity(&NewEntity::new("Überblick", "document", vec![]))
        .unwrap();
    store
        .insert_entity(&NewEntity::new("Zusammenfassung", "document", vec![]))
        .unwrap();

    let outcome = vectors
        .search(&basis(0), &SearchOptions::default().with_query_text("überblick"))
        .await
        .unwrap();

    assert_eq!(outcome.route, SearchRoute::Primary);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "Überblick");
    assert_eq!(outcome.results[0].metadata.bm25_score, Some(2.0));
}

#[tokio::test]
async fn test_hybrid_keyword_leg_ranks_all_matches() {
    let (_dir, store, vectors) = empty_index();
    // Oldest entity, the only name hit
    store
        .insert_entity(&NewEntity::new("graph-db", "database", vec![]))
        .unwrap();
    for i in 0..1000 {
        store
            .insert_entity(&NewEntity::new(
                format!("note-{}", i),
                "note",
                vec!["mentions graph once".to_string()],
            ))
            .unwrap();
    }

    let options = SearchOptions {
        limit: 5,
        ..SearchOptions::default().with_query_text("graph")
    };
    let outcome = vectors.search(&basis(0), &options).await.unwrap();

    assert_eq!(outcome.route, SearchRoute::Primary);
    assert_eq!(outcome.results.len(), 5);
    let top = &outcome.results[0];
    assert_eq!(top.id, "graph-db");
    assert_eq!(top.metadata.bm25_score, Some(2.0));
    assert!((top.similarity - 1.0 / 61.0).abs() < 1e-7);
    // Equal keyword scores fall back to recency
    assert_eq!(outcome.results[1].id, "note-999");
}

/// Ranks documents mentioning "async" first
struct PrefersAsync;

#[async_trait]
impl RerankProvider for PrefersAsync {
    async fn rerank(
        &self,
        _query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankScore>, RerankError> {
        let mut scores: Vec<RerankScore> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| RerankScore {
                index,
                relevance_score: if doc.contains("async") { 0.9 } else { 0.1 },
            })
            .collect();
        scores.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap());
        scores.truncate(top_k);
        Ok(scores)
    }

    fn name(&self) -> &str {
        "prefers-async"
    }
}

#[tokio::test]
async fn test_search_with_rerank_reorders_results() {
    let (_dir, _store, vectors) = setup();
    let vectors = vectors
        .with_provider(Arc::new(MockProvider::new(DIMS)))
        .with_reranker(Arc::new(Reranker::new(Arc::new(PrefersAsync))));

    let outcome = vectors
        .search_with_rerank("rust", &SearchOptions::default(), 2)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    let top = &outcome.results[0];
    assert_eq!(top.id, "tokio");
    assert_eq!(top.similarity, 0.9);
    assert!(top.metadata.original_similarity.is_some());
    assert_eq!(top.metadata.original_method, Some(SearchMethod::HybridRrf));
    assert!(outcome
        .results
        .iter()
        .all(|r| r.metadata.search_method == SearchMethod::VectorRerank));
}
