use chrono::Utc;
use graphvec::consistency::{ConsistencyAnalyzer, ConsistencyStatus};
use graphvec::embedding::{MockProvider, RetryPolicy};
use graphvec::migration::{ClearAllOptions, MigrationEngine, MigrationOperation, SettleSettings};
use graphvec::reindex::{ReindexEngine, ReindexFilter, ReindexOptions};
use graphvec::storage::{
    GraphStore, IndexDefinition, IndexState, NewEntity, SimilarityFunction, SqliteGraphStore,
    StoredEmbedding,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_store() -> (TempDir, Arc<SqliteGraphStore>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteGraphStore::open(&dir.path().join("graph.sqlite"))
        .expect("Failed to open store");
    (dir, Arc::new(store))
}

fn add(store: &SqliteGraphStore, name: &str, dims: Option<usize>) {
    store
        .insert_entity(&NewEntity::new(name, "concept", vec![format!("about {}", name)]))
        .unwrap();
    if let Some(dims) = dims {
        store
            .set_embedding(
                name,
                &StoredEmbedding {
                    vector: vec![0.1; dims],
                    model: "text-embedding-3-large".into(),
                    updated_at: Utc::now(),
                },
            )
            .unwrap();
    }
}

fn index(dims: usize) -> IndexDefinition {
    IndexDefinition {
        name: "entity_embeddings".into(),
        label: "Entity".into(),
        property: "embedding".into(),
        dimensions: dims,
        similarity: SimilarityFunction::Cosine,
    }
}

/// Index at 2048; A holds 3072, B nothing, C 2048
fn drifted_store() -> (TempDir, Arc<SqliteGraphStore>) {
    let (dir, store) = open_store();
    add(&store, "A", Some(3072));
    add(&store, "B", None);
    add(&store, "C", Some(2048));
    (dir, store)
}

#[test]
fn test_drifted_graph_is_reported_inconsistent() {
    let (_dir, store) = drifted_store();
    let analyzer = ConsistencyAnalyzer::new(store);

    let summary = analyzer.analyze_embedding_state(2048).unwrap();

    assert_eq!(summary.total_entities, 3);
    assert_eq!(summary.entities_with_embeddings, 2);
    assert_eq!(summary.entities_without_embeddings, 1);
    assert_eq!(summary.dimension_counts.get(&2048), Some(&1));
    assert_eq!(summary.dimension_counts.get(&3072), Some(&1));
    assert_eq!(summary.dimension_counts.len(), 2);
    assert_eq!(summary.consistency_status, ConsistencyStatus::Inconsistent);

    let a = summary
        .mismatches
        .iter()
        .find(|m| m.entity_name == "A")
        .expect("A should be listed");
    assert!(a.has_embedding);
    assert_eq!(a.current_dimensions, 3072);
    assert_eq!(a.expected_dimensions, 2048);

    let b = summary
        .mismatches
        .iter()
        .find(|m| m.entity_name == "B")
        .expect("B should be listed");
    assert!(!b.has_embedding);
    assert_eq!(b.current_dimensions, 0);

    assert!(summary.mismatches.iter().all(|m| m.entity_name != "C"));

    // Counts always add up
    assert_eq!(
        summary.entities_with_embeddings + summary.entities_without_embeddings,
        summary.total_entities
    );
    let histogram_total: usize = summary.dimension_counts.values().sum();
    assert_eq!(histogram_total, summary.entities_with_embeddings);
}

#[test]
fn test_clear_all_dry_run_changes_nothing() {
    let (_dir, store) = drifted_store();
    let engine = MigrationEngine::new(store.clone(), SettleSettings::default());
    let before = store.stats().unwrap();

    let outcome = engine
        .clear_all(ClearAllOptions::default(), true)
        .unwrap();

    assert!(outcome.dry_run);
    assert_eq!(outcome.operation, MigrationOperation::ClearAll);
    assert_eq!(outcome.affected, 2);
    assert!(outcome.message.starts_with("[DRY RUN]"));
    assert_eq!(store.stats().unwrap(), before);
    assert_eq!(store.last_clear_at().unwrap(), None);
    assert_eq!(store.get_entity("A").unwrap().unwrap().embedding_len(), 3072);
}

#[test]
fn test_clear_all_then_restore_round_trip() {
    let (_dir, store) = drifted_store();
    let engine = MigrationEngine::new(store.clone(), SettleSettings::default());

    let cleared = engine.clear_all(ClearAllOptions::default(), false).unwrap();
    assert_eq!(cleared.affected, 2);
    assert_eq!(store.count_with_embeddings().unwrap(), 0);
    assert_eq!(store.count_backups().unwrap(), 2);
    assert!(store.last_clear_at().unwrap().is_some());

    let restored = engine.restore(false).unwrap();
    assert_eq!(restored.affected, 2);
    assert_eq!(store.get_entity("A").unwrap().unwrap().embedding_len(), 3072);
    assert_eq!(store.get_entity("C").unwrap().unwrap().embedding_len(), 2048);
    assert_eq!(store.count_backups().unwrap(), 0);
}

#[tokio::test]
async fn test_migrate_then_reindex_restores_consistency() {
    let (_dir, store) = drifted_store();
    store.create_vector_index(&index(3072)).unwrap();

    let engine = MigrationEngine::new(store.clone(), SettleSettings::default());
    let outcomes = engine.migrate_to(2048, &index(2048), false).await.unwrap();

    let operations: Vec<_> = outcomes.iter().map(|o| o.operation).collect();
    assert_eq!(
        operations,
        vec![
            MigrationOperation::Backup,
            MigrationOperation::ClearMismatched,
            MigrationOperation::RecreateIndex,
        ]
    );
    assert_eq!(outcomes[1].affected, 1);

    let info = store.vector_index("entity_embeddings").unwrap().unwrap();
    assert_eq!(info.definition.dimensions, 2048);
    assert_eq!(info.state, IndexState::Online);
    assert!(!store.get_entity("A").unwrap().unwrap().has_embedding());

    let reindex = ReindexEngine::new(
        store.clone(),
        Arc::new(MockProvider::new(2048).with_model("text-embedding-3-large")),
    )
    .with_retry_policy(RetryPolicy::none());
    let result = reindex
        .run(
            &ReindexFilter {
                only_missing: true,
                ..Default::default()
            },
            &ReindexOptions {
                batch_delay: Duration::ZERO,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 0);

    let analyzer = ConsistencyAnalyzer::new(store.clone());
    let summary = analyzer.analyze_embedding_state(2048).unwrap();
    assert_eq!(summary.consistency_status, ConsistencyStatus::Consistent);
    assert!(summary.mismatches.is_empty());

    let validation = analyzer
        .validate_index_definition("entity_embeddings", 2048)
        .unwrap();
    assert!(validation.is_valid);
}

#[tokio::test]
async fn test_migrate_dry_run_leaves_store_untouched() {
    let (_dir, store) = drifted_store();
    let engine = MigrationEngine::new(store.clone(), SettleSettings::default());
    let before = store.stats().unwrap();

    let outcomes = engine.migrate_to(2048, &index(2048), true).await.unwrap();

    assert!(outcomes.iter().all(|o| o.dry_run));
    assert_eq!(store.stats().unwrap(), before);
    assert!(store.vector_index("entity_embeddings").unwrap().is_none());
}
