use chrono::Utc;
use graphvec::embedding::{
    EmbeddingProvider, FallbackProvider, MockFailure, MockProvider, RetryPolicy,
};
use graphvec::migration::{ClearAllOptions, MigrationEngine, SettleSettings};
use graphvec::reindex::{ReindexEngine, ReindexError, ReindexFilter, ReindexOptions};
use graphvec::storage::{GraphStore, NewEntity, SqliteGraphStore, StoredEmbedding};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DIMS: usize = 16;

fn seeded_store(names: &[&str]) -> (TempDir, Arc<SqliteGraphStore>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteGraphStore::open(&dir.path().join("graph.sqlite"))
        .expect("Failed to open store");
    for name in names {
        store
            .insert_entity(&NewEntity::new(
                *name,
                "concept",
                vec![format!("notes on {}", name)],
            ))
            .unwrap();
    }
    (dir, Arc::new(store))
}

fn ten_names() -> Vec<String> {
    (0..10).map(|i| format!("entity-{}", i)).collect()
}

fn no_delay(batch_size: usize) -> ReindexOptions {
    ReindexOptions {
        batch_size,
        batch_delay: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_batch() {
    let names = ten_names();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (_dir, store) = seeded_store(&refs);

    let provider = MockProvider::new(DIMS).fail_when_contains("entity-4", MockFailure::InvalidResponse);
    let engine = ReindexEngine::new(store.clone(), Arc::new(provider))
        .with_retry_policy(RetryPolicy::none());

    let result = engine
        .run(&ReindexFilter::default(), &no_delay(3))
        .await
        .unwrap();

    assert_eq!(result.total, 10);
    assert_eq!(result.processed, 10);
    assert_eq!(result.succeeded, 9);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].entity_name, "entity-4");
    assert!(!result.cancelled);

    assert!(!store.get_entity("entity-4").unwrap().unwrap().has_embedding());
    assert_eq!(store.count_with_embeddings().unwrap(), 9);
}

#[tokio::test]
async fn test_progress_is_reported_per_entity() {
    let names = ten_names();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (_dir, store) = seeded_store(&refs);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = ReindexEngine::new(store, Arc::new(MockProvider::new(DIMS))).with_progress(tx);

    engine
        .run(&ReindexFilter::default(), &no_delay(3))
        .await
        .unwrap();
    drop(engine);

    let mut events = Vec::new();
    while let Some(progress) = rx.recv().await {
        events.push(progress);
    }

    assert_eq!(events.len(), 10);
    for (i, progress) in events.iter().enumerate() {
        assert_eq!(progress.processed, i + 1);
        assert_eq!(progress.total, 10);
        assert_eq!(progress.total_batches, 4);
        assert_eq!(progress.current_batch, i / 3 + 1);
    }
    let last = events.last().unwrap();
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.estimated_time_remaining, Some(Duration::ZERO));
}

#[tokio::test(start_paused = true)]
async fn test_batch_delay_only_between_batches() {
    let (_dir, store) = seeded_store(&["a", "b", "c"]);
    let engine = ReindexEngine::new(store, Arc::new(MockProvider::new(DIMS)));

    let options = ReindexOptions {
        batch_size: 1,
        batch_delay: Duration::from_millis(500),
        ..Default::default()
    };
    let start = tokio::time::Instant::now();
    let result = engine.run(&ReindexFilter::default(), &options).await.unwrap();

    assert_eq!(result.succeeded, 3);
    // Two gaps for three batches, none after the last
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_batch_delay() {
    let (_dir, store) = seeded_store(&["a", "b", "c", "d"]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = ReindexEngine::new(store.clone(), Arc::new(MockProvider::new(DIMS)))
        .with_progress(tx);
    let token = engine.cancellation_token();

    let options = ReindexOptions {
        batch_size: 1,
        batch_delay: Duration::from_secs(60),
        ..Default::default()
    };
    let filter = ReindexFilter::default();

    let (result, _) = tokio::join!(engine.run(&filter, &options), async {
        rx.recv().await;
        token.cancel();
    });
    let result = result.unwrap();

    assert!(result.cancelled);
    assert_eq!(result.processed, 1);
    assert_eq!(result.succeeded, 1);
    assert_eq!(store.count_with_embeddings().unwrap(), 1);
}

#[tokio::test]
async fn test_resume_after_clear_skips_fresh_embeddings() {
    let (_dir, store) = seeded_store(&["a", "b", "c", "d"]);
    for name in ["a", "b", "c", "d"] {
        store
            .set_embedding(
                name,
                &StoredEmbedding {
                    vector: vec![0.25; DIMS],
                    model: "old-model".into(),
                    updated_at: Utc::now(),
                },
            )
            .unwrap();
    }

    MigrationEngine::new(store.clone(), SettleSettings::default())
        .clear_all(ClearAllOptions { skip_backup: true }, false)
        .unwrap();

    let engine = ReindexEngine::new(store.clone(), Arc::new(MockProvider::new(DIMS)));

    // An interrupted run got through one entity
    let first = engine
        .run(
            &ReindexFilter {
                force: true,
                limit: Some(1),
                ..Default::default()
            },
            &no_delay(10),
        )
        .await
        .unwrap();
    assert_eq!(first.succeeded, 1);

    let resumed = engine
        .run(
            &ReindexFilter {
                force: true,
                ..Default::default()
            },
            &ReindexOptions {
                resume_after_clear: true,
                ..no_delay(10)
            },
        )
        .await
        .unwrap();

    assert_eq!(resumed.total, 4);
    assert_eq!(resumed.skipped, 1);
    assert_eq!(resumed.succeeded, 3);
    assert_eq!(store.count_with_embeddings().unwrap(), 4);
}

#[tokio::test]
async fn test_unforced_run_skips_current_embeddings() {
    let (_dir, store) = seeded_store(&["a", "b"]);
    let provider = Arc::new(MockProvider::new(DIMS));
    let engine = ReindexEngine::new(store, provider.clone());

    let first = engine
        .run(&ReindexFilter::default(), &no_delay(10))
        .await
        .unwrap();
    assert_eq!(first.succeeded, 2);

    let second = engine
        .run(&ReindexFilter::default(), &no_delay(10))
        .await
        .unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_custom_query_selects_entities() {
    let (_dir, store) = seeded_store(&["alpha", "beta", "gamma"]);
    let engine = ReindexEngine::new(store.clone(), Arc::new(MockProvider::new(DIMS)));

    let filter = ReindexFilter {
        custom_query: Some("SELECT name FROM entities WHERE name LIKE '%a'".into()),
        ..Default::default()
    };
    assert_eq!(engine.count_matching(&filter).unwrap(), 3);

    let filter = ReindexFilter {
        custom_query: Some("SELECT name FROM entities WHERE name = 'beta'".into()),
        ..Default::default()
    };
    let result = engine.run(&filter, &no_delay(10)).await.unwrap();
    assert_eq!(result.succeeded, 1);
    assert!(store.get_entity("beta").unwrap().unwrap().has_embedding());
    assert!(!store.get_entity("alpha").unwrap().unwrap().has_embedding());
}

#[tokio::test]
async fn test_invalid_requests_fail_the_whole_run() {
    let (_dir, store) = seeded_store(&["a"]);
    let engine = ReindexEngine::new(store, Arc::new(MockProvider::new(DIMS)));

    let bad_pattern = ReindexFilter {
        name_pattern: Some("([unclosed".into()),
        ..Default::default()
    };
    assert!(matches!(
        engine.run(&bad_pattern, &no_delay(10)).await,
        Err(ReindexError::InvalidPattern { .. })
    ));

    let no_types = ReindexFilter {
        entity_types: Some(vec![]),
        ..Default::default()
    };
    assert!(matches!(
        engine.run(&no_types, &no_delay(10)).await,
        Err(ReindexError::EmptyEntityTypes)
    ));

    let write_query = ReindexFilter {
        custom_query: Some("DELETE FROM entities".into()),
        ..Default::default()
    };
    assert!(matches!(
        engine.run(&write_query, &no_delay(10)).await,
        Err(ReindexError::InvalidCustomQuery(_))
    ));
}

#[tokio::test]
async fn test_fallback_vector_records_the_model_that_made_it() {
    let (_dir, store) = seeded_store(&["a"]);

    let primary: Arc<dyn EmbeddingProvider> = Arc::new(
        MockProvider::new(DIMS)
            .with_model("primary-model")
            .fail_when_contains("", MockFailure::Authentication),
    );
    let secondary: Arc<dyn EmbeddingProvider> =
        Arc::new(MockProvider::new(DIMS).with_model("secondary-model"));
    let degraded = FallbackProvider::new(vec![primary, secondary.clone()]).unwrap();

    let engine = ReindexEngine::new(store.clone(), Arc::new(degraded))
        .with_retry_policy(RetryPolicy::none());
    let result = engine
        .run(&ReindexFilter::default(), &no_delay(10))
        .await
        .unwrap();
    assert_eq!(result.succeeded, 1);
    assert_eq!(
        store.get_entity("a").unwrap().unwrap().embedding_model.as_deref(),
        Some("secondary-model")
    );

    // Once the primary recovers, an unforced run replaces the stand-in vector
    let healthy: Arc<dyn EmbeddingProvider> =
        Arc::new(MockProvider::new(DIMS).with_model("primary-model"));
    let recovered = FallbackProvider::new(vec![healthy, secondary]).unwrap();
    let engine = ReindexEngine::new(store.clone(), Arc::new(recovered));
    let result = engine
        .run(&ReindexFilter::default(), &no_delay(10))
        .await
        .unwrap();
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.skipped, 0);
    assert_eq!(
        store.get_entity("a").unwrap().unwrap().embedding_model.as_deref(),
        Some("primary-model")
    );
}
