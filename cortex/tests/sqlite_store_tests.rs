// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQLite store tests. Every test runs against a private in-memory database
//! except the persistence test, which uses a temporary file.

use std::sync::Arc;

use pattern_cortex::application::{ApplyContext, LearningPipeline, PatternFilter, TaskOutcome};
use pattern_cortex::domain::{
    AdaptiveThreshold, CortexConfig, EmbeddingPayload, EmbeddingRepository, OutcomeKind, Pattern, PatternId,
    PatternRepository, PatternType, ThresholdKey, ThresholdRepository, VectorEmbedding,
};
use pattern_cortex::infrastructure::{HashingEmbeddingClient, SqliteCortexStore};

fn pattern(pattern_type: PatternType, name: &str) -> Pattern {
    Pattern::new(pattern_type, name, "seeded", vec!["Read".to_string(), "Edit".to_string()])
        .with_condition("agent_type", "coder")
        .with_confidence(0.8)
}

#[tokio::test]
async fn pattern_crud() {
    let store = SqliteCortexStore::in_memory().await.unwrap();
    let mut original = pattern(PatternType::Refactoring, "Read -> Edit");
    original.usage_count = 4;
    original.metrics.success_count = 3;
    original.metrics.failure_count = 1;

    PatternRepository::save(&store, &original).await.unwrap();
    let loaded = PatternRepository::find_by_id(&store, original.id).await.unwrap().unwrap();
    assert_eq!(loaded, original);
    assert_eq!(PatternRepository::count(&store).await.unwrap(), 1);

    original.confidence = 0.55;
    original.usage_count = 5;
    PatternRepository::save(&store, &original).await.unwrap();
    let updated = PatternRepository::find_by_id(&store, original.id).await.unwrap().unwrap();
    assert_eq!(updated.confidence, 0.55);
    assert_eq!(updated.usage_count, 5);
    assert_eq!(PatternRepository::count(&store).await.unwrap(), 1);

    assert!(PatternRepository::delete(&store, original.id).await.unwrap());
    assert!(!PatternRepository::delete(&store, original.id).await.unwrap());
    assert!(PatternRepository::find_by_id(&store, original.id).await.unwrap().is_none());
}

#[tokio::test]
async fn find_by_type_filters_and_keeps_insertion_order() {
    let store = SqliteCortexStore::in_memory().await.unwrap();
    let first = pattern(PatternType::Testing, "Bash -> Test");
    let other = pattern(PatternType::Coordination, "Read -> Grep");
    let mut second = pattern(PatternType::Testing, "Edit -> Test");
    second.created_at = first.created_at + chrono::Duration::seconds(5);

    for p in [&second, &other, &first] {
        PatternRepository::save(&store, p).await.unwrap();
    }

    let testing: Vec<PatternId> = store
        .find_by_type(PatternType::Testing)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(testing, vec![first.id, second.id]);
    assert_eq!(PatternRepository::list_all(&store).await.unwrap().len(), 3);
}

#[tokio::test]
async fn merge_removes_absorbed_pattern_and_its_embedding() {
    let store = SqliteCortexStore::in_memory().await.unwrap();
    let mut survivor = pattern(PatternType::Coordination, "Read -> Grep");
    let absorbed = pattern(PatternType::Coordination, "read -> grep");
    PatternRepository::save(&store, &survivor).await.unwrap();
    PatternRepository::save(&store, &absorbed).await.unwrap();
    EmbeddingRepository::save(
        &store,
        &VectorEmbedding::new(absorbed.id, "cortex-hash-v1", &[0.1, 0.2, 0.3], false, 1),
    )
    .await
    .unwrap();

    survivor.absorb(&absorbed);
    store.apply_merge(&survivor, absorbed.id).await.unwrap();

    assert_eq!(PatternRepository::count(&store).await.unwrap(), 1);
    assert!(PatternRepository::find_by_id(&store, absorbed.id).await.unwrap().is_none());
    assert!(EmbeddingRepository::find_by_id(&store, absorbed.id).await.unwrap().is_none());
}

#[tokio::test]
async fn embeddings_round_trip_in_sequence_order() {
    let store = SqliteCortexStore::in_memory().await.unwrap();
    let raw_id = PatternId::new();
    let quantized_id = PatternId::new();
    let vector = [0.5f32, -0.25, 0.0, 1.0];

    EmbeddingRepository::save(&store, &VectorEmbedding::new(quantized_id, "m", &vector, true, 7))
        .await
        .unwrap();
    EmbeddingRepository::save(&store, &VectorEmbedding::new(raw_id, "m", &vector, false, 3))
        .await
        .unwrap();
    EmbeddingRepository::save(&store, &VectorEmbedding::new(PatternId::new(), "other", &vector, false, 1))
        .await
        .unwrap();

    let raw = EmbeddingRepository::find_by_id(&store, raw_id).await.unwrap().unwrap();
    assert_eq!(raw.payload, EmbeddingPayload::Raw(vector.to_vec()));
    assert_eq!(raw.dims, 4);

    let quantized = EmbeddingRepository::find_by_id(&store, quantized_id).await.unwrap().unwrap();
    assert!(quantized.is_compressed());
    assert_eq!(quantized, VectorEmbedding::new(quantized_id, "m", &vector, true, 7));
    for (restored, expected) in quantized.to_vector().iter().zip(vector.iter()) {
        assert!((restored - expected).abs() < 0.01);
    }

    let listed: Vec<PatternId> = store
        .list_by_model("m")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.pattern_id)
        .collect();
    assert_eq!(listed, vec![raw_id, quantized_id]);
    assert_eq!(store.max_sequence().await.unwrap(), 7);
}

#[tokio::test]
async fn thresholds_distinguish_any_file_from_specific_file() {
    let store = SqliteCortexStore::in_memory().await.unwrap();
    let mut general = AdaptiveThreshold::new(ThresholdKey::any_file("coder"), 0.95, 0.05);
    general.adjusted_threshold = 0.9;
    general.sample_size = 12;
    let rust = AdaptiveThreshold::new(ThresholdKey::new("coder", Some("rs")), 0.95, 0.05);

    ThresholdRepository::save(&store, &general).await.unwrap();
    ThresholdRepository::save(&store, &rust).await.unwrap();

    let loaded = store.find(&ThresholdKey::any_file("coder")).await.unwrap().unwrap();
    assert_eq!(loaded.key.file_type, None);
    assert_eq!(loaded.adjusted_threshold, 0.9);
    assert_eq!(loaded.sample_size, 12);

    let specific = store.find(&ThresholdKey::new("coder", Some("rs"))).await.unwrap().unwrap();
    assert_eq!(specific.key.file_type.as_deref(), Some("rs"));
    assert_eq!(specific.sample_size, 0);

    assert!(store.find(&ThresholdKey::new("coder", Some("py"))).await.unwrap().is_none());
    assert_eq!(ThresholdRepository::list_all(&store).await.unwrap().len(), 2);
}

#[tokio::test]
async fn pipeline_runs_over_sqlite() {
    let store = Arc::new(SqliteCortexStore::in_memory().await.unwrap());
    let mut config = CortexConfig::default();
    config.maintenance.enabled = false;
    let pipeline = LearningPipeline::open(
        config,
        store.clone().repositories(),
        Arc::new(HashingEmbeddingClient::default()),
        None,
    )
    .await
    .unwrap();

    let id = pipeline
        .train(pattern(PatternType::Refactoring, "Read -> Edit"))
        .await
        .unwrap()
        .pattern_id();
    assert!(EmbeddingRepository::find_by_id(store.as_ref(), id).await.unwrap().is_some());

    let applied = pipeline
        .apply_best_pattern("edit the config loader", &ApplyContext::default())
        .await
        .unwrap();
    assert_eq!(applied.pattern_id, Some(id));

    let tracked = pipeline
        .track_outcome(TaskOutcome::new(OutcomeKind::Success, 0.9, 12.0).for_pattern(id).with_agent("coder", None))
        .await
        .unwrap();
    assert!(tracked.is_complete());

    let stored = PatternRepository::find_by_id(store.as_ref(), id).await.unwrap().unwrap();
    assert_eq!(stored.usage_count, 1);
    assert!(stored.last_used.is_some());
    assert!(store.find(&ThresholdKey::any_file("coder")).await.unwrap().is_some());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cortex.db");
    let trained = pattern(PatternType::Testing, "Bash -> Test");

    {
        let store = Arc::new(SqliteCortexStore::open(&path).await.unwrap());
        let pipeline = LearningPipeline::open(
            CortexConfig::default(),
            store.clone().repositories(),
            Arc::new(HashingEmbeddingClient::default()),
            None,
        )
        .await
        .unwrap();
        pipeline.train(trained.clone()).await.unwrap();
        pipeline.shutdown().await.unwrap();
        store.pool().close().await;
    }

    let store = Arc::new(SqliteCortexStore::open(&path).await.unwrap());
    let pipeline = LearningPipeline::open(
        CortexConfig::default(),
        store.clone().repositories(),
        Arc::new(HashingEmbeddingClient::default()),
        None,
    )
    .await
    .unwrap();

    let patterns = pipeline
        .pattern_store()
        .search(&PatternFilter::of_type(PatternType::Testing))
        .await
        .unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].id, trained.id);

    // the reopened index continues the stored sequence
    let vector = pipeline.vector_index().get(trained.id).await.unwrap();
    assert!(vector.is_some());
    assert_eq!(store.max_sequence().await.unwrap(), 1);
}
