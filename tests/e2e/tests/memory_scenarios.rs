//! Memory engine scenarios: factual recall, surprise filtering, intent
//! routing, persistence, and export round trips.

use chrono::{Duration, Utc};
use engram_core::{
    AddInput, EngineConfig, FeedbackSignal, IntentType, MemoryEngine, MemoryLayer, RecallInput,
    SearchStrategy, calculate_decay,
};

#[tokio::test]
async fn factual_recall_returns_verbatim_content() {
    let engine = MemoryEngine::ephemeral();
    let added = engine
        .add(AddInput::content("The API key is sk-test-12345"))
        .await
        .unwrap();
    assert!(added.stored);

    let result = engine
        .recall(RecallInput::query("What is the API key?").with_limit(5))
        .await;
    let hit = result
        .fused_memories
        .iter()
        .find(|m| m.entry.id == added.entry.id)
        .expect("added memory must be recalled");
    assert!(hit.score > 0.0);
    assert_eq!(hit.entry.content, "The API key is sk-test-12345");
}

#[tokio::test]
async fn repeated_adds_become_ghosts() {
    let engine = MemoryEngine::ephemeral();
    let text = "Database connection string: postgres://localhost:5432/mydb";

    let first = engine.add(AddInput::content(text)).await.unwrap();
    assert!(first.stored);

    for _ in 0..9 {
        let outcome = engine.add(AddInput::content(text)).await.unwrap();
        assert!(!outcome.stored);
        assert!(outcome.entry.id.starts_with("ghost_"));
        assert!(!outcome.similar_memories.is_empty());
    }

    assert_eq!(engine.stats().await.long_term, 1);
}

#[tokio::test]
async fn timeline_intent_routes_to_episodic() {
    let engine = MemoryEngine::ephemeral();
    let intent = engine.detect_query_intent("When did we deploy v2.0?");
    assert_eq!(intent.intent_type, IntentType::TimelineQuery);
    assert_eq!(intent.priority_layer, MemoryLayer::Episodic);
    assert_eq!(intent.search_strategy, SearchStrategy::Temporal);
    assert!(intent.confidence >= 0.7);

    // The routed recall actually finds the episodic entry
    engine
        .add(AddInput::content("We deployed v2.0 to production today"))
        .await
        .unwrap();
    let result = engine
        .recall(RecallInput::query("When did we deploy v2.0?"))
        .await;
    assert!(
        result
            .fused_memories
            .iter()
            .any(|m| m.entry.content.contains("deployed v2.0"))
    );
}

#[tokio::test]
async fn recall_with_highlighting_extracts_answer() {
    let engine = MemoryEngine::ephemeral();
    engine
        .add(AddInput::content(
            "The API key is sk-test-12345. Unrelated trailing chatter about lunch.",
        ))
        .await
        .unwrap();

    let mut input = RecallInput::query("What is the API key?");
    input.highlight = true;
    let result = engine.recall(input).await;

    let sentences = result.highlighted_sentences.expect("highlighting ran");
    assert!(!sentences.is_empty());
    assert!(sentences.iter().any(|s| s.sentence.contains("sk-test-12345")));
    let compression = result.compression_rate.expect("compression recorded");
    assert!(compression > 0.0 && compression <= 1.0);
}

#[tokio::test]
async fn utility_feedback_follows_counts() {
    let engine = MemoryEngine::ephemeral();
    let added = engine
        .add_to_layer(AddInput::content("rated memory"), MemoryLayer::LongTerm)
        .await
        .unwrap();

    engine
        .record_feedback(&added.entry.id, FeedbackSignal::Helpful, Some("s1"))
        .await
        .unwrap();
    engine
        .record_feedback(&added.entry.id, FeedbackSignal::Helpful, Some("s2"))
        .await
        .unwrap();
    let outcome = engine
        .record_feedback(&added.entry.id, FeedbackSignal::Harmful, Some("s3"))
        .await
        .unwrap();

    // P1: |utility − h/(h+k)| < 1e-9
    assert!((outcome.utility_score - 2.0 / 3.0).abs() < 1e-9);

    // Idempotence: the same (session, memory, signal) is a no-op
    let replay = engine
        .record_feedback(&added.entry.id, FeedbackSignal::Harmful, Some("s3"))
        .await
        .unwrap();
    assert!(!replay.applied);
    assert_eq!(replay.harmful_count, 1);
}

#[test]
fn decay_is_monotone_without_access() {
    let now = Utc::now();
    let created = now - Duration::days(30);
    let earlier = calculate_decay(created, None, 180.0, now - Duration::days(10));
    let later = calculate_decay(created, None, 180.0, now);
    assert!(later < earlier);
    assert!(later > 0.0 && earlier < 1.0);

    // halfLife → ∞ ⇒ decay → 1
    assert_eq!(calculate_decay(created, None, f64::INFINITY, now), 1.0);
}

#[tokio::test]
async fn engine_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        offline_mode: true,
        ..EngineConfig::at(dir.path())
    };

    let (fact_id, episodic_id) = {
        let engine = MemoryEngine::open(config.clone()).unwrap();
        let fact = engine
            .add_to_layer(
                AddInput::content("The staging host is staging-03"),
                MemoryLayer::Factual,
            )
            .await
            .unwrap();
        let episode = engine
            .add_to_layer(
                AddInput::content("rolled the canary back at 3pm"),
                MemoryLayer::Episodic,
            )
            .await
            .unwrap();
        engine
            .add_to_layer(
                AddInput::content("we always use feature flags for risky rollouts"),
                MemoryLayer::Semantic,
            )
            .await
            .unwrap();
        (fact.entry.id, episode.entry.id)
    };

    let reopened = MemoryEngine::open(config).unwrap();
    let stats = reopened.stats().await;
    assert_eq!(stats.factual, 1);
    assert_eq!(stats.episodic, 1);
    assert_eq!(stats.semantic, 1);
    assert!(reopened.get(&fact_id).await.is_some());
    assert!(reopened.get(&episodic_id).await.is_some());
}

#[tokio::test]
async fn export_reimport_preserves_per_layer_counts() {
    let engine = MemoryEngine::ephemeral();
    engine
        .add_to_layer(AddInput::content("fact alpha is 1"), MemoryLayer::Factual)
        .await
        .unwrap();
    engine
        .add_to_layer(AddInput::content("fact beta is 2"), MemoryLayer::Factual)
        .await
        .unwrap();
    engine
        .add_to_layer(AddInput::content("durable note"), MemoryLayer::LongTerm)
        .await
        .unwrap();
    engine
        .add_to_layer(
            AddInput::content("we decided to pin toolchains"),
            MemoryLayer::Semantic,
        )
        .await
        .unwrap();
    engine
        .add_to_layer(AddInput::content("standup at ten"), MemoryLayer::Episodic)
        .await
        .unwrap();

    let export = engine.export().await;
    let before = engine.stats().await;

    let restored = MemoryEngine::ephemeral();
    restored.import(export).await.unwrap();
    let after = restored.stats().await;

    assert_eq!(before.factual, after.factual);
    assert_eq!(before.long_term, after.long_term);
    assert_eq!(before.semantic, after.semantic);
    assert_eq!(before.episodic, after.episodic);
    assert_eq!(before.total, after.total);
}

#[tokio::test]
async fn curated_notebook_surfaces_in_recall() {
    let engine = MemoryEngine::ephemeral();
    engine.curate("Conventions", "we never force-push to main, use revert commits");

    let result = engine
        .recall(RecallInput::query("force-push main revert commits convention"))
        .await;
    let curated = result
        .fused_memories
        .iter()
        .find(|m| m.origin == MemoryLayer::Curated)
        .expect("notebook section among results");
    assert!(curated.entry.content.contains("revert commits"));
}
