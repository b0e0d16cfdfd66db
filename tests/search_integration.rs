//! Read-pipeline integration: hybrid search, confidence, filters, browse
//! mode, enrichment, and access logging.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{StubLlm, add, fixture, fixture_with_config, search, test_config};
use memforge::models::MemoryId;
use std::time::{Duration, Instant};

async fn seed(fx: &common::Fixture, statements: &[&str]) -> Vec<MemoryId> {
    let result = add(
        fx,
        serde_json::json!({
            "user_id": "u1",
            "content": statements,
            "suppress_auto_categories": true,
        }),
    )
    .await;
    result["ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|id| MemoryId::new(id.as_str().unwrap()))
        .collect()
}

#[tokio::test]
async fn hybrid_search_finds_and_scores() {
    let fx = fixture(StubLlm::default());
    seed(
        &fx,
        &[
            "Alice prefers TypeScript for frontend services",
            "Deploy pipelines run nightly at 2am",
        ],
    )
    .await;

    let result = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "typescript frontend"}),
    )
    .await;

    assert_eq!(result["confident"], serde_json::json!(true));
    let rows = result["results"].as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows[0]["memory"].as_str().unwrap().contains("TypeScript"));

    let score = rows[0]["relevance_score"].as_f64().unwrap();
    assert!(score > 0.0 && score <= 1.0);
    assert!(rows[0]["created_at"].as_str().unwrap().contains("(today)"));
    // updated_at equals created_at on fresh rows, so the key is omitted.
    assert!(rows[0].get("updated_at").is_none());
}

#[tokio::test]
async fn low_confidence_is_flagged() {
    let mut config = test_config();
    // With a handful of memories, a vector-only top hit scores 1/61; a
    // raised floor models the deep-rank regime the signal exists for.
    config.confidence_floor = 0.02;
    let fx = fixture_with_config(StubLlm::default(), config);
    seed(
        &fx,
        &[
            "Alice prefers TypeScript for frontend services",
            "Deploy pipelines run nightly at 2am",
        ],
    )
    .await;

    let result = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "quantum blockchain NFT"}),
    )
    .await;

    // No lexical match, best rrf under the floor: low confidence, but the
    // nearest-neighbor results are still returned.
    assert_eq!(result["confident"], serde_json::json!(false));
    assert!(result["message"].as_str().unwrap().contains("confidence is LOW"));
    assert!(!result["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn whitespace_query_browses() {
    let fx = fixture(StubLlm::default());
    seed(&fx, &["alpha memory", "beta memory", "gamma memory"]).await;

    let result = search(&fx, serde_json::json!({"user_id": "u1", "query": "   "})).await;

    assert_eq!(result["total"], serde_json::json!(3));
    assert_eq!(result["offset"], serde_json::json!(0));
    assert_eq!(result["results"].as_array().unwrap().len(), 3);
    // Browse mode carries no hybrid-search keys.
    assert!(result.get("confident").is_none());
    assert!(result.get("entities").is_none());
}

#[tokio::test]
async fn browse_clamps_limit_and_paginates() {
    let fx = fixture(StubLlm::default());
    seed(&fx, &["one", "two", "three"]).await;

    let clamped_up = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "", "limit": 0}),
    )
    .await;
    assert_eq!(clamped_up["limit"], serde_json::json!(1));
    assert_eq!(clamped_up["results"].as_array().unwrap().len(), 1);

    let clamped_down = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "", "limit": 5000}),
    )
    .await;
    assert_eq!(clamped_down["limit"], serde_json::json!(200));

    let page = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "", "limit": 2, "offset": 2}),
    )
    .await;
    assert_eq!(page["total"], serde_json::json!(3));
    assert_eq!(page["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn category_filter_applies_in_search_and_browse() {
    let fx = fixture(StubLlm::default());
    let ids = seed(&fx, &["project kickoff notes", "project retro notes"]).await;
    fx.store
        .assign_categories("u1", &ids[0], &["Work".to_string()])
        .unwrap();

    let result = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "project notes", "category": "work"}),
    )
    .await;
    let rows = result["results"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["memory"].as_str().unwrap().contains("kickoff"));

    let browse = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "", "category": "WORK"}),
    )
    .await;
    assert_eq!(browse["total"], serde_json::json!(1));
}

#[tokio::test]
async fn tag_filter_warns_on_low_retention() {
    let fx = fixture(StubLlm::default());
    // Ten memories matching the query; only one carries the tag.
    let statements: Vec<String> = (0..10)
        .map(|i| format!("release checklist item number {i}"))
        .collect();
    let refs: Vec<&str> = statements.iter().map(String::as_str).collect();
    let ids = seed(&fx, &refs).await;
    fx.store
        .touch_memory("u1", &ids[0], &["audited".to_string()])
        .unwrap();

    let result = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "release checklist", "tag": "Audited"}),
    )
    .await;

    let rows = result["results"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(result["total_matching"], serde_json::json!(1));
    assert!(
        result["tag_filter_warning"]
            .as_str()
            .unwrap()
            .contains("Audited")
    );
}

#[tokio::test]
async fn created_after_filters_rows() {
    let fx = fixture(StubLlm::default());
    seed(&fx, &["an older memory about releases"]).await;

    let future = chrono::Utc::now() + chrono::Duration::hours(1);
    let result = search(
        &fx,
        serde_json::json!({
            "user_id": "u1",
            "query": "releases",
            "created_after": future.to_rfc3339(),
        }),
    )
    .await;
    assert_eq!(result["results"].as_array().unwrap().len(), 0);
    assert_eq!(result["total_matching"], serde_json::json!(0));
}

#[tokio::test]
async fn entity_enrichment_attaches_graph_context() {
    let llm = StubLlm::default().with_extraction(
        r#"{"entities": [
            {"name": "Alice", "type": "PERSON", "description": "An engineer"},
            {"name": "Acme", "type": "ORGANIZATION", "description": "A company"}],
          "relationships": [
            {"source": "Alice", "target": "Acme", "type": "WORKS_AT", "description": "employment"}]}"#,
    );
    let fx = fixture(llm);
    let ids = seed(&fx, &["Alice works at Acme on the platform team"]).await;

    // Extraction drains within the call; poll defensively anyway.
    let deadline = Instant::now() + Duration::from_secs(5);
    while fx.store.entities_for_memory(&ids[0]).unwrap().len() < 2 {
        assert!(Instant::now() < deadline, "extraction never landed");
        std::thread::sleep(Duration::from_millis(20));
    }

    let result = search(&fx, serde_json::json!({"user_id": "u1", "query": "Alice platform"})).await;
    let entities = result["entities"].as_array().unwrap();
    assert_eq!(entities.len(), 2);

    let alice = entities
        .iter()
        .find(|e| e["name"] == serde_json::json!("Alice"))
        .unwrap();
    assert_eq!(alice["type"], serde_json::json!("PERSON"));
    assert_eq!(alice["memoryCount"], serde_json::json!(1));
    let relationships = alice["relationships"].as_array().unwrap();
    assert_eq!(relationships[0]["type"], serde_json::json!("WORKS_AT"));
    assert_eq!(relationships[0]["target"], serde_json::json!("Acme"));
}

#[tokio::test]
async fn enrichment_skippable() {
    let fx = fixture(StubLlm::default());
    seed(&fx, &["plain memory"]).await;

    let result = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "plain memory", "include_entities": false}),
    )
    .await;
    assert!(result.get("entities").is_none());
}

#[tokio::test]
async fn access_logging_increments_per_response() {
    let fx = fixture(StubLlm::default());
    let ids = seed(&fx, &["a memory that will be accessed"]).await;

    let _ = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "accessed", "app_name": "claude"}),
    )
    .await;

    // Fire-and-forget: poll until the counter lands.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let count = fx.store.access_count("u1", "claude", &ids[0]).unwrap();
        if count == 1 {
            break;
        }
        assert!(Instant::now() < deadline, "access log never landed");
        std::thread::sleep(Duration::from_millis(20));
    }

    // A second retrieval adds exactly one.
    let _ = search(
        &fx,
        serde_json::json!({"user_id": "u1", "query": "accessed", "app_name": "claude"}),
    )
    .await;
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let count = fx.store.access_count("u1", "claude", &ids[0]).unwrap();
        if count == 2 {
            break;
        }
        assert!(Instant::now() < deadline, "second access never landed");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[tokio::test]
async fn search_is_user_scoped() {
    let fx = fixture(StubLlm::default());
    seed(&fx, &["u1 private memory about rust"]).await;

    let result = search(&fx, serde_json::json!({"user_id": "u2", "query": "rust"})).await;
    assert_eq!(result["results"].as_array().unwrap().len(), 0);
    assert_eq!(result["confident"], serde_json::json!(true));
}
