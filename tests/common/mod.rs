//! Shared fixtures for integration tests: a scripted LLM and a wired
//! service graph over an in-memory store.

#![allow(dead_code)]

use memforge::Result;
use memforge::config::MemforgeConfig;
use memforge::embedding::HashEmbedder;
use memforge::llm::LlmClient;
use memforge::rpc::MemforgeServices;
use memforge::storage::{GraphStore, SqliteGraphStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Deterministic LLM scripted per operation.
///
/// Branches on the system prompt each service uses, so one stub covers
/// intent classification, extraction, dedup judgment, entity confirmation,
/// and categorization.
#[derive(Default)]
pub struct StubLlm {
    /// Intent JSON per exact statement; unknown statements classify STORE.
    pub intents: HashMap<String, String>,
    /// Extraction JSON returned for every extraction pass.
    pub extraction: Option<String>,
    /// Answer for the dedup supersede judgment.
    pub judges_update: bool,
    /// Answer for the resolver same-entity confirmation.
    pub confirms_same: bool,
    /// Sleep injected into extraction calls, to simulate hung extractions.
    pub extraction_delay: Option<Duration>,
}

impl StubLlm {
    pub fn with_intent(mut self, statement: &str, intent_json: &str) -> Self {
        self.intents.insert(statement.to_string(), intent_json.to_string());
        self
    }

    pub fn with_extraction(mut self, json: &str) -> Self {
        self.extraction = Some(json.to_string());
        self
    }
}

impl LlmClient for StubLlm {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(String::new())
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        if system.contains("classify a single user statement") {
            return Ok(self
                .intents
                .get(user)
                .cloned()
                .unwrap_or_else(|| r#"{"intent": "STORE"}"#.to_string()));
        }
        if system.contains("extract a knowledge graph") {
            if let Some(delay) = self.extraction_delay {
                std::thread::sleep(delay);
            }
            return Ok(self
                .extraction
                .clone()
                .unwrap_or_else(|| r#"{"entities": [], "relationships": []}"#.to_string()));
        }
        if system.contains("updates, corrects, or replaces") {
            return Ok(format!(r#"{{"updates": {}}}"#, self.judges_update));
        }
        if system.contains("same real-world entity") {
            return Ok(format!(r#"{{"same": {}}}"#, self.confirms_same));
        }
        if system.contains("category names") {
            return Ok(r#"["auto"]"#.to_string());
        }
        // Consolidation and summary prompts want plain text.
        Ok("Consolidated description.".to_string())
    }
}

/// A wired service graph plus handles for assertions.
pub struct Fixture {
    pub store: Arc<dyn GraphStore>,
    pub services: MemforgeServices,
}

/// Builds services over an in-memory store with fast drain budgets.
pub fn fixture(llm: StubLlm) -> Fixture {
    fixture_with_config(llm, test_config())
}

pub fn fixture_with_config(llm: StubLlm, config: MemforgeConfig) -> Fixture {
    let store: Arc<dyn GraphStore> = Arc::new(
        SqliteGraphStore::in_memory().expect("in-memory store"),
    );
    let embedder = Arc::new(HashEmbedder::new(config.embedding_dim));
    let services = MemforgeServices::build(
        Arc::clone(&store),
        Some(Arc::new(llm)),
        Some(embedder),
        config,
    );
    Fixture { store, services }
}

/// Test config: small embeddings, generous per-item drain so fast workers
/// finish before assertions, no gleaning by default.
pub fn test_config() -> MemforgeConfig {
    let mut config = MemforgeConfig::default();
    config.embedding_dim = 256;
    config.max_gleanings = 0;
    config
}

/// Issues `add_memories` through the RPC handler.
pub async fn add(fixture: &Fixture, arguments: serde_json::Value) -> serde_json::Value {
    memforge::rpc::execute_add_memories(&fixture.services, arguments)
        .await
        .expect("add_memories")
}

/// Issues `search_memory` through the RPC handler.
pub async fn search(fixture: &Fixture, arguments: serde_json::Value) -> serde_json::Value {
    memforge::rpc::execute_search_memory(&fixture.services, arguments)
        .await
        .expect("search_memory")
}
