//! Cross-memory deduplication and its config cache.
//!
//! The check runs two tiers with short-circuit evaluation:
//!
//! 1. **Exact**: content fingerprint lookup yields `skip`.
//! 2. **Semantic**: cosine similarity of the content embedding against
//!    stored memories. At or above the skip threshold → `skip`; inside the
//!    middle band, an LLM judges whether the new statement *updates* the
//!    matched one → `supersede`; otherwise → `add`.
//!
//! Settings live in the graph store's config document and are read through
//! a process-local TTL cache. Failures anywhere fail open to `add`.

use crate::embedding::Embedder;
use crate::llm::{LlmClient, parse_json_response, prompts};
use crate::models::{MemoryId, content_fingerprint};
use crate::storage::GraphStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Candidates examined by the semantic tier.
const SEMANTIC_CANDIDATES: usize = 5;

/// Default TTL for cached settings.
const CONFIG_CACHE_TTL: Duration = Duration::from_secs(30);

/// Decision for one incoming statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupAction {
    /// Write a new memory.
    Add,
    /// Drop the statement; an equivalent memory exists.
    Skip(MemoryId),
    /// Replace the matched memory via supersede.
    Supersede(MemoryId),
}

/// Deduplication settings stored in the config document under `"dedup"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupSettings {
    /// Master switch; disabled means every statement is added.
    pub enabled: bool,
    /// Lower bound of the supersede band.
    pub similarity_threshold: f32,
    /// At or above this similarity the statement is skipped outright.
    pub skip_threshold: f32,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.75,
            skip_threshold: 0.90,
        }
    }
}

/// Process-local TTL cache over the stored dedup settings.
///
/// Reads hit the graph store at most once per TTL window; writes through
/// [`DedupConfigCache::store_settings`] invalidate immediately. A failed
/// read yields safe defaults.
pub struct DedupConfigCache {
    store: Arc<dyn GraphStore>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, DedupSettings)>>,
}

impl DedupConfigCache {
    /// Creates a cache with the default TTL.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self::with_ttl(store, CONFIG_CACHE_TTL)
    }

    /// Creates a cache with an explicit TTL.
    #[must_use]
    pub fn with_ttl(store: Arc<dyn GraphStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Returns the current settings, from cache when fresh.
    pub fn load(&self) -> DedupSettings {
        let mut cached = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((at, settings)) = *cached {
            if at.elapsed() < self.ttl {
                return settings;
            }
        }

        let settings = match self.store.load_config() {
            Ok(Some(document)) => document
                .get("dedup")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            Ok(None) => DedupSettings::default(),
            Err(e) => {
                tracing::warn!(error = %e, "config read failed, using dedup defaults");
                DedupSettings::default()
            },
        };
        *cached = Some((Instant::now(), settings));
        settings
    }

    /// Persists new settings into the config document and invalidates the
    /// cache.
    ///
    /// # Errors
    ///
    /// Returns an error when the config document cannot be written.
    pub fn store_settings(&self, settings: DedupSettings) -> crate::Result<()> {
        let mut document = self
            .store
            .load_config()?
            .unwrap_or_else(|| serde_json::json!({}));
        document["dedup"] = serde_json::to_value(settings)
            .map_err(|e| crate::Error::operation("store_dedup_settings", e))?;
        self.store.store_config(&document)?;
        self.invalidate();
        Ok(())
    }

    /// Drops the cached entry; the next read goes to the store.
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

#[derive(Debug, Deserialize)]
struct SupersedeResponse {
    #[serde(default)]
    updates: bool,
}

/// Cross-memory dedup checker.
pub struct DedupChecker {
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn Embedder>>,
    llm: Option<Arc<dyn LlmClient>>,
    config: DedupConfigCache,
}

impl DedupChecker {
    /// Creates a checker.
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Option<Arc<dyn Embedder>>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        let config = DedupConfigCache::new(Arc::clone(&store));
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    /// Returns the config cache, for settings writes and tests.
    #[must_use]
    pub const fn config(&self) -> &DedupConfigCache {
        &self.config
    }

    /// Decides how to ingest one statement.
    ///
    /// # Errors
    ///
    /// Returns an error only when the graph store fails; degraded embedder
    /// or LLM states fail open to [`DedupAction::Add`].
    pub fn check(&self, user_id: &str, content: &str) -> crate::Result<DedupAction> {
        let settings = self.config.load();
        if !settings.enabled {
            return Ok(DedupAction::Add);
        }

        // Exact tier.
        if let Some(existing) = self
            .store
            .find_memory_by_hash(user_id, &content_fingerprint(content))?
        {
            metrics::counter!("memforge_dedup_total", "action" => "skip", "tier" => "exact")
                .increment(1);
            return Ok(DedupAction::Skip(existing));
        }

        // Semantic tier.
        let Some(action) = self.semantic_check(user_id, content, settings)? else {
            metrics::counter!("memforge_dedup_total", "action" => "add", "tier" => "none")
                .increment(1);
            return Ok(DedupAction::Add);
        };
        Ok(action)
    }

    fn semantic_check(
        &self,
        user_id: &str,
        content: &str,
        settings: DedupSettings,
    ) -> crate::Result<Option<DedupAction>> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        let Ok(embedding) = embedder.embed(content) else {
            tracing::warn!("dedup embed failed, adding without semantic check");
            return Ok(None);
        };

        let candidates =
            self.store
                .vector_search_memories(user_id, &embedding, SEMANTIC_CANDIDATES)?;
        let Some((existing, similarity)) = candidates.into_iter().next() else {
            return Ok(None);
        };

        if similarity >= settings.skip_threshold {
            metrics::counter!("memforge_dedup_total", "action" => "skip", "tier" => "semantic")
                .increment(1);
            return Ok(Some(DedupAction::Skip(existing)));
        }
        if similarity >= settings.similarity_threshold
            && self.judges_update(user_id, &existing, content)
        {
            metrics::counter!("memforge_dedup_total", "action" => "supersede", "tier" => "semantic")
                .increment(1);
            return Ok(Some(DedupAction::Supersede(existing)));
        }
        Ok(None)
    }

    /// Middle-band judgment: does the new statement update the stored one?
    /// Fails open to `false`.
    fn judges_update(&self, user_id: &str, existing: &MemoryId, content: &str) -> bool {
        let Some(llm) = &self.llm else {
            return false;
        };
        let Ok(Some(memory)) = self.store.get_memory(user_id, existing) else {
            return false;
        };

        let user = prompts::build_supersede_prompt(&memory.content, content);
        llm.complete_with_system(prompts::SUPERSEDE_SYSTEM_PROMPT, &user)
            .and_then(|r| parse_json_response::<SupersedeResponse>("judge_supersede", &r))
            .map(|r| r.updates)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "supersede judgment failed, adding instead");
                false
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::NewMemory;
    use crate::storage::SqliteGraphStore;
    use crate::Result;

    fn store() -> Arc<dyn GraphStore> {
        Arc::new(SqliteGraphStore::in_memory().unwrap())
    }

    fn seed(store: &Arc<dyn GraphStore>, content: &str, embedder: &HashEmbedder) -> MemoryId {
        use crate::embedding::Embedder as _;
        store
            .add_memory(
                "u1",
                NewMemory {
                    content: content.to_string(),
                    embedding: embedder.embed(content).ok(),
                    ..Default::default()
                },
            )
            .unwrap()
            .id
    }

    struct UpdatesLlm(bool);

    impl LlmClient for UpdatesLlm {
        fn name(&self) -> &'static str {
            "updates"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(format!(r#"{{"updates": {}}}"#, self.0))
        }
    }

    #[test]
    fn test_exact_duplicate_skips() {
        let store = store();
        let embedder = HashEmbedder::new(256);
        let existing = seed(&store, "Alice prefers TypeScript", &embedder);

        let checker = DedupChecker::new(Arc::clone(&store), None, None);
        let action = checker.check("u1", "alice  prefers TYPESCRIPT").unwrap();
        assert_eq!(action, DedupAction::Skip(existing));
    }

    #[test]
    fn test_unrelated_content_adds() {
        let store = store();
        let embedder = HashEmbedder::new(256);
        seed(&store, "Alice prefers TypeScript", &embedder);

        let checker =
            DedupChecker::new(Arc::clone(&store), Some(Arc::new(HashEmbedder::new(256))), None);
        let action = checker.check("u1", "Deploy pipelines run nightly").unwrap();
        assert_eq!(action, DedupAction::Add);
    }

    #[test]
    fn test_middle_band_supersedes_on_update_judgment() {
        let store = store();
        let embedder = HashEmbedder::new(256);
        let existing = seed(&store, "Alice prefers TypeScript for frontend work", &embedder);

        let checker = DedupChecker::new(
            Arc::clone(&store),
            Some(Arc::new(HashEmbedder::new(256))),
            Some(Arc::new(UpdatesLlm(true))),
        );
        // Same topic, partially changed wording: lands in the middle band.
        let action = checker
            .check("u1", "Alice now prefers Rust for frontend work")
            .unwrap();
        assert_eq!(action, DedupAction::Supersede(existing));
    }

    #[test]
    fn test_middle_band_adds_when_judged_unrelated() {
        let store = store();
        let embedder = HashEmbedder::new(256);
        seed(&store, "Alice prefers TypeScript for frontend work", &embedder);

        let checker = DedupChecker::new(
            Arc::clone(&store),
            Some(Arc::new(HashEmbedder::new(256))),
            Some(Arc::new(UpdatesLlm(false))),
        );
        let action = checker
            .check("u1", "Alice now prefers Rust for frontend work")
            .unwrap();
        assert_eq!(action, DedupAction::Add);
    }

    #[test]
    fn test_disabled_always_adds() {
        let store = store();
        let embedder = HashEmbedder::new(256);
        seed(&store, "Alice prefers TypeScript", &embedder);

        let checker = DedupChecker::new(Arc::clone(&store), None, None);
        checker
            .config()
            .store_settings(DedupSettings {
                enabled: false,
                ..Default::default()
            })
            .unwrap();
        let action = checker.check("u1", "Alice prefers TypeScript").unwrap();
        assert_eq!(action, DedupAction::Add);
    }

    #[test]
    fn test_config_write_invalidates_cache() {
        let store = store();
        let cache = DedupConfigCache::new(Arc::clone(&store));
        assert_eq!(cache.load(), DedupSettings::default());

        let custom = DedupSettings {
            enabled: true,
            similarity_threshold: 0.6,
            skip_threshold: 0.95,
        };
        cache.store_settings(custom).unwrap();
        // The TTL has not elapsed; only invalidation explains a fresh read.
        assert_eq!(cache.load(), custom);
    }

    #[test]
    fn test_config_defaults_on_missing_document() {
        let cache = DedupConfigCache::new(store());
        let settings = cache.load();
        assert!(settings.enabled);
        assert!((settings.similarity_threshold - 0.75).abs() < f32::EPSILON);
    }
}
