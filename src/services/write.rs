//! The `add_memories` write pipeline.
//!
//! Per item: intent classification → dispatch. The STORE path runs
//! intra-batch and cross-memory deduplication, writes the memory and its
//! categories, then fires background extraction and *drains* it: a bounded
//! await, under a per-item deadline and a global batch budget, that
//! serializes the single-writer lexical index. Item failures are isolated into
//! `errors[]`; the batch never aborts whole.

use crate::config::MemforgeConfig;
use crate::embedding::Embedder;
use crate::llm::{LlmClient, parse_json_response, prompts};
use crate::models::{EntityRef, Intent, MemoryId, NewMemory, normalized_name};
use crate::services::dedup::{DedupAction, DedupChecker};
use crate::services::intent::IntentClassifier;
use crate::services::worker::ExtractionWorker;
use crate::storage::GraphStore;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Minimum cosine similarity for INVALIDATE/TOUCH/RESOLVE target lookup.
const TARGET_MATCH_THRESHOLD: f32 = 0.60;

/// Candidates considered when locating a target memory.
const TARGET_CANDIDATES: usize = 5;

/// One `add_memories` call.
#[derive(Debug, Clone, Default)]
pub struct AddMemoriesRequest {
    /// Owning user scope.
    pub user_id: String,
    /// Ordered statements to ingest.
    pub items: Vec<String>,
    /// Tags applied to stored/superseded memories and TOUCH targets.
    pub tags: Vec<String>,
    /// Explicit categories linked to stored memories.
    pub categories: Vec<String>,
    /// Skips LLM auto-categorization. Unset with explicit categories
    /// present is treated as suppressed.
    pub suppress_auto_categories: Option<bool>,
    /// Asserted id of the memory to supersede, bypassing classification and
    /// dedup. Valid only for single-item calls.
    pub replaces: Option<MemoryId>,
    /// Source client identifier.
    pub app_name: String,
}

/// A captured per-item failure.
#[derive(Debug, Clone)]
pub struct ItemError {
    /// Index of the failing item in the request.
    pub index: usize,
    /// Failure message.
    pub message: String,
}

/// Aggregated result of one `add_memories` call.
#[derive(Debug, Clone, Default)]
pub struct AddMemoriesOutcome {
    /// Memories written fresh.
    pub stored: usize,
    /// Memories written by superseding an existing one.
    pub superseded: usize,
    /// Items dropped by intra-batch or cross-memory dedup.
    pub skipped: usize,
    /// Memories tombstoned by INVALIDATE.
    pub invalidated: usize,
    /// Entities removed by DELETE_ENTITY.
    pub deleted: usize,
    /// Memories refreshed by TOUCH.
    pub touched: usize,
    /// Memories marked by RESOLVE.
    pub resolved: usize,
    /// Ids of stored and superseded memories, in item order.
    pub ids: Vec<String>,
    /// Ids refreshed by TOUCH.
    pub touched_ids: Vec<String>,
    /// Ids marked by RESOLVE.
    pub resolved_ids: Vec<String>,
    /// Isolated per-item failures.
    pub errors: Vec<ItemError>,
}

impl AddMemoriesOutcome {
    /// Serializes the outcome, omitting zero-valued keys.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        let mut count = |key: &str, value: usize| {
            if value > 0 {
                object.insert(key.to_string(), serde_json::json!(value));
            }
        };
        count("stored", self.stored);
        count("superseded", self.superseded);
        count("skipped", self.skipped);
        count("invalidated", self.invalidated);
        count("deleted", self.deleted);
        count("touched", self.touched);
        count("resolved", self.resolved);

        if !self.ids.is_empty() {
            object.insert("ids".to_string(), serde_json::json!(self.ids));
        }
        if !self.touched_ids.is_empty() {
            object.insert("touched_ids".to_string(), serde_json::json!(self.touched_ids));
        }
        if !self.resolved_ids.is_empty() {
            object.insert("resolved_ids".to_string(), serde_json::json!(self.resolved_ids));
        }
        if !self.errors.is_empty() {
            let errors: Vec<serde_json::Value> = self
                .errors
                .iter()
                .map(|e| serde_json::json!({"index": e.index, "message": e.message}))
                .collect();
            object.insert("errors".to_string(), serde_json::json!(errors));
        }
        serde_json::Value::Object(object)
    }
}

/// Normalization for the intra-batch seen-set: lowercase with collapsed
/// whitespace.
fn batch_key(item: &str) -> String {
    item.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The ingestion pipeline service.
pub struct MemoryWriteService {
    store: Arc<dyn GraphStore>,
    classifier: IntentClassifier,
    dedup: DedupChecker,
    worker: Arc<ExtractionWorker>,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: MemforgeConfig,
}

impl MemoryWriteService {
    /// Creates the pipeline.
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        classifier: IntentClassifier,
        dedup: DedupChecker,
        worker: Arc<ExtractionWorker>,
        llm: Option<Arc<dyn LlmClient>>,
        embedder: Option<Arc<dyn Embedder>>,
        config: MemforgeConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            dedup,
            worker,
            llm,
            embedder,
            config,
        }
    }

    /// Ingests a batch of statements.
    ///
    /// Items are processed sequentially on the memory-write path; each
    /// STORE item's extraction is drained before the next item's write
    /// begins, until the batch budget runs dry.
    ///
    /// Blocking: classification, dedup, and drains all wait on slow
    /// collaborators. Callers on an async runtime dispatch through
    /// [`execute_add_memories`](crate::rpc::execute_add_memories), which
    /// isolates the call on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a missing user scope or a
    /// `replaces` id on a multi-item batch. Per-item failures land in
    /// `errors[]` instead.
    pub fn add_memories(&self, request: &AddMemoriesRequest) -> Result<AddMemoriesOutcome> {
        if request.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id is required".to_string()));
        }
        if request.replaces.is_some() && request.items.len() != 1 {
            return Err(Error::InvalidInput(
                "replaces is valid only for single-item calls".to_string(),
            ));
        }

        let mut outcome = AddMemoriesOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut budget = self.config.drain_budget;

        for (index, item) in request.items.iter().enumerate() {
            let result = self.process_item(request, item, &mut seen, &mut budget, &mut outcome);
            if let Err(e) = result {
                tracing::warn!(error = %e, index, "add_memories item failed");
                outcome.errors.push(ItemError {
                    index,
                    message: e.to_string(),
                });
            }
        }
        Ok(outcome)
    }

    fn process_item(
        &self,
        request: &AddMemoriesRequest,
        item: &str,
        seen: &mut HashSet<String>,
        budget: &mut Duration,
        outcome: &mut AddMemoriesOutcome,
    ) -> Result<()> {
        // An asserted `replaces` short-circuits classification and dedup.
        if let Some(old_id) = &request.replaces {
            let memory_id = self
                .write_memory(request, item, Some(old_id.clone()))
                .map(|id| {
                    outcome.superseded += 1;
                    id
                })?;
            outcome.ids.push(memory_id.to_string());
            self.fire_extraction(&request.user_id, &memory_id, budget);
            return Ok(());
        }

        match self.classifier.classify(item) {
            Intent::Store => self.store_item(request, item, seen, budget, outcome),
            Intent::Invalidate { target } => {
                for id in self.locate_targets(&request.user_id, &target)? {
                    self.store.invalidate_memory(&request.user_id, &id)?;
                    outcome.invalidated += 1;
                }
                Ok(())
            },
            Intent::DeleteEntity { entity } => {
                let id = match entity {
                    EntityRef::Id(id) => Some(id),
                    EntityRef::Name(name) => self
                        .store
                        .find_entity_by_normalized(&request.user_id, &normalized_name(&name))?
                        .map(|e| e.id),
                };
                let deleted = match id {
                    Some(id) => self.store.delete_entity(&request.user_id, &id)?,
                    None => false,
                };
                if deleted {
                    outcome.deleted += 1;
                    Ok(())
                } else {
                    Err(Error::NotFound("entity to delete".to_string()))
                }
            },
            Intent::Touch { target } => {
                let id = self
                    .locate_targets(&request.user_id, &target)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::NotFound(format!("memory matching '{target}'")))?;
                self.store.touch_memory(&request.user_id, &id, &request.tags)?;
                outcome.touched += 1;
                outcome.touched_ids.push(id.to_string());
                Ok(())
            },
            Intent::Resolve { target } => {
                let id = self
                    .locate_targets(&request.user_id, &target)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::NotFound(format!("memory matching '{target}'")))?;
                self.store.resolve_memory(&request.user_id, &id)?;
                outcome.resolved += 1;
                outcome.resolved_ids.push(id.to_string());
                Ok(())
            },
        }
    }

    fn store_item(
        &self,
        request: &AddMemoriesRequest,
        item: &str,
        seen: &mut HashSet<String>,
        budget: &mut Duration,
        outcome: &mut AddMemoriesOutcome,
    ) -> Result<()> {
        // Intra-batch dedup: repeats skip the cross-memory check entirely.
        if !seen.insert(batch_key(item)) {
            outcome.skipped += 1;
            return Ok(());
        }

        let memory_id = match self.dedup.check(&request.user_id, item)? {
            DedupAction::Skip(_) => {
                outcome.skipped += 1;
                return Ok(());
            },
            DedupAction::Add => {
                let id = self.write_memory(request, item, None)?;
                outcome.stored += 1;
                id
            },
            DedupAction::Supersede(old_id) => {
                let id = self.write_memory(request, item, Some(old_id))?;
                outcome.superseded += 1;
                id
            },
        };
        outcome.ids.push(memory_id.to_string());

        self.fire_extraction(&request.user_id, &memory_id, budget);
        Ok(())
    }

    /// Writes the memory node (fresh or superseding) and its categories.
    fn write_memory(
        &self,
        request: &AddMemoriesRequest,
        item: &str,
        supersedes: Option<MemoryId>,
    ) -> Result<MemoryId> {
        let embedding = self
            .embedder
            .as_ref()
            .and_then(|e| e.embed(item).map_err(|err| {
                tracing::warn!(error = %err, "memory embedding failed, storing without");
            }).ok());

        let record = NewMemory {
            content: item.to_string(),
            tags: request.tags.clone(),
            app_name: request.app_name.clone(),
            embedding,
        };
        let memory = match supersedes {
            Some(old_id) => self.store.supersede_memory(&request.user_id, &old_id, record)?,
            None => self.store.add_memory(&request.user_id, record)?,
        };

        if !request.categories.is_empty() {
            self.store
                .assign_categories(&request.user_id, &memory.id, &request.categories)?;
        }
        // Explicit categories with the flag unset suppress auto-categorization.
        let suppressed = request
            .suppress_auto_categories
            .unwrap_or(!request.categories.is_empty());
        if !suppressed {
            self.auto_categorize(&request.user_id, &memory.id, item);
        }

        Ok(memory.id)
    }

    /// LLM auto-categorization. Fails open to no categories.
    fn auto_categorize(&self, user_id: &str, memory_id: &MemoryId, content: &str) {
        let Some(llm) = &self.llm else {
            return;
        };
        let categories = llm
            .complete_with_model(
                &self.config.llm.categorization_model,
                prompts::CATEGORIZATION_SYSTEM_PROMPT,
                content,
            )
            .and_then(|r| parse_json_response::<Vec<String>>("auto_categorize", &r))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "auto-categorization failed");
                Vec::new()
            });
        if categories.is_empty() {
            return;
        }
        if let Err(e) = self.store.assign_categories(user_id, memory_id, &categories) {
            tracing::warn!(error = %e, "auto-category write failed");
        }
    }

    /// Launches background extraction and drains it within the remaining
    /// budget. A timed-out drain abandons the completion channel; the task
    /// keeps running detached and self-completes (logs only).
    fn fire_extraction(&self, user_id: &str, memory_id: &MemoryId, budget: &mut Duration) {
        let worker = Arc::clone(&self.worker);
        let user = user_id.to_string();
        let id = memory_id.clone();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        super::fire_and_forget(move || {
            worker.run(&user, &id);
            // The receiver is gone once the drain times out.
            let _ = done_tx.send(());
        });

        if budget.is_zero() {
            metrics::counter!("memforge_drains_total", "mode" => "fire_and_forget").increment(1);
            return;
        }

        let drain = self.config.drain_per_item.min(*budget);
        let started = Instant::now();
        if done_rx.recv_timeout(drain).is_ok() {
            metrics::counter!("memforge_drains_total", "mode" => "completed").increment(1);
        } else {
            metrics::counter!("memforge_drains_total", "mode" => "timed_out").increment(1);
            tracing::debug!(memory = %memory_id, "extraction drain timed out, detaching");
        }
        *budget = budget.saturating_sub(started.elapsed());
    }

    /// Locates memories matching a natural-language target: embedding
    /// search first, lexical fallback when embeddings are unavailable or
    /// nothing clears the similarity floor.
    fn locate_targets(&self, user_id: &str, target: &str) -> Result<Vec<MemoryId>> {
        if let Some(embedder) = &self.embedder {
            if let Ok(embedding) = embedder.embed(target) {
                let matched: Vec<MemoryId> = self
                    .store
                    .vector_search_memories(user_id, &embedding, TARGET_CANDIDATES)?
                    .into_iter()
                    .filter(|(_, similarity)| *similarity >= TARGET_MATCH_THRESHOLD)
                    .map(|(id, _)| id)
                    .collect();
                if !matched.is_empty() {
                    return Ok(matched);
                }
            }
        }
        self.store.lexical_search(user_id, target, TARGET_CANDIDATES)
    }
}
