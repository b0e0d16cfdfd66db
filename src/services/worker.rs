//! Background extraction worker.
//!
//! Fired per memory id from the write pipeline, never from hot paths. The
//! worker extracts entities and relationships, resolves them into the
//! user's knowledge graph, links mentions, and fans out fire-and-forget
//! summarization tasks. Failures mark the memory `failed` with the message
//! stored on the node; they never propagate to a client.

use crate::embedding::Embedder;
use crate::llm::{LlmClient, prompts};
use crate::models::{Entity, EntityId, ExtractionStatus, MemoryId, Relationship, normalized_name};
use crate::services::extraction::{
    CombinedExtractor, ExtractedEntity, ExtractionOptions, MAX_COREF_CONTEXT,
};
use crate::services::resolver::EntityResolver;
use crate::storage::{EntityUpdate, GraphStore};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Memory excerpts fed into an entity summary.
const SUMMARY_EXCERPTS: usize = 10;

/// Orchestrates one memory's extraction pipeline.
pub struct ExtractionWorker {
    store: Arc<dyn GraphStore>,
    extractor: CombinedExtractor,
    resolver: EntityResolver,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn Embedder>>,
    /// Mention count at which an entity summary fires.
    summary_threshold: usize,
}

impl ExtractionWorker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        extractor: CombinedExtractor,
        resolver: EntityResolver,
        llm: Option<Arc<dyn LlmClient>>,
        embedder: Option<Arc<dyn Embedder>>,
        summary_threshold: usize,
    ) -> Self {
        Self {
            store,
            extractor,
            resolver,
            llm,
            embedder,
            summary_threshold,
        }
    }

    /// Runs extraction for one memory.
    ///
    /// Idempotent: a memory already marked `done` is skipped. Errors are
    /// captured onto the memory node and swallowed.
    pub fn run(&self, user_id: &str, memory_id: &MemoryId) {
        match self.process(user_id, memory_id) {
            Ok(ran) => {
                if ran {
                    metrics::counter!("memforge_extractions_total", "outcome" => "done")
                        .increment(1);
                }
            },
            Err(e) => {
                metrics::counter!("memforge_extractions_total", "outcome" => "failed")
                    .increment(1);
                tracing::warn!(error = %e, memory = %memory_id, "extraction failed");
                let _ = self.store.set_extraction_state(
                    user_id,
                    memory_id,
                    ExtractionStatus::Failed,
                    Some(&e.to_string()),
                    false,
                );
            },
        }
    }

    /// Returns `Ok(false)` when the memory was missing or already done.
    fn process(&self, user_id: &str, memory_id: &MemoryId) -> Result<bool> {
        let Some(memory) = self.store.get_memory(user_id, memory_id)? else {
            tracing::warn!(memory = %memory_id, "extraction target vanished");
            return Ok(false);
        };
        if memory.extraction_status == ExtractionStatus::Done {
            return Ok(false);
        }

        self.store.set_extraction_state(
            user_id,
            memory_id,
            ExtractionStatus::Pending,
            None,
            true,
        )?;

        // Up to three prior memories, oldest first, for pronoun resolution.
        let mut coref: Vec<String> = self
            .store
            .recent_memories(user_id, MAX_COREF_CONTEXT, Some(memory_id))?
            .into_iter()
            .map(|m| m.content)
            .collect();
        coref.reverse();

        let outcome = self
            .extractor
            .extract(&memory.content, &ExtractionOptions { coref_context: coref });

        // Tier-1 batch resolve: one query for every normalized name avoids N
        // sequential round-trips.
        let normalized: Vec<String> = outcome
            .entities
            .iter()
            .map(|e| normalized_name(&e.name))
            .collect();
        let tier1 = self.store.batch_find_by_normalized(user_id, &normalized)?;

        let mut resolved: HashMap<String, EntityId> = HashMap::new();
        for extracted in &outcome.entities {
            let key = normalized_name(&extracted.name);
            let id = if let Some(existing) = tier1.get(&key) {
                self.on_tier1_hit(user_id, existing, extracted);
                existing.id.clone()
            } else {
                match self.resolver.resolve(user_id, extracted) {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!(error = %e, entity = %extracted.name, "resolve failed");
                        continue;
                    },
                }
            };
            self.store.link_mention(memory_id, &id)?;
            resolved.insert(extracted.name.to_lowercase(), id);
        }

        for relationship in &outcome.relationships {
            let source = resolved.get(&relationship.source.to_lowercase());
            let target = resolved.get(&relationship.target.to_lowercase());
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            if source == target {
                continue;
            }
            let now = Utc::now();
            self.store.upsert_relationship(
                user_id,
                &Relationship {
                    source: source.clone(),
                    target: target.clone(),
                    rel_type: relationship.rel_type.clone(),
                    description: relationship.description.clone(),
                    metadata: serde_json::Map::new(),
                    created_at: now,
                    updated_at: now,
                },
            )?;
        }

        self.store.set_extraction_state(
            user_id,
            memory_id,
            ExtractionStatus::Done,
            None,
            false,
        )?;
        Ok(true)
    }

    /// Fan-out for an entity the tier-1 batch already knew: consolidate the
    /// description when new text arrived, and summarize once the entity has
    /// accumulated enough mentions. Both fire-and-forget.
    fn on_tier1_hit(&self, user_id: &str, existing: &Entity, extracted: &ExtractedEntity) {
        if !extracted.description.is_empty() {
            self.fire_description_consolidation(user_id, existing, &extracted.description);
        }

        let mentions = self.store.mention_count(&existing.id).unwrap_or(0);
        if mentions + 1 >= self.summary_threshold {
            self.fire_entity_summary(user_id, &existing.id);
        }
    }

    /// LLM-merges the stored and incoming descriptions into at most two
    /// sentences. The LLM path may shorten; direct upgrades may not.
    fn fire_description_consolidation(&self, user_id: &str, entity: &Entity, incoming: &str) {
        let Some(llm) = self.llm.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let embedder = self.embedder.clone();
        let user_id = user_id.to_string();
        let entity_id = entity.id.clone();
        let name = entity.name.clone();
        let stored = entity.description.clone();
        let incoming = incoming.to_string();

        super::fire_and_forget(move || {
            let user = prompts::build_consolidation_prompt(&name, &stored, &incoming);
            let merged = match llm.complete_with_system(prompts::CONSOLIDATION_SYSTEM_PROMPT, &user)
            {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    tracing::warn!(error = %e, entity = %entity_id, "description consolidation failed");
                    return;
                },
            };
            if merged.is_empty() {
                return;
            }
            write_description(&store, embedder.as_deref(), &user_id, &entity_id, merged);
        });
    }

    /// Regenerates the entity description from the memories mentioning it.
    fn fire_entity_summary(&self, user_id: &str, entity_id: &EntityId) {
        let Some(llm) = self.llm.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let embedder = self.embedder.clone();
        let user_id = user_id.to_string();
        let entity_id = entity_id.clone();

        super::fire_and_forget(move || {
            let Ok(Some(entity)) = store.get_entity(&user_id, &entity_id) else {
                return;
            };
            let excerpts: Vec<String> =
                match store.memories_mentioning(&user_id, &entity_id, SUMMARY_EXCERPTS) {
                    Ok(memories) => memories.into_iter().map(|m| m.content).collect(),
                    Err(e) => {
                        tracing::warn!(error = %e, entity = %entity_id, "summary excerpt fetch failed");
                        return;
                    },
                };
            if excerpts.is_empty() {
                return;
            }

            let user = prompts::build_entity_summary_prompt(&entity.name, &excerpts);
            match llm.complete_with_system(prompts::ENTITY_SUMMARY_SYSTEM_PROMPT, &user) {
                Ok(summary) => {
                    let summary = summary.trim().to_string();
                    if !summary.is_empty() {
                        write_description(&store, embedder.as_deref(), &user_id, &entity_id, summary);
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, entity = %entity_id, "entity summary failed");
                },
            }
        });
    }
}

/// Writes a consolidated description and refreshes its embedding inline
/// (already off the hot path).
fn write_description(
    store: &Arc<dyn GraphStore>,
    embedder: Option<&dyn Embedder>,
    user_id: &str,
    entity_id: &EntityId,
    description: String,
) {
    let update = EntityUpdate {
        description: Some(description),
        ..Default::default()
    };
    if let Err(e) = store.update_entity(user_id, entity_id, update) {
        tracing::warn!(error = %e, entity = %entity_id, "description write failed");
        return;
    }
    let Some(embedder) = embedder else {
        return;
    };
    let Ok(Some(entity)) = store.get_entity(user_id, entity_id) else {
        return;
    };
    let text = format!("{}: {}", entity.name, entity.description);
    if let Ok(embedding) = embedder.embed(&text) {
        let _ = store.set_entity_embedding(user_id, entity_id, &embedding);
    }
}
