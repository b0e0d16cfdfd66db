//! Hybrid retrieval: BM25 + vector fusion, post-filters, confidence,
//! entity enrichment, and browse mode.

use crate::config::MemforgeConfig;
use crate::embedding::Embedder;
use crate::models::{
    BrowseResponse, BrowseRow, EntityInfo, EntityRelationSummary, Memory, SearchHit,
    SearchParams, SearchResponse, SearchResultRow,
};
use crate::services::dates::format_semantic_date;
use crate::services::rrf;
use crate::storage::GraphStore;
use crate::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// Entities attached per retrieved memory.
const ENTITIES_PER_MEMORY: usize = 5;

/// Relationship summaries attached per enriched entity.
const RELATIONS_PER_ENTITY: usize = 10;

/// Similarity floor for topping up enrichment via the entity index.
const ENRICHMENT_THRESHOLD: f32 = 0.5;

/// Tag filters retaining less than this share of candidates warn.
const TAG_RETENTION_FLOOR: f32 = 0.30;

/// Result of `search_memory`: search and browse mode have distinct shapes.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Hybrid search over a non-blank query.
    Search(SearchResponse),
    /// Paginated browse over a blank query.
    Browse(BrowseResponse),
}

impl SearchOutcome {
    /// Serializes the outcome for the RPC surface.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Search(response) => {
                serde_json::to_value(response).unwrap_or_else(|_| serde_json::json!({}))
            },
            Self::Browse(response) => {
                serde_json::to_value(response).unwrap_or_else(|_| serde_json::json!({}))
            },
        }
    }
}

/// Read-path service.
pub struct HybridSearcher {
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn Embedder>>,
    config: MemforgeConfig,
}

impl HybridSearcher {
    /// Creates a searcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Option<Arc<dyn Embedder>>,
        config: MemforgeConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Executes `search_memory`.
    ///
    /// A blank query selects browse mode: one paginated query, no hybrid
    /// search, no enrichment, no access logging.
    ///
    /// # Errors
    ///
    /// Returns an error when the graph store fails. A degraded embedder
    /// downgrades to lexical-only retrieval instead of erroring.
    pub fn search(&self, params: SearchParams) -> Result<SearchOutcome> {
        let params = params.clamped();
        if params.is_browse() {
            return self.browse(&params).map(SearchOutcome::Browse);
        }
        self.hybrid(&params).map(SearchOutcome::Search)
    }

    fn browse(&self, params: &SearchParams) -> Result<BrowseResponse> {
        let (total, memories) = self.store.browse_memories(
            &params.user_id,
            params.offset,
            params.limit,
            params.category.as_deref(),
            params.tag.as_deref(),
        )?;

        let now = Utc::now();
        let mut results = Vec::with_capacity(memories.len());
        for memory in memories {
            let categories = self.store.categories_for_memory(&memory.id)?;
            results.push(BrowseRow {
                id: memory.id.to_string(),
                memory: memory.content,
                categories,
                tags: memory.tags,
                created_at: format_semantic_date(memory.created_at, now),
                updated_at: (memory.updated_at != memory.created_at)
                    .then(|| format_semantic_date(memory.updated_at, now)),
            });
        }

        Ok(BrowseResponse {
            total,
            offset: params.offset,
            limit: params.limit,
            results,
        })
    }

    fn hybrid(&self, params: &SearchParams) -> Result<SearchResponse> {
        let query = params.query.as_deref().unwrap_or_default();
        let fetch_limit = Self::fetch_limit(params);

        let lexical = self.store.lexical_search(&params.user_id, query, fetch_limit)?;
        let vector = match &self.embedder {
            Some(embedder) => match embedder.embed(query) {
                Ok(embedding) => {
                    self.store
                        .vector_search_memories(&params.user_id, &embedding, fetch_limit)?
                },
                Err(e) => {
                    // Degraded: lexical-only retrieval.
                    tracing::warn!(error = %e, "query embedding failed, lexical-only search");
                    Vec::new()
                },
            },
            None => Vec::new(),
        };

        let fused = rrf::fuse(&lexical, &vector);
        let mut hits: Vec<SearchHit> = Vec::with_capacity(fused.len());
        for candidate in fused {
            let Some(memory) = self.store.get_memory(&params.user_id, &candidate.id)? else {
                continue;
            };
            if memory.is_invalid() {
                continue;
            }
            let categories = self.store.categories_for_memory(&memory.id)?;
            hits.push(SearchHit {
                memory,
                categories,
                rrf: candidate.rrf,
                lexical_rank: candidate.lexical_rank,
                vector_score: candidate.vector_score,
            });
        }

        // Post-filters in application space. The tag filter's retention is
        // measured against the candidates surviving the other filters.
        let mut tag_filter_warning = None;
        if params.has_post_filter() {
            if let Some(category) = &params.category {
                hits.retain(|h| h.categories.iter().any(|c| c.eq_ignore_ascii_case(category)));
            }
            if let Some(after) = params.created_after {
                hits.retain(|h| h.memory.created_at > after);
            }
            if let Some(tag) = &params.tag {
                let before = hits.len();
                hits.retain(|h| h.memory.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)));
                #[allow(clippy::cast_precision_loss)]
                if before > 0 && (hits.len() as f32) < (before as f32) * TAG_RETENTION_FLOOR {
                    tag_filter_warning = Some(format!(
                        "tag filter '{tag}' retained {} of {before} candidates; \
                         results may be incomplete",
                        hits.len()
                    ));
                }
            }
        }

        let total_matching = hits.len();
        hits.truncate(params.limit);

        let best_rrf = hits.first().map_or(0.0, |h| h.rrf);
        let confident = hits.is_empty()
            || hits.iter().any(|h| h.lexical_rank.is_some())
            || best_rrf >= self.config.confidence_floor;
        let message = if confident {
            format!("Found {total_matching} matching memories.")
        } else {
            metrics::counter!("memforge_searches_total", "confidence" => "low").increment(1);
            "Results may not match the query; search confidence is LOW.".to_string()
        };

        let entities = params
            .include_entities
            .then(|| self.enrich(&params.user_id, &hits));

        self.log_accesses(params, &hits);

        let now = Utc::now();
        let results = hits
            .into_iter()
            .map(|hit| {
                let relevance_score = (hit.rrf / self.config.score_normalizer).min(1.0);
                SearchResultRow {
                    id: hit.memory.id.to_string(),
                    memory: hit.memory.content,
                    relevance_score,
                    categories: hit.categories,
                    tags: hit.memory.tags,
                    created_at: format_semantic_date(hit.memory.created_at, now),
                    updated_at: (hit.memory.updated_at != hit.memory.created_at)
                        .then(|| format_semantic_date(hit.memory.updated_at, now)),
                    app_name: Some(hit.memory.app_name),
                }
            })
            .collect();

        Ok(SearchResponse {
            results,
            confident,
            message,
            total_matching,
            entities,
            tag_filter_warning,
        })
    }

    /// Over-fetch sizing: post-filters discard candidates after fusion, so
    /// the candidate pool scales with the active filter. Tag recall is the
    /// most sensitive; an unfiltered search fetches exactly `limit`.
    fn fetch_limit(params: &SearchParams) -> usize {
        if !params.has_post_filter() {
            return params.limit;
        }
        let mut fetch = params.limit;
        if params.category.is_some() {
            fetch = fetch.max(params.limit * 5);
        }
        if params.tag.is_some() {
            fetch = fetch.max((params.limit * 10).max(200));
        }
        fetch
    }

    /// Builds the entity enrichment block. Mentions are the primary source;
    /// the entity index tops results up when a memory has few mentions.
    /// Failures degrade to partial enrichment.
    fn enrich(&self, user_id: &str, hits: &[SearchHit]) -> Vec<EntityInfo> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut enriched = Vec::new();

        for hit in hits {
            for entity in self.entities_for_hit(user_id, &hit.memory) {
                if !seen.insert(entity.id.to_string()) {
                    continue;
                }
                let memory_count = self.store.mention_count(&entity.id).unwrap_or(0);
                let relationships = self.relation_summaries(user_id, &entity.id);
                enriched.push(EntityInfo {
                    id: entity.id.to_string(),
                    name: entity.name,
                    entity_type: entity.entity_type,
                    description: entity.description,
                    memory_count,
                    relationships,
                });
            }
        }
        enriched
    }

    fn entities_for_hit(&self, user_id: &str, memory: &Memory) -> Vec<crate::models::Entity> {
        let mut entities = self
            .store
            .entities_for_memory(&memory.id)
            .unwrap_or_default();
        entities.truncate(ENTITIES_PER_MEMORY);

        if entities.len() < ENTITIES_PER_MEMORY {
            if let Some(embedding) = &memory.embedding {
                if let Ok(semantic) = self.store.entity_vector_search(
                    user_id,
                    embedding,
                    ENTITIES_PER_MEMORY,
                    ENRICHMENT_THRESHOLD,
                ) {
                    for (entity, _) in semantic {
                        if entities.len() >= ENTITIES_PER_MEMORY {
                            break;
                        }
                        if entities.iter().all(|e| e.id != entity.id) {
                            entities.push(entity);
                        }
                    }
                }
            }
        }
        entities
    }

    fn relation_summaries(
        &self,
        user_id: &str,
        entity_id: &crate::models::EntityId,
    ) -> Vec<EntityRelationSummary> {
        let relationships = self
            .store
            .relationships_for_entity(user_id, entity_id)
            .unwrap_or_default();

        relationships
            .into_iter()
            .take(RELATIONS_PER_ENTITY)
            .filter_map(|relationship| {
                let peer_id = if &relationship.source == entity_id {
                    relationship.target
                } else {
                    relationship.source
                };
                let peer = self.store.get_entity(user_id, &peer_id).ok().flatten()?;
                Some(EntityRelationSummary {
                    rel_type: relationship.rel_type,
                    target: peer.name,
                    description: relationship.description,
                })
            })
            .collect()
    }

    /// Access logging is fire-and-forget: the response never waits on it.
    fn log_accesses(&self, params: &SearchParams, hits: &[SearchHit]) {
        if hits.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        let user_id = params.user_id.clone();
        let app_name = params.app_name.clone();
        let ids: Vec<crate::models::MemoryId> =
            hits.iter().map(|h| h.memory.id.clone()).collect();

        super::fire_and_forget(move || {
            for id in &ids {
                if let Err(e) = store.record_access(&user_id, &app_name, id) {
                    tracing::warn!(error = %e, memory = %id, "access logging failed");
                }
            }
        });
    }
}
