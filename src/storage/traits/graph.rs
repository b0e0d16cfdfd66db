//! Graph store trait: persistent graph, lexical index, and vector search
//! behind one interface.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Notes |
//! |---------|----------|-------|
//! | [`SqliteGraphStore`](crate::storage::SqliteGraphStore) | Default; embedded | FTS5 BM25 lexical index, brute-force cosine KNN |
//! | Bolt-speaking engine | Remote deployments | Interface only; consumes `MEMGRAPH_URL` |
//!
//! # Scoping
//!
//! Every operation takes the owning `user_id` and must constrain reads and
//! writes through that user's scope; the trait admits no cross-user
//! traversal. Internal edge kinds (`HAS_*`, `MENTIONS`, `ACCESSED`,
//! `SUPERSEDES`) are excluded from semantic traversals; `RELATED_TO` is the
//! only edge the traversal methods follow.
//!
//! # Implementor Notes
//!
//! - Methods take `&self` so stores can be shared via `Arc<dyn GraphStore>`;
//!   use interior mutability for connection state.
//! - `merge_entity` must be atomic: two concurrent callers with the same
//!   `(user_id, normalized_name)` converge on one row, and the id returned
//!   is the winner's, not necessarily the caller's.
//! - `upsert_relationship` keeps the longer description and refreshes
//!   `updated_at` on conflict of the `(source, target, rel_type)` triple.

use crate::Result;
use crate::models::{
    Entity, EntityId, ExtractionStatus, Memory, MemoryId, NewMemory, Relationship,
    TraversalResult,
};
use std::collections::HashMap;

/// Input for the resolver's find-or-create MERGE.
#[derive(Debug, Clone)]
pub struct NewEntity {
    /// Display name.
    pub name: String,
    /// Identity key; computed by the caller with
    /// [`normalized_name`](crate::models::normalized_name).
    pub normalized_name: String,
    /// Open-ontology type in `UPPER_SNAKE_CASE`.
    pub entity_type: String,
    /// Initial description.
    pub description: String,
    /// Initial metadata bag.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Partial update applied to an existing entity.
///
/// `None` fields are left untouched. `metadata` replaces the stored bag;
/// callers perform the shallow union before writing.
#[derive(Debug, Clone, Default)]
pub struct EntityUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New (upgraded) type.
    pub entity_type: Option<String>,
    /// New (upgraded or consolidated) description.
    pub description: Option<String>,
    /// Replacement metadata bag.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl EntityUpdate {
    /// Returns true when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.entity_type.is_none()
            && self.description.is_none()
            && self.metadata.is_none()
    }
}

/// Trait for graph store backends.
pub trait GraphStore: Send + Sync {
    // ========================================================================
    // Memory operations
    // ========================================================================

    /// Creates a memory under the user, indexing it for lexical search.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn add_memory(&self, user_id: &str, memory: NewMemory) -> Result<Memory>;

    /// Retrieves a memory by id. Unknown ids yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_memory(&self, user_id: &str, id: &MemoryId) -> Result<Option<Memory>>;

    /// Hard-deletes a memory and its incident bookkeeping edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) for unknown ids.
    fn delete_memory(&self, user_id: &str, id: &MemoryId) -> Result<()>;

    /// Tombstones a memory (`invalid_at = now`); content is retained but
    /// hidden from search and browse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) for unknown ids.
    fn invalidate_memory(&self, user_id: &str, id: &MemoryId) -> Result<()>;

    /// Creates a replacement memory: writes `memory` (with tags union-merged
    /// from the old record), links `new-[:SUPERSEDES]->old`, and tombstones
    /// the old record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) when the old id
    /// does not exist under the user.
    fn supersede_memory(
        &self,
        user_id: &str,
        old_id: &MemoryId,
        memory: NewMemory,
    ) -> Result<Memory>;

    /// Refreshes `updated_at` and union-merges `tags` into the memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) for unknown ids.
    fn touch_memory(&self, user_id: &str, id: &MemoryId, tags: &[String]) -> Result<()>;

    /// Marks a memory resolved: sets `resolved_at` and appends a `resolved`
    /// tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) for unknown ids.
    fn resolve_memory(&self, user_id: &str, id: &MemoryId) -> Result<()>;

    /// Transitions the extraction status, optionally incrementing the
    /// attempt counter and storing a failure message.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_extraction_state(
        &self,
        user_id: &str,
        id: &MemoryId,
        status: ExtractionStatus,
        error: Option<&str>,
        increment_attempts: bool,
    ) -> Result<()>;

    /// Returns the most recent non-invalidated memories, newest first,
    /// excluding `exclude` when given. Used for co-reference context.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn recent_memories(
        &self,
        user_id: &str,
        limit: usize,
        exclude: Option<&MemoryId>,
    ) -> Result<Vec<Memory>>;

    /// BM25-ranked lexical search over memory content, best first.
    /// Tombstoned memories are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn lexical_search(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryId>>;

    /// Cosine-ranked vector search over memory embeddings, best first.
    /// Tombstoned memories are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn vector_search_memories(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(MemoryId, f32)>>;

    /// Single-query pagination over non-invalidated memories, newest first,
    /// with optional case-insensitive category and tag filters. Returns
    /// `(total, page)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn browse_memories(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        category: Option<&str>,
        tag: Option<&str>,
    ) -> Result<(usize, Vec<Memory>)>;

    /// Finds a non-invalidated memory with identical content by hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_memory_by_hash(&self, user_id: &str, content_hash: &str)
    -> Result<Option<MemoryId>>;

    // ========================================================================
    // Category operations
    // ========================================================================

    /// Batch-merges categories per user (case-insensitive name key) and
    /// links them to the memory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn assign_categories(
        &self,
        user_id: &str,
        memory_id: &MemoryId,
        names: &[String],
    ) -> Result<()>;

    /// Returns the display names of categories linked to a memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn categories_for_memory(&self, memory_id: &MemoryId) -> Result<Vec<String>>;

    // ========================================================================
    // Entity operations
    // ========================================================================

    /// Looks up the entity with the given normalized name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn find_entity_by_normalized(
        &self,
        user_id: &str,
        normalized: &str,
    ) -> Result<Option<Entity>>;

    /// Batch lookup by normalized name in a single query, keyed by
    /// normalized name. The tier-1 resolve of the extraction worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn batch_find_by_normalized(
        &self,
        user_id: &str,
        normalized: &[String],
    ) -> Result<HashMap<String, Entity>>;

    /// Lists entities of one type under the user (tier-2 alias candidates).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn entities_by_type(&self, user_id: &str, entity_type: &str) -> Result<Vec<Entity>>;

    /// Cosine KNN over the `entity_vectors` index, constrained to the user,
    /// returning up to `k` candidates scoring at or above `threshold`.
    ///
    /// ANN-backed implementations over-fetch by a factor of ~3 before the
    /// user filter; the embedded engine scopes in the query.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn entity_vector_search(
        &self,
        user_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<(Entity, f32)>>;

    /// Find-or-create on `(user_id, normalized_name)`. Concurrent callers
    /// converge; the returned id (not a caller-generated one) is
    /// authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn merge_entity(&self, user_id: &str, entity: NewEntity) -> Result<EntityId>;

    /// Retrieves an entity by id. Unknown ids yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_entity(&self, user_id: &str, id: &EntityId) -> Result<Option<Entity>>;

    /// Applies a partial update, refreshing `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) for unknown ids.
    fn update_entity(&self, user_id: &str, id: &EntityId, update: EntityUpdate) -> Result<()>;

    /// Writes the description embedding.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_entity_embedding(&self, user_id: &str, id: &EntityId, embedding: &[f32])
    -> Result<()>;

    /// Deletes an entity with cascade over incident relationships and
    /// mentions. Returns `false` when the id was unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_entity(&self, user_id: &str, id: &EntityId) -> Result<bool>;

    /// Number of memories mentioning the entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn mention_count(&self, entity_id: &EntityId) -> Result<usize>;

    /// Non-invalidated memories mentioning the entity, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn memories_mentioning(
        &self,
        user_id: &str,
        entity_id: &EntityId,
        limit: usize,
    ) -> Result<Vec<Memory>>;

    /// Entities mentioned by a memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn entities_for_memory(&self, memory_id: &MemoryId) -> Result<Vec<Entity>>;

    // ========================================================================
    // Relationship and mention operations
    // ========================================================================

    /// Links `(Memory)-[:MENTIONS]->(Entity)`. Idempotent per pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn link_mention(&self, memory_id: &MemoryId, entity_id: &EntityId) -> Result<()>;

    /// Upserts a `RELATED_TO` edge keyed by `(source, target, rel_type)`:
    /// keeps the longer description, shallow-unions metadata, refreshes
    /// `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_relationship(&self, user_id: &str, relationship: &Relationship) -> Result<()>;

    /// Semantic edges incident to an entity (either direction).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn relationships_for_entity(
        &self,
        user_id: &str,
        entity_id: &EntityId,
    ) -> Result<Vec<Relationship>>;

    /// Neighborhood traversal: entities within `hops` of the center plus the
    /// edges used to reach them.
    ///
    /// # Errors
    ///
    /// Returns an error if the traversal fails.
    fn neighborhood(&self, user_id: &str, center: &EntityId, hops: u32)
    -> Result<TraversalResult>;

    /// Ego-graph traversal: the neighborhood plus all edges *between* the
    /// collected neighbors.
    ///
    /// # Errors
    ///
    /// Returns an error if the traversal fails.
    fn subgraph(&self, user_id: &str, center: &EntityId, hops: u32) -> Result<TraversalResult>;

    // ========================================================================
    // Access logging
    // ========================================================================

    /// Upserts `(App)-[:ACCESSED]->(Memory)`, incrementing `access_count`
    /// and setting `last_accessed = now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn record_access(&self, user_id: &str, app_name: &str, memory_id: &MemoryId) -> Result<()>;

    /// Current access count for an `(app, memory)` pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn access_count(&self, user_id: &str, app_name: &str, memory_id: &MemoryId) -> Result<u64>;

    // ========================================================================
    // Configuration document
    // ========================================================================

    /// Loads the stored configuration document, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn load_config(&self) -> Result<Option<serde_json::Value>>;

    /// Stores the configuration document, replacing any prior value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn store_config(&self, value: &serde_json::Value) -> Result<()>;

    // ========================================================================
    // Bulk / stats
    // ========================================================================

    /// Lists entities under the user, most-recently-updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_entities(&self, user_id: &str, limit: usize) -> Result<Vec<Entity>>;

    /// Number of non-invalidated memories under the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn count_memories(&self, user_id: &str) -> Result<usize>;
}
