//! Three-tier entity resolution.
//!
//! `resolve` returns the single canonical entity id for an extracted record
//! under one user, creating the entity when nothing matches:
//!
//! 1. **Normalized exact**: identity key lookup.
//! 2. **Person alias**: word-boundary prefix/suffix match, `PERSON` only.
//! 3. **Semantic**: entity-vector KNN plus an LLM same-entity confirmation.
//!
//! A miss MERGEs on `(user_id, normalized_name)`; the id the store returns
//! is authoritative, so concurrent resolvers converge.

use crate::embedding::Embedder;
use crate::llm::{LlmClient, parse_json_response, prompts};
use crate::models::{Entity, EntityId, normalized_name, type_rank};
use crate::services::extraction::ExtractedEntity;
use crate::storage::{EntityUpdate, GraphStore, NewEntity};
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;

/// Candidates examined by the semantic tier.
const SEMANTIC_CANDIDATES: usize = 5;

#[derive(Debug, Deserialize)]
struct SameEntityResponse {
    #[serde(default)]
    same: bool,
}

/// Returns true when one name extends the other at a word boundary,
/// e.g. `"alice"` ↔ `"alice chen"`.
fn alias_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return true;
    }
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    longer.starts_with(&format!("{shorter} ")) || longer.ends_with(&format!(" {shorter}"))
}

/// Three-tier find-or-create resolver.
pub struct EntityResolver {
    store: Arc<dyn GraphStore>,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn Embedder>>,
    /// Similarity floor for the semantic tier.
    threshold: f32,
}

impl EntityResolver {
    /// Creates a resolver with all three tiers.
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Option<Arc<dyn LlmClient>>,
        embedder: Option<Arc<dyn Embedder>>,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            threshold,
        }
    }

    /// Resolves an extracted record to the canonical entity id.
    ///
    /// # Errors
    ///
    /// Returns an error when the graph store fails. Embedding and LLM
    /// failures in the semantic tier fail open to a miss instead.
    pub fn resolve(&self, user_id: &str, extracted: &ExtractedEntity) -> Result<EntityId> {
        let normalized = normalized_name(&extracted.name);

        // Tier 1: normalized exact.
        if let Some(entity) = self.store.find_entity_by_normalized(user_id, &normalized)? {
            metrics::counter!("memforge_resolver_hits_total", "tier" => "normalized").increment(1);
            let id = entity.id.clone();
            self.apply_upgrades(user_id, entity, extracted)?;
            return Ok(id);
        }

        // Tier 2: person alias. Applies to PERSON entities only.
        if extracted.entity_type == "PERSON" {
            if let Some(entity) = self.alias_candidate(user_id, &extracted.name)? {
                metrics::counter!("memforge_resolver_hits_total", "tier" => "alias").increment(1);
                let id = entity.id.clone();
                if extracted.name.len() > entity.name.len() {
                    self.store.update_entity(
                        user_id,
                        &id,
                        EntityUpdate {
                            name: Some(extracted.name.clone()),
                            ..Default::default()
                        },
                    )?;
                }
                let entity = self.store.get_entity(user_id, &id)?.unwrap_or(entity);
                self.apply_upgrades(user_id, entity, extracted)?;
                return Ok(id);
            }
        }

        // Tier 3: semantic match confirmed by the LLM.
        if let Some(entity) = self.semantic_candidate(user_id, extracted) {
            metrics::counter!("memforge_resolver_hits_total", "tier" => "semantic").increment(1);
            let id = entity.id.clone();
            self.apply_upgrades(user_id, entity, extracted)?;
            return Ok(id);
        }

        // Miss: MERGE on (user_id, normalized_name). The returned id is the
        // winner's, which under contention may not be the row we authored.
        metrics::counter!("memforge_resolver_hits_total", "tier" => "create").increment(1);
        let id = self.store.merge_entity(
            user_id,
            NewEntity {
                name: extracted.name.clone(),
                normalized_name: normalized,
                entity_type: extracted.entity_type.clone(),
                description: extracted.description.clone(),
                metadata: extracted.metadata.clone(),
            },
        )?;
        if let Some(entity) = self.store.get_entity(user_id, &id)? {
            self.apply_upgrades(user_id, entity, extracted)?;
        }
        self.refresh_description_embedding(user_id, &id);
        Ok(id)
    }

    /// Tier-2 lookup: best PERSON whose display name extends (or is extended
    /// by) the extracted name at a word boundary, preferring the candidate
    /// with the longer display name.
    fn alias_candidate(&self, user_id: &str, name: &str) -> Result<Option<Entity>> {
        let people = self.store.entities_by_type(user_id, "PERSON")?;
        Ok(people
            .into_iter()
            .filter(|e| alias_match(&e.name, name))
            .max_by_key(|e| e.name.len()))
    }

    /// Tier-3 lookup. Fails open to `None` on embed or LLM errors.
    fn semantic_candidate(&self, user_id: &str, extracted: &ExtractedEntity) -> Option<Entity> {
        let embedder = self.embedder.as_ref()?;
        let llm = self.llm.as_ref()?;

        let text = format!("{}: {}", extracted.name, extracted.description);
        let embedding = embedder
            .embed(&text)
            .map_err(|e| tracing::warn!(error = %e, "resolver embed failed, treating as miss"))
            .ok()?;
        let candidates = self
            .store
            .entity_vector_search(user_id, &embedding, SEMANTIC_CANDIDATES, self.threshold)
            .map_err(|e| tracing::warn!(error = %e, "entity vector search failed"))
            .ok()?;
        let (best, score) = candidates.into_iter().next()?;

        let user = prompts::build_same_entity_prompt(
            &best.name,
            &best.entity_type,
            &best.description,
            &extracted.name,
            &extracted.entity_type,
            &extracted.description,
        );
        let response = llm
            .complete_with_system(prompts::SAME_ENTITY_SYSTEM_PROMPT, &user)
            .map_err(|e| tracing::warn!(error = %e, "same-entity confirmation failed"))
            .ok()?;
        let confirmed: SameEntityResponse =
            parse_json_response("confirm_same_entity", &response).ok()?;

        // Merge only on an explicit yes.
        if confirmed.same {
            tracing::debug!(entity = %best.id, score, "semantic resolver match confirmed");
            Some(best)
        } else {
            None
        }
    }

    /// Applies the monotone upgrade rules to a matched entity.
    ///
    /// - Type: lower rank wins, never downgraded.
    /// - Description: replaced only by a strictly longer one.
    /// - Metadata: shallow union, newer keys overwrite.
    fn apply_upgrades(
        &self,
        user_id: &str,
        entity: Entity,
        extracted: &ExtractedEntity,
    ) -> Result<()> {
        let mut update = EntityUpdate::default();

        if type_rank(&extracted.entity_type) < type_rank(&entity.entity_type) {
            update.entity_type = Some(extracted.entity_type.clone());
        }
        if extracted.description.len() > entity.description.len() {
            update.description = Some(extracted.description.clone());
        }
        if !extracted.metadata.is_empty() {
            let mut merged = entity.metadata.clone();
            for (key, value) in &extracted.metadata {
                merged.insert(key.clone(), value.clone());
            }
            if merged != entity.metadata {
                update.metadata = Some(merged);
            }
        }

        if update.is_empty() {
            return Ok(());
        }
        let refresh_embedding = update.description.is_some();
        self.store.update_entity(user_id, &entity.id, update)?;
        if refresh_embedding {
            self.refresh_description_embedding(user_id, &entity.id);
        }
        Ok(())
    }

    /// Recomputes the description embedding off the hot path. Failure is
    /// logged, never fatal.
    fn refresh_description_embedding(&self, user_id: &str, id: &EntityId) {
        let Some(embedder) = self.embedder.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        let id = id.clone();

        super::fire_and_forget(move || {
            let Ok(Some(entity)) = store.get_entity(&user_id, &id) else {
                return;
            };
            let text = format!("{}: {}", entity.name, entity.description);
            match embedder.embed(&text) {
                Ok(embedding) => {
                    if let Err(e) = store.set_entity_embedding(&user_id, &id, &embedding) {
                        tracing::warn!(error = %e, entity = %id, "failed to store entity embedding");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, entity = %id, "entity embedding failed");
                },
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::storage::SqliteGraphStore;

    fn extracted(name: &str, entity_type: &str, description: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            description: description.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    fn resolver(store: &Arc<dyn GraphStore>) -> EntityResolver {
        EntityResolver::new(Arc::clone(store), None, None, 0.88)
    }

    fn store() -> Arc<dyn GraphStore> {
        Arc::new(SqliteGraphStore::in_memory().unwrap())
    }

    #[test]
    fn test_alias_match_word_boundary() {
        assert!(alias_match("alice", "Alice Chen"));
        assert!(alias_match("Alice Chen", "alice"));
        assert!(alias_match("chen", "Alice Chen"));
        assert!(!alias_match("ali", "Alice Chen"));
        assert!(!alias_match("bob", "Alice Chen"));
    }

    #[test]
    fn test_resolve_idempotent() {
        let store = store();
        let resolver = resolver(&store);
        let record = extracted("Alice Chen", "PERSON", "An engineer");

        let first = resolver.resolve("u1", &record).unwrap();
        let second = resolver.resolve("u1", &record).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_entities("u1", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_tier2_alias_keeps_longer_display_name() {
        let store = store();
        let resolver = resolver(&store);

        let full = resolver
            .resolve("u1", &extracted("Alice Chen", "PERSON", "An engineer"))
            .unwrap();
        let short = resolver
            .resolve("u1", &extracted("Alice", "PERSON", ""))
            .unwrap();

        assert_eq!(full, short);
        let entity = store.get_entity("u1", &full).unwrap().unwrap();
        assert_eq!(entity.name, "Alice Chen");
    }

    #[test]
    fn test_tier2_upgrades_shorter_display_name() {
        let store = store();
        let resolver = resolver(&store);

        let short = resolver.resolve("u1", &extracted("Alice", "PERSON", "")).unwrap();
        let full = resolver
            .resolve("u1", &extracted("Alice Chen", "PERSON", ""))
            .unwrap();

        assert_eq!(short, full);
        let entity = store.get_entity("u1", &short).unwrap().unwrap();
        assert_eq!(entity.name, "Alice Chen");
    }

    #[test]
    fn test_tier2_only_applies_to_person() {
        let store = store();
        let resolver = resolver(&store);

        let org = resolver
            .resolve("u1", &extracted("Acme Corp", "ORGANIZATION", ""))
            .unwrap();
        let other = resolver
            .resolve("u1", &extracted("Acme", "ORGANIZATION", ""))
            .unwrap();
        assert_ne!(org, other);
    }

    #[test]
    fn test_type_upgrade_monotone() {
        let store = store();
        let resolver = resolver(&store);

        let id = resolver.resolve("u1", &extracted("Mercury", "CONCEPT", "")).unwrap();
        resolver.resolve("u1", &extracted("Mercury", "PRODUCT", "")).unwrap();
        assert_eq!(store.get_entity("u1", &id).unwrap().unwrap().entity_type, "PRODUCT");

        // A downgrade attempt leaves the better rank in place.
        resolver.resolve("u1", &extracted("Mercury", "OTHER", "")).unwrap();
        assert_eq!(store.get_entity("u1", &id).unwrap().unwrap().entity_type, "PRODUCT");
    }

    #[test]
    fn test_description_upgrade_requires_strictly_longer() {
        let store = store();
        let resolver = resolver(&store);

        let id = resolver
            .resolve("u1", &extracted("Rust", "PROGRAMMING_LANGUAGE", "A language"))
            .unwrap();
        resolver
            .resolve("u1", &extracted("Rust", "PROGRAMMING_LANGUAGE", "Short"))
            .unwrap();
        assert_eq!(store.get_entity("u1", &id).unwrap().unwrap().description, "A language");

        resolver
            .resolve(
                "u1",
                &extracted("Rust", "PROGRAMMING_LANGUAGE", "A systems programming language"),
            )
            .unwrap();
        assert_eq!(
            store.get_entity("u1", &id).unwrap().unwrap().description,
            "A systems programming language"
        );
    }

    #[test]
    fn test_metadata_shallow_union() {
        let store = store();
        let resolver = resolver(&store);

        let mut first = extracted("Alice", "PERSON", "");
        first.metadata.insert("team".to_string(), serde_json::json!("platform"));
        let id = resolver.resolve("u1", &first).unwrap();

        let mut second = extracted("Alice", "PERSON", "");
        second.metadata.insert("team".to_string(), serde_json::json!("infra"));
        second.metadata.insert("city".to_string(), serde_json::json!("Berlin"));
        resolver.resolve("u1", &second).unwrap();

        let entity = store.get_entity("u1", &id).unwrap().unwrap();
        assert_eq!(entity.metadata.get("team"), Some(&serde_json::json!("infra")));
        assert_eq!(entity.metadata.get("city"), Some(&serde_json::json!("Berlin")));
    }

    #[test]
    fn test_semantic_tier_confirms_via_llm() {
        struct YesLlm;
        impl LlmClient for YesLlm {
            fn name(&self) -> &'static str {
                "yes"
            }
            fn complete(&self, _prompt: &str) -> crate::Result<String> {
                Ok(r#"{"same": true}"#.to_string())
            }
        }

        let store = store();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));
        let resolver = EntityResolver::new(
            Arc::clone(&store),
            Some(Arc::new(YesLlm)),
            Some(Arc::clone(&embedder)),
            0.5,
        );

        // Seed an entity whose embedding matches the incoming description.
        let id = resolver
            .resolve("u1", &extracted("PostgreSQL", "PRODUCT", "relational database engine"))
            .unwrap();
        let seeded = store.get_entity("u1", &id).unwrap().unwrap();
        let embedding = embedder
            .embed(&format!("{}: {}", seeded.name, seeded.description))
            .unwrap();
        store.set_entity_embedding("u1", &id, &embedding).unwrap();

        // Different surface name, same meaning: tiers 1 and 2 miss, tier 3
        // confirms.
        let resolved = resolver
            .resolve("u1", &extracted("Postgres!", "PRODUCT", "relational database engine"))
            .unwrap();
        assert_eq!(resolved, id);
    }

    #[test]
    fn test_semantic_tier_rejection_creates_new() {
        struct NoLlm;
        impl LlmClient for NoLlm {
            fn name(&self) -> &'static str {
                "no"
            }
            fn complete(&self, _prompt: &str) -> crate::Result<String> {
                Ok(r#"{"same": false}"#.to_string())
            }
        }

        let store = store();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));
        let resolver = EntityResolver::new(
            Arc::clone(&store),
            Some(Arc::new(NoLlm)),
            Some(embedder),
            0.1,
        );

        let first = resolver
            .resolve("u1", &extracted("Mercury", "PRODUCT", "planning tool"))
            .unwrap();
        let second = resolver
            .resolve("u1", &extracted("Hermes", "PRODUCT", "planning tool"))
            .unwrap();
        assert_ne!(first, second);
    }
}
