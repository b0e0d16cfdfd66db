//! Combined entity and relationship extraction with gleaning.
//!
//! One LLM call returns both arrays; additional gleaning passes are
//! conditioned on the names already found and ask only for what was missed.
//! The extractor never fails the write path: every exception collapses to
//! an empty (or partial) result.

use crate::llm::{LlmClient, parse_json_response, prompts};
use crate::models::normalize_type;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Maximum co-reference memories injected into the prompt.
pub const MAX_COREF_CONTEXT: usize = 3;

/// An entity extracted from a statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Display name.
    pub name: String,
    /// Open-ontology type; normalized to `UPPER_SNAKE_CASE`, empty → `OTHER`.
    #[serde(rename = "type", default)]
    pub entity_type: String,
    /// One-sentence description.
    #[serde(default)]
    pub description: String,
    /// Free-form metadata bag.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A relationship extracted from a statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    /// Source entity name.
    #[serde(default)]
    pub source: String,
    /// Target entity name.
    #[serde(default)]
    pub target: String,
    /// Relation label; normalized to `UPPER_SNAKE_CASE`.
    #[serde(rename = "type", default)]
    pub rel_type: String,
    /// Description of the relation.
    #[serde(default)]
    pub description: String,
}

/// Combined result of all extraction passes.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    /// Deduplicated entities across passes.
    pub entities: Vec<ExtractedEntity>,
    /// Deduplicated relationships across passes.
    pub relationships: Vec<ExtractedRelationship>,
}

/// Options for one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    /// Prior memories used only for co-reference resolution, oldest first.
    /// Truncated to [`MAX_COREF_CONTEXT`].
    pub coref_context: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

/// LLM-backed combined extractor.
pub struct CombinedExtractor {
    llm: Option<Arc<dyn LlmClient>>,
    /// Gleaning passes after the first call, clamped to `0..=3`.
    max_gleanings: u8,
}

impl CombinedExtractor {
    /// Creates an extractor backed by the given LLM client.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, max_gleanings: u8) -> Self {
        Self {
            llm: Some(llm),
            max_gleanings: max_gleanings.min(3),
        }
    }

    /// Creates an extractor that always returns empty results.
    #[must_use]
    pub const fn without_llm() -> Self {
        Self {
            llm: None,
            max_gleanings: 0,
        }
    }

    /// Extracts entities and relationships from one statement.
    ///
    /// Never returns an error: a failed first pass yields an empty outcome,
    /// later pass failures keep whatever was collected.
    #[must_use]
    pub fn extract(&self, content: &str, opts: &ExtractionOptions) -> ExtractionOutcome {
        let Some(llm) = &self.llm else {
            return ExtractionOutcome::default();
        };
        if content.trim().is_empty() {
            return ExtractionOutcome::default();
        }

        let coref: Vec<String> = opts
            .coref_context
            .iter()
            .take(MAX_COREF_CONTEXT)
            .cloned()
            .collect();

        let mut outcome = ExtractionOutcome::default();
        let mut seen_entities: HashSet<String> = HashSet::new();
        let mut seen_relationships: HashSet<(String, String, String)> = HashSet::new();

        for pass in 0..=u32::from(self.max_gleanings) {
            let known: Vec<String> = outcome.entities.iter().map(|e| e.name.clone()).collect();
            let prompt = prompts::build_extraction_prompt(content, &known, &coref);

            let raw = match llm
                .complete_with_system(prompts::EXTRACTION_SYSTEM_PROMPT, &prompt)
                .and_then(|r| parse_json_response::<RawExtraction>("extract", &r))
            {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(error = %e, pass, "extraction pass failed");
                    metrics::counter!("memforge_extraction_pass_failures_total").increment(1);
                    continue;
                },
            };

            let mut found_new = false;
            for entity in raw.entities {
                let name = entity.name.trim().to_string();
                if name.is_empty() || !seen_entities.insert(name.to_lowercase()) {
                    continue;
                }
                outcome.entities.push(ExtractedEntity {
                    name,
                    entity_type: normalize_type(&entity.entity_type),
                    description: entity.description.trim().to_string(),
                    metadata: entity.metadata,
                });
                found_new = true;
            }
            for relationship in raw.relationships {
                let source = relationship.source.trim().to_string();
                let target = relationship.target.trim().to_string();
                if source.is_empty() || target.is_empty() || relationship.rel_type.trim().is_empty()
                {
                    continue;
                }
                let rel_type = normalize_type(&relationship.rel_type);
                let key = (source.to_lowercase(), target.to_lowercase(), rel_type.clone());
                if !seen_relationships.insert(key) {
                    continue;
                }
                outcome.relationships.push(ExtractedRelationship {
                    source,
                    target,
                    rel_type,
                    description: relationship.description.trim().to_string(),
                });
                found_new = true;
            }

            // Gleaning stops as soon as a pass turns up nothing new.
            if pass > 0 && !found_new {
                break;
            }
        }

        outcome
    }
}
