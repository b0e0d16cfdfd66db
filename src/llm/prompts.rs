//! Prompt library for the memory core's LLM calls.
//!
//! Each prompt pins an exact JSON output contract; callers parse with
//! [`parse_json_response`](super::parse_json_response) and fail open on
//! mismatch.

/// System prompt for intent classification.
pub const INTENT_SYSTEM_PROMPT: &str = r#"You classify a single user statement addressed to a long-term memory system.

Respond with exactly one JSON object and nothing else:
{"intent": "STORE" | "INVALIDATE" | "DELETE_ENTITY" | "TOUCH" | "RESOLVE",
 "target": "<what the statement refers to, for INVALIDATE/TOUCH/RESOLVE>",
 "entity_name": "<entity display name, for DELETE_ENTITY>",
 "entity_id": "<entity id if the statement carries one, for DELETE_ENTITY>"}

Guidance:
- STORE: the statement asserts a fact, preference, or event worth remembering.
- INVALIDATE: the statement asks to forget or retract prior knowledge.
- DELETE_ENTITY: the statement asks to remove everything known about a named thing.
- TOUCH: the statement says a prior memory is still current, without new content.
- RESOLVE: the statement says a tracked issue or task is finished.
When unsure, answer STORE."#;

/// System prompt for combined entity and relationship extraction.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract a knowledge graph from one user statement.

Respond with exactly one JSON object and nothing else:
{"entities": [{"name": "...", "type": "...", "description": "...", "metadata": {}}],
 "relationships": [{"source": "...", "target": "...", "type": "...", "description": "..."}]}

Rules:
- Entity "type" is a single UPPER_SNAKE_CASE word or phrase from an open
  ontology (PERSON, ORGANIZATION, LOCATION, PRODUCT, PROGRAMMING_LANGUAGE,
  CONCEPT, ...). Use OTHER only as a last resort.
- "description" is one factual sentence grounded in the statement.
- Relationship "source" and "target" are entity names from this response or
  previously known names; "type" is UPPER_SNAKE_CASE (WORKS_AT, PREFERS,
  USES, LOCATED_IN, ...).
- Extract only what the statement states. Never invent facts."#;

/// System prompt for the resolver's same-entity confirmation.
pub const SAME_ENTITY_SYSTEM_PROMPT: &str = r#"You decide whether two records describe the same real-world entity.

Respond with exactly one JSON object and nothing else:
{"same": true | false}

Answer true only when you are confident both records refer to one entity."#;

/// System prompt for the dedup supersede judgment.
pub const SUPERSEDE_SYSTEM_PROMPT: &str = r#"You compare a stored memory with a new statement about the same subject.

Respond with exactly one JSON object and nothing else:
{"updates": true | false}

Answer true when the new statement updates, corrects, or replaces the stored
memory (changed preference, new value, reversed decision). Answer false when
it merely restates it or describes something unrelated."#;

/// System prompt for description consolidation.
pub const CONSOLIDATION_SYSTEM_PROMPT: &str = "You merge two descriptions of one entity into a single description of at \
most two sentences. Keep every distinct fact, drop repetition, prefer the \
newer phrasing on conflict. Respond with the merged description only.";

/// System prompt for entity summaries.
pub const ENTITY_SUMMARY_SYSTEM_PROMPT: &str = "You summarize what is known about one entity from memory excerpts that \
mention it. Respond with at most two sentences of plain text capturing the \
most durable facts.";

/// System prompt for auto-categorization.
pub const CATEGORIZATION_SYSTEM_PROMPT: &str = r#"You assign 1 to 3 short category names to a memory statement.

Respond with exactly one JSON array of lowercase category name strings and
nothing else, e.g. ["preferences", "work"]."#;

/// Builds the user prompt for an extraction pass.
///
/// `known_entities` turns the pass into a gleaning pass: the model is asked
/// only for items missed previously. `coref_context` carries up to three
/// prior memories used solely to resolve pronouns.
#[must_use]
pub fn build_extraction_prompt(
    content: &str,
    known_entities: &[String],
    coref_context: &[String],
) -> String {
    let mut prompt = String::new();

    if !coref_context.is_empty() {
        prompt.push_str(
            "Previous memories, for pronoun and reference resolution only; \
             do not extract entities or relationships from these:\n",
        );
        for memory in coref_context {
            prompt.push_str("- ");
            prompt.push_str(memory);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    if known_entities.is_empty() {
        prompt.push_str("Extract entities and relationships from this statement:\n\n");
    } else {
        prompt.push_str("The following entities were already extracted: ");
        prompt.push_str(&known_entities.join(", "));
        prompt.push_str(
            ".\nExtract only entities and relationships MISSED so far from this statement. \
             Return empty arrays if nothing was missed.\n\n",
        );
    }

    prompt.push_str(content);
    prompt
}

/// Builds the user prompt for the same-entity confirmation.
#[must_use]
pub fn build_same_entity_prompt(
    stored_name: &str,
    stored_type: &str,
    stored_description: &str,
    extracted_name: &str,
    extracted_type: &str,
    extracted_description: &str,
) -> String {
    format!(
        "Record A (stored):\n  name: {stored_name}\n  type: {stored_type}\n  description: {stored_description}\n\n\
         Record B (extracted):\n  name: {extracted_name}\n  type: {extracted_type}\n  description: {extracted_description}"
    )
}

/// Builds the user prompt for the supersede judgment.
#[must_use]
pub fn build_supersede_prompt(stored_content: &str, new_content: &str) -> String {
    format!("Stored memory:\n{stored_content}\n\nNew statement:\n{new_content}")
}

/// Builds the user prompt for description consolidation.
#[must_use]
pub fn build_consolidation_prompt(entity_name: &str, stored: &str, incoming: &str) -> String {
    format!(
        "Entity: {entity_name}\n\nStored description:\n{stored}\n\nNew description:\n{incoming}"
    )
}

/// Builds the user prompt for an entity summary.
#[must_use]
pub fn build_entity_summary_prompt(entity_name: &str, excerpts: &[String]) -> String {
    let mut prompt = format!("Entity: {entity_name}\n\nMemory excerpts:\n");
    for excerpt in excerpts {
        prompt.push_str("- ");
        prompt.push_str(excerpt);
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gleaning_prompt_names_known_entities() {
        let prompt =
            build_extraction_prompt("Alice uses Rust", &["Alice".to_string()], &[]);
        assert!(prompt.contains("already extracted: Alice"));
        assert!(prompt.contains("MISSED"));
    }

    #[test]
    fn test_coref_block_is_guarded() {
        let prompt = build_extraction_prompt(
            "She moved to Berlin",
            &[],
            &["Alice works at Acme".to_string()],
        );
        assert!(prompt.contains("do not extract"));
        assert!(prompt.contains("Alice works at Acme"));
    }

    #[test]
    fn test_first_pass_has_no_gleaning_clause() {
        let prompt = build_extraction_prompt("Alice uses Rust", &[], &[]);
        assert!(!prompt.contains("MISSED"));
    }
}
