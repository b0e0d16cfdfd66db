//! Intent classification for ingested statements.

use crate::llm::{LlmClient, parse_json_response, prompts::INTENT_SYSTEM_PROMPT};
use crate::models::{EntityId, EntityRef, Intent};
use serde::Deserialize;
use std::sync::Arc;

/// Raw JSON shape returned by the classification prompt.
#[derive(Debug, Deserialize)]
struct IntentResponse {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    entity_name: Option<String>,
    #[serde(default)]
    entity_id: Option<String>,
}

/// Maps a raw utterance to an [`Intent`] with a single LLM call.
///
/// Any transport error, parse failure, or incomplete response yields
/// [`Intent::Store`]; ingestion never fails because classification did.
pub struct IntentClassifier {
    llm: Option<Arc<dyn LlmClient>>,
}

impl IntentClassifier {
    /// Creates a classifier backed by the given LLM client.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm: Some(llm) }
    }

    /// Creates a classifier that always answers STORE (degraded mode).
    #[must_use]
    pub const fn without_llm() -> Self {
        Self { llm: None }
    }

    /// Classifies one statement.
    #[must_use]
    pub fn classify(&self, content: &str) -> Intent {
        let intent = self.try_classify(content).unwrap_or(Intent::Store);
        metrics::counter!("memforge_intents_total", "intent" => intent.kind()).increment(1);
        intent
    }

    fn try_classify(&self, content: &str) -> Option<Intent> {
        let llm = self.llm.as_ref()?;
        let response = llm
            .complete_with_system(INTENT_SYSTEM_PROMPT, content)
            .map_err(|e| tracing::warn!(error = %e, "intent classification failed, storing"))
            .ok()?;
        let parsed: IntentResponse = parse_json_response("classify_intent", &response)
            .map_err(|e| tracing::warn!(error = %e, "intent response unparseable, storing"))
            .ok()?;

        let target = parsed.target.filter(|t| !t.trim().is_empty());
        match parsed.intent.to_uppercase().as_str() {
            "INVALIDATE" => Some(Intent::Invalidate { target: target? }),
            "DELETE_ENTITY" => {
                let entity = parsed
                    .entity_id
                    .filter(|id| !id.trim().is_empty())
                    .map(|id| EntityRef::Id(EntityId::new(id)))
                    .or_else(|| {
                        parsed
                            .entity_name
                            .filter(|n| !n.trim().is_empty())
                            .map(EntityRef::Name)
                    })?;
                Some(Intent::DeleteEntity { entity })
            },
            "TOUCH" => Some(Intent::Touch { target: target? }),
            "RESOLVE" => Some(Intent::Resolve { target: target? }),
            _ => Some(Intent::Store),
        }
    }
}
