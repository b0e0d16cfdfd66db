//! LLM client abstraction.
//!
//! The memory core treats language models as an opaque capability behind
//! [`LlmClient`]. One concrete client ships here: a generic
//! OpenAI-compatible HTTP client ([`OpenAiCompatClient`]) routed via `LLM_*`
//! environment variables. Degraded operation is a first-class state: every
//! caller of this module fails open when completions error.
//!
//! # Usage
//!
//! ```rust,ignore
//! use memforge::llm::{LlmClient, OpenAiCompatClient, ResilientLlmClient};
//!
//! let client = ResilientLlmClient::from_env();
//! let response = client.complete_with_system(
//!     "You classify statements.",
//!     "Alice prefers TypeScript",
//! )?;
//! ```

mod openai;
pub mod prompts;
mod resilience;

pub use openai::OpenAiCompatClient;
pub use resilience::ResilientLlmClient;

use crate::{Error, Result};

/// Trait for LLM clients.
///
/// Implementations must be shareable across threads; one client instance is
/// configured per process.
pub trait LlmClient: Send + Sync {
    /// The client name, for logging.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a system prompt.
    ///
    /// Default implementation concatenates system and user prompts;
    /// providers with native system-prompt support should override.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let combined = format!("{system}\n\n---\n\nUser message:\n{user}");
        self.complete(&combined)
    }

    /// Generates a completion with an explicit model override.
    ///
    /// Used by auto-categorization, which may route to a cheaper model.
    /// Default implementation ignores the override.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete_with_model(&self, _model: &str, system: &str, user: &str) -> Result<String> {
        self.complete_with_system(system, user)
    }
}

/// Returns true for transport-shaped errors eligible for a retry.
#[must_use]
pub fn is_transport_error(error: &Error) -> bool {
    matches!(error, Error::OperationFailed { cause, .. } if cause.starts_with("transport"))
}

/// Extracts a JSON payload from an LLM response that may be wrapped in a
/// markdown fence or surrounded by prose.
#[must_use]
pub fn extract_json_payload(response: &str) -> String {
    let trimmed = response.trim();

    if let Some(json) = json_from_markdown(trimmed) {
        return json;
    }
    if let Some(json) = raw_json_span(trimmed) {
        return json;
    }
    trimmed.to_string()
}

/// Extracts JSON from a ` ```json ` fenced block.
fn json_from_markdown(text: &str) -> Option<String> {
    let start = text.find("```json")?;
    let body_start = start + "```json".len();
    let end = text[body_start..].find("```")?;
    let payload = text[body_start..body_start + end].trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}

/// Extracts the outermost `{...}` or `[...]` span.
fn raw_json_span(text: &str) -> Option<String> {
    let obj = text.find('{').map(|s| (s, text.rfind('}')));
    let arr = text.find('[').map(|s| (s, text.rfind(']')));

    let (start, end) = match (obj, arr) {
        (Some((os, Some(oe))), Some((as_, Some(ae)))) => {
            if os < as_ { (os, oe) } else { (as_, ae) }
        },
        (Some((os, Some(oe))), _) => (os, oe),
        (_, Some((as_, Some(ae)))) => (as_, ae),
        _ => return None,
    };

    if start < end {
        Some(text[start..=end].to_string())
    } else {
        None
    }
}

/// Parses a typed JSON value out of an LLM response.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] when no parseable JSON is found.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(
    operation: &str,
    response: &str,
) -> Result<T> {
    let payload = extract_json_payload(response);
    serde_json::from_str(&payload).map_err(|e| {
        tracing::warn!(error = %e, operation, "Failed to parse LLM JSON response");
        Error::operation(operation, format!("invalid JSON response: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        same: bool,
    }

    #[test]
    fn test_extract_from_markdown_fence() {
        let response = "Here you go:\n```json\n{\"same\": true}\n```\nDone.";
        let sample: Sample = parse_json_response("test", response).unwrap();
        assert!(sample.same);
    }

    #[test]
    fn test_extract_raw_object() {
        let response = "The answer is {\"same\": false} as requested.";
        let sample: Sample = parse_json_response("test", response).unwrap();
        assert!(!sample.same);
    }

    #[test]
    fn test_extract_array_before_object() {
        let payload = extract_json_payload("[1, 2] trailing {\"x\": 1}");
        assert!(payload.starts_with('['));
    }

    #[test]
    fn test_unparseable_is_error() {
        let result: Result<Sample> = parse_json_response("test", "no json here");
        assert!(result.is_err());
    }

    #[test]
    fn test_transport_error_detection() {
        let transport = Error::operation("llm_request", "transport timeout: deadline exceeded");
        let api = Error::operation("llm_request", "status 400");
        assert!(is_transport_error(&transport));
        assert!(!is_transport_error(&api));
    }
}
