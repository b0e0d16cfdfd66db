//! Generic OpenAI-compatible chat client.
//!
//! Speaks the `/chat/completions` dialect used by `OpenAI`, Ollama,
//! LM Studio, and most gateways, so a single client covers every routing
//! target named by the `LLM_*` environment variables.

use super::LlmClient;
use crate::config::LlmRouting;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible LLM client.
pub struct OpenAiCompatClient {
    routing: LlmRouting,
    client: reqwest::blocking::Client,
}

impl OpenAiCompatClient {
    /// Creates a client from explicit routing configuration.
    ///
    /// The per-call deadline from the routing config is installed as the
    /// HTTP request timeout.
    #[must_use]
    pub fn new(routing: LlmRouting) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(routing.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { routing, client }
    }

    /// Creates a client from `LLM_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(crate::config::MemforgeConfig::from_env().llm)
    }

    fn request(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String> {
        tracing::debug!(model, endpoint = %self.routing.api_base, "LLM request");

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            max_tokens: 1024,
            temperature: 0.0,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.routing.api_base))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.routing.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.json(&request).send().map_err(|e| {
            let kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connect"
            } else {
                "request"
            };
            Error::operation("llm_request", format!("transport {kind}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::operation(
                "llm_request",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .map_err(|e| Error::operation("llm_request", format!("malformed body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::operation("llm_request", "empty completion"))
    }
}

impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.request(
            &self.routing.model,
            vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
        )
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.request(
            &self.routing.model,
            vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
        )
    }

    fn complete_with_model(&self, model: &str, system: &str, user: &str) -> Result<String> {
        self.request(
            model,
            vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
        )
    }
}
