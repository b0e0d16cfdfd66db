//! Retry wrapper for LLM calls.
//!
//! Policy: one retry on transport-shaped errors (timeout, connect reset),
//! no retry on API errors. The per-call deadline lives in the HTTP client.

use super::{LlmClient, OpenAiCompatClient, is_transport_error};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Wraps an [`LlmClient`] with transport-error retries.
pub struct ResilientLlmClient {
    inner: Arc<dyn LlmClient>,
    max_retries: u32,
    backoff: Duration,
}

impl ResilientLlmClient {
    /// Wraps the given client.
    #[must_use]
    pub fn new(inner: Arc<dyn LlmClient>) -> Self {
        Self {
            inner,
            max_retries: 1,
            backoff: Duration::from_millis(200),
        }
    }

    /// Builds a resilient OpenAI-compatible client from `LLM_*` env.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(Arc::new(OpenAiCompatClient::from_env()))
    }

    /// Builder method to set the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    fn with_retry(&self, call: impl Fn() -> Result<String>) -> Result<String> {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(response) => return Ok(response),
                Err(e) if is_transport_error(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    metrics::counter!("memforge_llm_retries_total").increment(1);
                    tracing::warn!(error = %e, attempt, "LLM transport error, retrying");
                    std::thread::sleep(self.backoff);
                },
                Err(e) => {
                    metrics::counter!("memforge_llm_failures_total").increment(1);
                    return Err(e);
                },
            }
        }
    }
}

impl LlmClient for ResilientLlmClient {
    fn name(&self) -> &'static str {
        "resilient"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.with_retry(|| self.inner.complete(prompt))
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.with_retry(|| self.inner.complete_with_system(system, user))
    }

    fn complete_with_model(&self, model: &str, system: &str, user: &str) -> Result<String> {
        self.with_retry(|| self.inner.complete_with_model(model, system, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        calls: AtomicU32,
        fail_first: u32,
        transport: bool,
    }

    impl LlmClient for FlakyClient {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                let cause = if self.transport {
                    "transport timeout: simulated"
                } else {
                    "status 500: simulated"
                };
                Err(Error::operation("llm_request", cause))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[test]
    fn test_retries_transport_error_once() {
        let client = ResilientLlmClient::new(Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            fail_first: 1,
            transport: true,
        }));
        assert_eq!(client.complete("x").unwrap(), "ok");
    }

    #[test]
    fn test_transport_errors_exhaust() {
        let flaky = Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            fail_first: 5,
            transport: true,
        });
        let client = ResilientLlmClient::new(flaky.clone());
        assert!(client.complete("x").is_err());
        // First attempt plus exactly one retry.
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_api_error_not_retried() {
        let flaky = Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            fail_first: 1,
            transport: false,
        });
        let client = ResilientLlmClient::new(flaky.clone());
        assert!(client.complete("x").is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}
