//! Environment-driven configuration.
//!
//! Every knob has a documented default; `from_env` never fails, it falls
//! back field by field.

use std::time::Duration;

/// LLM routing configuration.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `LLM_API_BASE` | `http://localhost:11434/v1` | OpenAI-compatible endpoint |
/// | `LLM_API_KEY` | unset | Bearer token |
/// | `LLM_MODEL` | `gpt-4o-mini` | Model for classification/extraction |
/// | `MEMFORGE_CATEGORIZATION_MODEL` | `LLM_MODEL` | Override for auto-categorization |
/// | `LLM_TIMEOUT_MS` | `30000` | Per-call deadline |
#[derive(Debug, Clone)]
pub struct LlmRouting {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// Bearer token, when the endpoint requires one.
    pub api_key: Option<String>,
    /// Default model identifier.
    pub model: String,
    /// Model used for auto-categorization calls.
    pub categorization_model: String,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl Default for LlmRouting {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            categorization_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_millis(30_000),
        }
    }
}

/// Bolt coordinates for a remote graph engine.
///
/// The embedded `SQLite` engine ignores these; a bolt-speaking
/// [`GraphStore`](crate::storage::GraphStore) implementation consumes them.
///
/// | Variable | Default |
/// |----------|---------|
/// | `MEMGRAPH_URL` | unset (embedded engine) |
/// | `MEMGRAPH_USER` | `""` |
/// | `MEMGRAPH_PASSWORD` | `""` |
#[derive(Debug, Clone, Default)]
pub struct BoltConfig {
    /// Bolt URL, e.g. `bolt://localhost:7687`.
    pub url: Option<String>,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
}

/// Top-level configuration.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `MEMFORGE_MAX_GLEANINGS` | `1` | Extra extraction passes, clamped to `0..=3` |
/// | `MEMFORGE_EMBEDDING_DIM` | `1536` | Embedding dimension (cosine metric) |
/// | `MEMFORGE_RESOLVER_THRESHOLD` | `0.88` | Semantic resolver similarity floor |
/// | `MEMFORGE_CONFIDENCE_FLOOR` | `0.012` | RRF score above which a search is confident |
/// | `MEMFORGE_SCORE_NORMALIZER` | `0.032786` | RRF score mapped to relevance 1.0 |
/// | `MEMFORGE_DRAIN_MS` | `3000` | Per-item extraction drain |
/// | `MEMFORGE_DRAIN_BUDGET_MS` | `12000` | Per-batch drain budget |
/// | `MEMFORGE_SUMMARY_THRESHOLD` | `5` | Mentions before an entity summary fires |
#[derive(Debug, Clone)]
pub struct MemforgeConfig {
    /// LLM routing.
    pub llm: LlmRouting,
    /// Remote graph engine coordinates.
    pub bolt: BoltConfig,
    /// Extra extraction passes after the first, clamped to `0..=3`.
    pub max_gleanings: u8,
    /// Embedding dimension.
    pub embedding_dim: usize,
    /// Minimum cosine similarity for the resolver's semantic tier.
    pub resolver_threshold: f32,
    /// Best-RRF floor for the search confidence signal.
    pub confidence_floor: f32,
    /// RRF score that maps to `relevance_score = 1.0`.
    pub score_normalizer: f32,
    /// Bounded await on one item's extraction before the next write.
    pub drain_per_item: Duration,
    /// Combined drain cap across a batch.
    pub drain_budget: Duration,
    /// Mention count at which an entity summary is generated.
    pub summary_threshold: usize,
}

impl Default for MemforgeConfig {
    fn default() -> Self {
        Self {
            llm: LlmRouting::default(),
            bolt: BoltConfig::default(),
            max_gleanings: 1,
            embedding_dim: 1536,
            resolver_threshold: 0.88,
            confidence_floor: 0.012,
            score_normalizer: 0.032_786,
            drain_per_item: Duration::from_millis(3_000),
            drain_budget: Duration::from_millis(12_000),
            summary_threshold: 5,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl MemforgeConfig {
    /// Builds a configuration from environment variables, falling back to
    /// defaults field by field.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let model = env_var("LLM_MODEL").unwrap_or(defaults.llm.model);
        let llm = LlmRouting {
            api_base: env_var("LLM_API_BASE").unwrap_or(defaults.llm.api_base),
            api_key: env_var("LLM_API_KEY"),
            categorization_model: env_var("MEMFORGE_CATEGORIZATION_MODEL")
                .unwrap_or_else(|| model.clone()),
            model,
            timeout: Duration::from_millis(env_parse("LLM_TIMEOUT_MS", 30_000)),
        };

        let bolt = BoltConfig {
            url: env_var("MEMGRAPH_URL"),
            user: env_var("MEMGRAPH_USER").unwrap_or_default(),
            password: env_var("MEMGRAPH_PASSWORD").unwrap_or_default(),
        };

        Self {
            llm,
            bolt,
            max_gleanings: env_parse("MEMFORGE_MAX_GLEANINGS", defaults.max_gleanings).min(3),
            embedding_dim: env_parse("MEMFORGE_EMBEDDING_DIM", defaults.embedding_dim),
            resolver_threshold: env_parse(
                "MEMFORGE_RESOLVER_THRESHOLD",
                defaults.resolver_threshold,
            ),
            confidence_floor: env_parse("MEMFORGE_CONFIDENCE_FLOOR", defaults.confidence_floor),
            score_normalizer: env_parse("MEMFORGE_SCORE_NORMALIZER", defaults.score_normalizer),
            drain_per_item: Duration::from_millis(env_parse("MEMFORGE_DRAIN_MS", 3_000)),
            drain_budget: Duration::from_millis(env_parse("MEMFORGE_DRAIN_BUDGET_MS", 12_000)),
            summary_threshold: env_parse("MEMFORGE_SUMMARY_THRESHOLD", defaults.summary_threshold),
        }
    }

    /// Builder method to set the gleaning pass count (clamped to `0..=3`).
    #[must_use]
    pub const fn with_max_gleanings(mut self, passes: u8) -> Self {
        self.max_gleanings = if passes > 3 { 3 } else { passes };
        self
    }

    /// Builder method to set the drain budgets.
    #[must_use]
    pub const fn with_drains(mut self, per_item: Duration, budget: Duration) -> Self {
        self.drain_per_item = per_item;
        self.drain_budget = budget;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemforgeConfig::default();
        assert_eq!(config.max_gleanings, 1);
        assert_eq!(config.embedding_dim, 1536);
        assert_eq!(config.drain_per_item, Duration::from_millis(3_000));
        assert_eq!(config.drain_budget, Duration::from_millis(12_000));
        assert!((config.score_normalizer - 0.032_786).abs() < f32::EPSILON);
    }

    #[test]
    fn test_gleanings_clamped() {
        assert_eq!(MemforgeConfig::default().with_max_gleanings(7).max_gleanings, 3);
        assert_eq!(MemforgeConfig::default().with_max_gleanings(0).max_gleanings, 0);
    }
}
