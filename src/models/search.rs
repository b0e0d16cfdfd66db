//! Search and browse request/response types.

use crate::models::Memory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on `limit` for both search and browse.
pub const MAX_LIMIT: usize = 200;

/// Parameters for `search_memory`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    /// Owning user scope.
    pub user_id: String,
    /// Query text. Empty or whitespace-only selects browse mode.
    #[serde(default)]
    pub query: Option<String>,
    /// Maximum rows to return, clamped to `[1, 200]`.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Pagination offset (browse mode).
    #[serde(default)]
    pub offset: usize,
    /// Case-insensitive category filter.
    #[serde(default)]
    pub category: Option<String>,
    /// Case-insensitive tag filter.
    #[serde(default)]
    pub tag: Option<String>,
    /// Only memories created strictly after this instant.
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    /// Attach entity enrichment to search responses.
    #[serde(default = "default_true")]
    pub include_entities: bool,
    /// Accessing client, recorded in access logging.
    #[serde(default = "default_app")]
    pub app_name: String,
}

const fn default_limit() -> usize {
    50
}

const fn default_true() -> bool {
    true
}

fn default_app() -> String {
    "default".to_string()
}

impl SearchParams {
    /// Returns a copy with `limit` clamped to `[1, 200]`.
    ///
    /// `limit=0` clamps up to 1 rather than being rejected.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_LIMIT);
        self
    }

    /// Returns true when the query selects browse mode.
    #[must_use]
    pub fn is_browse(&self) -> bool {
        self.query
            .as_deref()
            .is_none_or(|q| q.trim().is_empty())
    }

    /// Returns true when any post-filter is active.
    #[must_use]
    pub const fn has_post_filter(&self) -> bool {
        self.category.is_some() || self.tag.is_some() || self.created_after.is_some()
    }
}

/// A fused search candidate prior to post-filtering and formatting.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The candidate memory.
    pub memory: Memory,
    /// Categories linked to the memory.
    pub categories: Vec<String>,
    /// Reciprocal-rank-fusion score.
    pub rrf: f32,
    /// 1-indexed rank in the lexical list, when present.
    pub lexical_rank: Option<usize>,
    /// Cosine score from the vector list, when present.
    pub vector_score: Option<f32>,
}

/// One formatted row of a search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultRow {
    /// Memory id.
    pub id: String,
    /// Memory content.
    pub memory: String,
    /// Normalized RRF score, clamped to `[0, 1]`.
    pub relevance_score: f32,
    /// Linked categories.
    pub categories: Vec<String>,
    /// Memory tags.
    pub tags: Vec<String>,
    /// Semantic date, e.g. `"2026-08-01 (today)"`.
    pub created_at: String,
    /// Semantic date; omitted when identical to `created_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Source client identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

/// Summary of one relationship attached to an enriched entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRelationSummary {
    /// Relation label.
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Display name of the peer entity.
    pub target: String,
    /// Relation description.
    pub description: String,
}

/// Entity enrichment attached to search responses.
#[derive(Debug, Clone, Serialize)]
pub struct EntityInfo {
    /// Entity id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Open-ontology type.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Consolidated description.
    pub description: String,
    /// Number of memories mentioning the entity.
    #[serde(rename = "memoryCount")]
    pub memory_count: usize,
    /// Incident semantic relationships.
    pub relationships: Vec<EntityRelationSummary>,
}

/// Response for search mode (non-blank query).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Formatted result rows.
    pub results: Vec<SearchResultRow>,
    /// Confidence signal over the fused candidate set.
    pub confident: bool,
    /// Human-readable summary of the confidence signal.
    pub message: String,
    /// Post-filter candidate count before truncation to `limit`.
    pub total_matching: usize,
    /// Entity enrichment, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntityInfo>>,
    /// Emitted when a tag filter retained under 30% of candidates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_filter_warning: Option<String>,
}

/// One row of a browse response.
#[derive(Debug, Clone, Serialize)]
pub struct BrowseRow {
    /// Memory id.
    pub id: String,
    /// Memory content.
    pub memory: String,
    /// Linked categories.
    pub categories: Vec<String>,
    /// Memory tags.
    pub tags: Vec<String>,
    /// Semantic date.
    pub created_at: String,
    /// Semantic date; omitted when identical to `created_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Response for browse mode (blank query).
#[derive(Debug, Clone, Serialize)]
pub struct BrowseResponse {
    /// Total matching memories before pagination.
    pub total: usize,
    /// Echoed offset.
    pub offset: usize,
    /// Echoed (clamped) limit.
    pub limit: usize,
    /// Page of rows.
    pub results: Vec<BrowseRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(query: Option<&str>, limit: usize) -> SearchParams {
        SearchParams {
            user_id: "u1".to_string(),
            query: query.map(String::from),
            limit,
            offset: 0,
            category: None,
            tag: None,
            created_after: None,
            include_entities: true,
            app_name: "default".to_string(),
        }
    }

    #[test]
    fn test_limit_clamping() {
        assert_eq!(params(None, 0).clamped().limit, 1);
        assert_eq!(params(None, 50).clamped().limit, 50);
        assert_eq!(params(None, 10_000).clamped().limit, 200);
    }

    #[test]
    fn test_browse_mode_detection() {
        assert!(params(None, 10).is_browse());
        assert!(params(Some(""), 10).is_browse());
        assert!(params(Some("   \t"), 10).is_browse());
        assert!(!params(Some("rust"), 10).is_browse());
    }

    #[test]
    fn test_post_filter_detection() {
        assert!(!params(Some("rust"), 10).has_post_filter());

        let mut with_tag = params(Some("rust"), 10);
        with_tag.tag = Some("audited".to_string());
        assert!(with_tag.has_post_filter());

        let mut with_date = params(Some("rust"), 10);
        with_date.created_after = Some(chrono::Utc::now());
        assert!(with_date.has_post_filter());
    }
}
