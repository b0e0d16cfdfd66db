//! Knowledge-graph entities and the open type ontology.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters stripped by [`normalized_name`].
static NORMALIZE_STRIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\-_./\\]+").unwrap_or_else(|e| panic!("invalid regex: {e}")));

/// Unique identifier for a graph entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new unique entity ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("ent_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the entity ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reduces a display name to the resolver's identity key: lowercased with
/// whitespace and `-_./\` separators stripped.
///
/// `(user_id, normalized_name)` is the uniqueness key for entities; two
/// concurrent resolvers converge on it via MERGE.
#[must_use]
pub fn normalized_name(name: &str) -> String {
    NORMALIZE_STRIP.replace_all(&name.to_lowercase(), "").into_owned()
}

/// Normalizes a free-form entity or relationship type to `UPPER_SNAKE_CASE`.
///
/// Empty input maps to `OTHER`.
#[must_use]
pub fn normalize_type(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    let collapsed = cleaned
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if collapsed.is_empty() {
        "OTHER".to_string()
    } else {
        collapsed
    }
}

/// Ranks an entity type in the open ontology. Lower rank wins on upgrade.
///
/// | Rank | Types |
/// |------|-------|
/// | 1 | `PERSON` |
/// | 2 | `ORGANIZATION` |
/// | 3 | `LOCATION` |
/// | 4 | `PRODUCT` |
/// | 5 | any other domain-specific type |
/// | 6 | `CONCEPT` |
/// | 99 | `OTHER` |
#[must_use]
pub fn type_rank(entity_type: &str) -> u8 {
    match entity_type {
        "PERSON" => 1,
        "ORGANIZATION" => 2,
        "LOCATION" => 3,
        "PRODUCT" => 4,
        "CONCEPT" => 6,
        "OTHER" => 99,
        _ => 5,
    }
}

/// A user-scoped named thing in the knowledge graph.
///
/// At most one entity exists per `(user_id, normalized_name)` pair; the
/// resolver guarantees convergence. Type and description are only ever
/// upgraded, never downgraded.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Identity key derived from the display name.
    pub normalized_name: String,
    /// Open-ontology type in `UPPER_SNAKE_CASE`.
    pub entity_type: String,
    /// Consolidated description.
    pub description: String,
    /// Free-form metadata bag, persisted as a JSON string property.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Embedding of the description, computed asynchronously after writes.
    pub description_embedding: Option<Vec<f32>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp. Always `>= created_at`.
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Returns the rank of this entity's type.
    #[must_use]
    pub fn rank(&self) -> u8 {
        type_rank(&self.entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_name_strips_separators() {
        assert_eq!(normalized_name("Alice Chen"), "alicechen");
        assert_eq!(normalized_name("e-commerce_v2.0"), "ecommercev20");
        assert_eq!(normalized_name("a/b\\c.d"), "abcd");
    }

    #[test]
    fn test_normalized_name_collision() {
        assert_eq!(normalized_name("Alice-Chen"), normalized_name("alice chen"));
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("person"), "PERSON");
        assert_eq!(normalize_type("software engineer"), "SOFTWARE_ENGINEER");
        assert_eq!(normalize_type("  "), "OTHER");
        assert_eq!(normalize_type("multi--dash"), "MULTI_DASH");
    }

    #[test]
    fn test_type_rank_ordering() {
        assert!(type_rank("PERSON") < type_rank("ORGANIZATION"));
        assert!(type_rank("PRODUCT") < type_rank("PROGRAMMING_LANGUAGE"));
        assert!(type_rank("PROGRAMMING_LANGUAGE") < type_rank("CONCEPT"));
        assert!(type_rank("CONCEPT") < type_rank("OTHER"));
    }
}
