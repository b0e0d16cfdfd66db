//! Graph edges: semantic relationships and internal link kinds.

use crate::models::{Entity, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A directed, labeled edge between two entities.
///
/// The relation label is stored as the `rel_type` property rather than a
/// distinct edge label, keeping the storage schema static. Exactly one edge
/// exists per `(source, target, rel_type)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Source entity.
    pub source: EntityId,
    /// Target entity.
    pub target: EntityId,
    /// Relation label in `UPPER_SNAKE_CASE`.
    pub rel_type: String,
    /// Human-readable description of the relation.
    pub description: String,
    /// Free-form metadata bag.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every upsert of the same triple.
    pub updated_at: DateTime<Utc>,
}

/// Edge kinds used by the store.
///
/// All kinds except [`EdgeKind::RelatedTo`] are internal bookkeeping edges
/// and are excluded from semantic traversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// `(User)-[:HAS_MEMORY]->(Memory)` scoping edge.
    HasMemory,
    /// `(User)-[:HAS_ENTITY]->(Entity)` scoping edge.
    HasEntity,
    /// `(User)-[:HAS_CATEGORY]->(Category)` scoping edge.
    HasCategory,
    /// `(User)-[:HAS_APP]->(App)` scoping edge.
    HasApp,
    /// `(Memory)-[:MENTIONS]->(Entity)`, idempotent per pair.
    Mentions,
    /// `(App)-[:ACCESSED]->(Memory)` with access counter.
    Accessed,
    /// `(Memory)-[:SUPERSEDES]->(Memory)` replacement link.
    Supersedes,
    /// `(Entity)-[:RELATED_TO]->(Entity)`, the only semantic edge.
    RelatedTo,
}

impl EdgeKind {
    /// Returns the edge kind as its graph label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HasMemory => "HAS_MEMORY",
            Self::HasEntity => "HAS_ENTITY",
            Self::HasCategory => "HAS_CATEGORY",
            Self::HasApp => "HAS_APP",
            Self::Mentions => "MENTIONS",
            Self::Accessed => "ACCESSED",
            Self::Supersedes => "SUPERSEDES",
            Self::RelatedTo => "RELATED_TO",
        }
    }

    /// Returns true for bookkeeping edges excluded from semantic traversals.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        !matches!(self, Self::RelatedTo)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a graph traversal from a center entity.
///
/// A *neighborhood* contains edges incident to the center within N hops; a
/// *subgraph* (ego-graph) additionally includes edges between the collected
/// neighbors.
#[derive(Debug, Clone, Default)]
pub struct TraversalResult {
    /// Entities reached, including the center.
    pub entities: Vec<Entity>,
    /// `RELATED_TO` edges collected by the traversal.
    pub relationships: Vec<Relationship>,
}
