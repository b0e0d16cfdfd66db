//! Write-path intents produced by the classifier.

use crate::models::EntityId;
use serde::{Deserialize, Serialize};

/// Reference to an entity by display name or id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    /// Resolve through the normalized display name.
    Name(String),
    /// Direct id reference.
    Id(EntityId),
}

/// The classified intent of a single ingested statement.
///
/// Classification failures fall open to [`Intent::Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Store the statement as a new memory (subject to deduplication).
    Store,
    /// Soft-delete memories matching the target description.
    Invalidate {
        /// Natural-language description of what to forget.
        target: String,
    },
    /// Remove an entity and its incident edges.
    DeleteEntity {
        /// The entity to remove.
        entity: EntityRef,
    },
    /// Refresh a memory's `updated_at`, optionally union-merging tags.
    Touch {
        /// Natural-language description of the memory to touch.
        target: String,
    },
    /// Mark a memory resolved.
    Resolve {
        /// Natural-language description of the memory to resolve.
        target: String,
    },
}

impl Intent {
    /// Returns the intent kind as a string, for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Store => "STORE",
            Self::Invalidate { .. } => "INVALIDATE",
            Self::DeleteEntity { .. } => "DELETE_ENTITY",
            Self::Touch { .. } => "TOUCH",
            Self::Resolve { .. } => "RESOLVE",
        }
    }
}
