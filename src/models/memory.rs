//! Memory records and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a memory ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new unique memory ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("mem_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of background entity extraction for a memory.
///
/// `Done` is terminal unless the memory content is rewritten by a supersede.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    /// Extraction has not been attempted.
    #[default]
    Unstarted,
    /// A worker has claimed the memory and is extracting.
    Pending,
    /// Extraction completed successfully.
    Done,
    /// Extraction failed; the message is stored on the memory.
    Failed,
}

impl ExtractionStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unstarted" => Some(Self::Unstarted),
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single atomic statement stored for a user.
///
/// Content is immutable after creation: a supersede produces a new record
/// and tombstones the old one via `invalid_at`.
#[derive(Debug, Clone)]
pub struct Memory {
    /// Unique identifier.
    pub id: MemoryId,
    /// Owning user.
    pub user_id: String,
    /// The statement text.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp. Always `>= created_at`.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone. Content is retained but hidden from search.
    pub invalid_at: Option<DateTime<Utc>>,
    /// Set by the RESOLVE intent.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Background extraction state.
    pub extraction_status: ExtractionStatus,
    /// Number of extraction attempts. Monotonically non-decreasing.
    pub extraction_attempts: u32,
    /// Message from the most recent failed extraction.
    pub extraction_error: Option<String>,
    /// Tags, stored sorted and deduplicated.
    pub tags: Vec<String>,
    /// Source client identifier.
    pub app_name: String,
    /// Content embedding, when the embedder was available at write time.
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    /// Returns true if the memory is tombstoned.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        self.invalid_at.is_some()
    }
}

/// Input for creating a memory record.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    /// The statement text.
    pub content: String,
    /// Initial tags.
    pub tags: Vec<String>,
    /// Source client identifier.
    pub app_name: String,
    /// Content embedding, if one could be computed.
    pub embedding: Option<Vec<f32>>,
}

/// Stable fingerprint of memory content for the exact dedup tier:
/// SHA-256 over the lowercased, whitespace-collapsed text.
#[must_use]
pub fn content_fingerprint(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let normalized = content.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Union-merges two tag sets, returning a sorted, deduplicated list.
#[must_use]
pub fn merge_tags(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing
        .iter()
        .chain(incoming.iter())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    merged.sort();
    merged.dedup();
    merged
}
