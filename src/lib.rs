//! # MemForge
//!
//! Memory core for long-term agent knowledge stores.
//!
//! MemForge ingests natural-language statements, normalizes them into durable
//! memory records, deduplicates them against prior knowledge, extracts
//! entities and relationships into a per-user knowledge graph, and retrieves
//! records through hybrid (BM25 + vector) search.
//!
//! ## Architecture
//!
//! - Write path: intent classification → intra-batch and cross-memory
//!   deduplication → memory write → bounded fire-and-forget extraction.
//! - Read path: hybrid search with reciprocal-rank fusion, post-filters,
//!   confidence signals, and entity enrichment; browse mode for blank
//!   queries.
//! - Storage: one [`GraphStore`](storage::GraphStore) interface backed by an
//!   embedded `SQLite` engine (FTS5 lexical index, cosine vector search).
//!   A remote bolt-speaking engine fits behind the same interface.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memforge::rpc::{MemforgeServices, execute_add_memories};
//!
//! let result = execute_add_memories(
//!     &services,
//!     serde_json::json!({
//!         "user_id": "u1",
//!         "content": "Alice prefers TypeScript",
//!     }),
//! )
//! .await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod rpc;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::MemforgeConfig;
pub use embedding::Embedder;
pub use llm::LlmClient;
pub use models::{
    Entity, EntityId, ExtractionStatus, Intent, Memory, MemoryId, Relationship, SearchHit,
};
pub use services::{
    DedupChecker, EntityResolver, ExtractionWorker, HybridSearcher, IntentClassifier,
    MemoryWriteService,
};
pub use storage::{GraphStore, SqliteGraphStore};

/// Error type for memforge operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Missing user scope, non-string content items, malformed arguments |
/// | `NotFound` | Deleting or superseding a memory/entity that does not exist |
/// | `OperationFailed` | Graph queries fail, LLM/embedding transport errors exhaust retries |
///
/// Degraded operation (LLM or embedder unavailable) is not an error variant:
/// extraction and the semantic dedup tier fail open instead of propagating.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - `user_id` is missing or empty
    /// - A content item is not a string
    /// - `replaces` is combined with a multi-item batch
    /// - RPC argument JSON fails to deserialize
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced record does not exist.
    ///
    /// Lookups return `Ok(None)` for unknown ids; mutations of unknown ids
    /// raise this variant.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail
    /// - LLM or embedding transport errors exhaust their single retry
    /// - The stored config document cannot be written
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::OperationFailed`] with the given operation name.
    #[must_use]
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for memforge operations.
pub type Result<T> = std::result::Result<T, Error>;
