//! Business logic services.
//!
//! Services orchestrate the graph store, LLM, and embedder behind the two
//! RPC operations: the write pipeline (`add_memories`) and hybrid retrieval
//! (`search_memory`).

// Allow cast_precision_loss for score calculations where exact precision is
// not critical.
#![allow(clippy::cast_precision_loss)]

mod dates;
mod dedup;
pub mod extraction;
mod intent;
mod resolver;
pub mod rrf;
mod search;
mod worker;
mod write;

pub use dates::format_semantic_date;
pub use dedup::{DedupAction, DedupChecker, DedupConfigCache, DedupSettings};
pub use extraction::{
    CombinedExtractor, ExtractedEntity, ExtractedRelationship, ExtractionOptions,
    ExtractionOutcome,
};
pub use intent::IntentClassifier;
pub use resolver::EntityResolver;
pub use search::{HybridSearcher, SearchOutcome};
pub use worker::ExtractionWorker;
pub use write::{AddMemoriesOutcome, AddMemoriesRequest, ItemError, MemoryWriteService};

/// Detached execution for fire-and-forget tasks.
///
/// Inside a tokio runtime the task lands on the bounded blocking pool; the
/// handle is dropped immediately, so the task self-completes (logs only)
/// beyond any drain window. Outside a runtime a plain thread is used, which
/// keeps synchronous tests and CLI paths working.
pub(crate) fn fire_and_forget<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn_blocking(task);
    } else {
        std::thread::spawn(task);
    }
}
