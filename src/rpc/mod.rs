//! RPC surface.
//!
//! The wire transport is out of scope; this module exposes the two tool
//! operations as handlers over `serde_json::Value`, plus the service
//! container that wires the pipeline together. Any transport (MCP, HTTP,
//! CLI) dispatches into [`tools`].

mod tools;

pub use tools::{AddMemoriesArgs, execute_add_memories, execute_search_memory};

use crate::config::MemforgeConfig;
use crate::embedding::Embedder;
use crate::llm::LlmClient;
use crate::services::{
    CombinedExtractor, DedupChecker, EntityResolver, ExtractionWorker, HybridSearcher,
    IntentClassifier, MemoryWriteService,
};
use crate::storage::GraphStore;
use std::sync::Arc;

/// Wired service graph for one process.
///
/// The graph store, LLM client, and embedder are process-wide singletons
/// built once at startup; tests inject substitutes through `build`. Services
/// are held behind `Arc` so the async tool handlers can dispatch them onto
/// the blocking pool.
pub struct MemforgeServices {
    write: Arc<MemoryWriteService>,
    search: Arc<HybridSearcher>,
}

impl MemforgeServices {
    /// Wires the full pipeline over the given collaborators.
    #[must_use]
    pub fn build(
        store: Arc<dyn GraphStore>,
        llm: Option<Arc<dyn LlmClient>>,
        embedder: Option<Arc<dyn Embedder>>,
        config: MemforgeConfig,
    ) -> Self {
        let classifier = llm
            .clone()
            .map_or_else(IntentClassifier::without_llm, IntentClassifier::new);
        let dedup = DedupChecker::new(Arc::clone(&store), embedder.clone(), llm.clone());
        let extractor = llm.clone().map_or_else(CombinedExtractor::without_llm, |l| {
            CombinedExtractor::new(l, config.max_gleanings)
        });
        let resolver = EntityResolver::new(
            Arc::clone(&store),
            llm.clone(),
            embedder.clone(),
            config.resolver_threshold,
        );
        let worker = Arc::new(ExtractionWorker::new(
            Arc::clone(&store),
            extractor,
            resolver,
            llm.clone(),
            embedder.clone(),
            config.summary_threshold,
        ));

        let write = Arc::new(MemoryWriteService::new(
            Arc::clone(&store),
            classifier,
            dedup,
            worker,
            llm,
            embedder.clone(),
            config.clone(),
        ));
        let search = Arc::new(HybridSearcher::new(store, embedder, config));

        Self { write, search }
    }

    /// The write pipeline.
    #[must_use]
    pub fn write(&self) -> Arc<MemoryWriteService> {
        Arc::clone(&self.write)
    }

    /// The read pipeline.
    #[must_use]
    pub fn search(&self) -> Arc<HybridSearcher> {
        Arc::clone(&self.search)
    }
}
