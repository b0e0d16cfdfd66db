//! Binary entry point for memforge.
//!
//! Thin operator CLI over the same service graph the RPC surface uses:
//! `add` and `search` map to the two tools, `status` summarizes a store.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// CLI output goes to stdout/stderr by design.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use memforge::config::MemforgeConfig;
use memforge::embedding::HashEmbedder;
use memforge::llm::ResilientLlmClient;
use memforge::models::MemoryId;
use memforge::rpc::{MemforgeServices, execute_add_memories, execute_search_memory};
use memforge::storage::{GraphStore, SqliteGraphStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "memforge", version, about = "Memory core for long-term agent knowledge")]
struct Cli {
    /// Path to the embedded store.
    #[arg(long, global = true, default_value = "memforge.db", env = "MEMFORGE_DB")]
    db: PathBuf,

    /// User scope for all operations.
    #[arg(long, global = true, default_value = "default", env = "MEMFORGE_USER")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one or more statements.
    Add {
        /// Statements to ingest.
        #[arg(required = true)]
        content: Vec<String>,
        /// Tags applied to written memories.
        #[arg(long)]
        tag: Vec<String>,
        /// Explicit categories.
        #[arg(long)]
        category: Vec<String>,
        /// Skip LLM auto-categorization.
        #[arg(long)]
        no_auto_categories: bool,
        /// Source client identifier.
        #[arg(long, default_value = "cli")]
        app: String,
    },
    /// Search memories; omit the query to browse.
    Search {
        /// Query text.
        query: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// Skip entity enrichment.
        #[arg(long)]
        no_entities: bool,
    },
    /// Show one memory by id.
    Show {
        /// Memory id, as returned by `add`.
        id: String,
    },
    /// Show store statistics for the user.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("memforge=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MemforgeConfig::from_env();

    let store: Arc<dyn GraphStore> =
        Arc::new(SqliteGraphStore::open(&cli.db).context("opening store")?);
    let embedder = Arc::new(HashEmbedder::new(config.embedding_dim));
    let llm = Arc::new(ResilientLlmClient::from_env());
    let services =
        MemforgeServices::build(Arc::clone(&store), Some(llm), Some(embedder), config);

    match cli.command {
        Command::Add {
            content,
            tag,
            category,
            no_auto_categories,
            app,
        } => {
            let arguments = serde_json::json!({
                "user_id": cli.user,
                "content": content,
                "tags": tag,
                "categories": category,
                "suppress_auto_categories": no_auto_categories.then_some(true),
                "app_name": app,
            });
            let result = execute_add_memories(&services, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Command::Search {
            query,
            limit,
            offset,
            category,
            tag,
            no_entities,
        } => {
            let arguments = serde_json::json!({
                "user_id": cli.user,
                "query": query,
                "limit": limit,
                "offset": offset,
                "category": category,
                "tag": tag,
                "include_entities": !no_entities,
                "app_name": "cli",
            });
            let result = execute_search_memory(&services, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Command::Show { id } => {
            let memory = store
                .get_memory(&cli.user, &MemoryId::new(&*id))?
                .with_context(|| format!("memory {id} not found"))?;
            println!("id: {}", memory.id);
            println!("content: {}", memory.content);
            println!("created_at: {}", memory.created_at.to_rfc3339());
            println!("updated_at: {}", memory.updated_at.to_rfc3339());
            if let Some(at) = memory.invalid_at {
                println!("invalid_at: {}", at.to_rfc3339());
            }
            if let Some(at) = memory.resolved_at {
                println!("resolved_at: {}", at.to_rfc3339());
            }
            println!(
                "extraction: {} (attempts: {})",
                memory.extraction_status, memory.extraction_attempts
            );
            if let Some(error) = &memory.extraction_error {
                println!("extraction_error: {error}");
            }
            if !memory.tags.is_empty() {
                println!("tags: {}", memory.tags.join(", "));
            }
            println!("app: {}", memory.app_name);
        },
        Command::Status => {
            let memories = store.count_memories(&cli.user)?;
            let entities = store.list_entities(&cli.user, 10)?;
            println!("memories: {memories}");
            println!("recent entities:");
            for entity in entities {
                println!("  {} [{}] {}", entity.name, entity.entity_type, entity.description);
            }
        },
    }

    Ok(())
}
