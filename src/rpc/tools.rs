//! Tool handlers for `add_memories` and `search_memory`.

use super::MemforgeServices;
use crate::models::{MemoryId, SearchParams};
use crate::services::AddMemoriesRequest;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

/// Arguments accepted by `add_memories`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddMemoriesArgs {
    /// Owning user scope. Required.
    pub user_id: String,
    /// A single string or an ordered list of strings.
    pub content: Value,
    /// Tags applied to written memories.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit categories.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Skips LLM auto-categorization.
    #[serde(default)]
    pub suppress_auto_categories: Option<bool>,
    /// Asserted id of the memory to supersede.
    #[serde(default)]
    pub replaces: Option<String>,
    /// Source client identifier.
    #[serde(default)]
    pub app_name: Option<String>,
}

impl AddMemoriesArgs {
    /// Flattens `content` into an item list, rejecting non-string entries.
    fn items(&self) -> Result<Vec<String>> {
        match &self.content {
            Value::String(item) => Ok(vec![item.clone()]),
            Value::Array(values) => values
                .iter()
                .map(|value| {
                    value.as_str().map(String::from).ok_or_else(|| {
                        Error::InvalidInput("content items must be strings".to_string())
                    })
                })
                .collect(),
            _ => Err(Error::InvalidInput(
                "content must be a string or an array of strings".to_string(),
            )),
        }
    }
}

/// Flattens a blocking-pool join into the operation's result.
fn join_blocking<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    joined.map_err(|e| Error::operation("dispatch_blocking", e))?
}

/// Executes the `add_memories` tool.
///
/// The pipeline blocks on LLM calls and drains, so it runs on the blocking
/// pool.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for malformed arguments; per-item
/// failures are reported inside the response's `errors[]` instead.
pub async fn execute_add_memories(services: &MemforgeServices, arguments: Value) -> Result<Value> {
    let args: AddMemoriesArgs =
        serde_json::from_value(arguments).map_err(|e| Error::InvalidInput(e.to_string()))?;
    if args.user_id.trim().is_empty() {
        return Err(Error::InvalidInput("user_id is required".to_string()));
    }

    let request = AddMemoriesRequest {
        items: args.items()?,
        user_id: args.user_id.clone(),
        tags: args.tags.clone(),
        categories: args.categories.clone(),
        suppress_auto_categories: args.suppress_auto_categories,
        replaces: args.replaces.clone().map(MemoryId::new),
        app_name: args.app_name.clone().unwrap_or_else(|| "default".to_string()),
    };

    let write = services.write();
    let outcome = join_blocking(
        tokio::task::spawn_blocking(move || write.add_memories(&request)).await,
    )?;
    Ok(outcome.to_value())
}

/// Executes the `search_memory` tool.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for malformed arguments and propagates
/// store failures.
pub async fn execute_search_memory(services: &MemforgeServices, arguments: Value) -> Result<Value> {
    let params: SearchParams =
        serde_json::from_value(arguments).map_err(|e| Error::InvalidInput(e.to_string()))?;
    if params.user_id.trim().is_empty() {
        return Err(Error::InvalidInput("user_id is required".to_string()));
    }

    let search = services.search();
    let outcome =
        join_blocking(tokio::task::spawn_blocking(move || search.search(params)).await)?;
    Ok(outcome.to_value())
}
