//! MCP tool implementations.
//!
//! Each tool module provides unit structs that:
//! 1. Declare a name, description, and input schema
//! 2. Parse typed input from validated arguments
//! 3. Read and mutate the per-repository graph through the execution context
//!
//! The registry is built once at startup and immutable afterwards.

mod analyze;
mod associate;
mod bulk_import;
mod context;
mod detect;
mod entity;
mod introspect;
mod memory_bank;
mod optimizer;
mod query;
mod search;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::db::{DatabaseHandle, DbProvisioner};
use crate::error::{ToolError, ToolResult};
use crate::server::progress::ProgressSink;
use crate::server::session::ClientInfo;

/// Immutable session view handed to handlers.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub id: String,
    pub client: ClientInfo,
}

/// Tool execution context: everything a handler may touch. Handlers never
/// retain it beyond their own invocation.
pub struct ToolContext {
    /// Session the request belongs to.
    pub session: SessionView,
    /// Id of the originating request, also the progress token.
    pub request_id: Value,
    /// Cancellation token for this request.
    pub cancel: CancellationToken,
    sink: ProgressSink,
    provisioner: Arc<DbProvisioner>,
}

impl ToolContext {
    #[must_use]
    pub fn new(
        session: SessionView,
        request_id: Value,
        cancel: CancellationToken,
        sink: ProgressSink,
        provisioner: Arc<DbProvisioner>,
    ) -> Self {
        Self {
            session,
            request_id,
            cancel,
            sink,
            provisioner,
        }
    }

    /// Emit one progress payload for this request.
    pub fn send_progress(&self, payload: Value) {
        self.sink.progress(&payload);
    }

    /// Resolve a database handle through the provisioner.
    pub async fn acquire_db(
        &self,
        client_project_root: &str,
        repository: &str,
        branch: &str,
    ) -> ToolResult<Arc<DatabaseHandle>> {
        Ok(self
            .provisioner
            .acquire(client_project_root, repository, branch)
            .await?)
    }

    /// Bail out if the request was cancelled. Handlers call this between
    /// long steps.
    pub fn ensure_live(&self) -> ToolResult<()> {
        if self.cancel.is_cancelled() {
            Err(ToolError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session", &self.session.id)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Trait for MCP tools.
#[async_trait::async_trait]
pub trait MemoryTool: Send + Sync {
    /// Tool name (e.g. "memory-bank").
    fn name(&self) -> &'static str;

    /// Tool description for the client.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters, enforced by the dispatcher.
    fn input_schema(&self) -> Value;

    /// Behavioral annotations advertised in `tools/list`.
    fn annotations(&self) -> Value {
        json!({})
    }

    /// Execute the tool with validated input, returning the JSON result
    /// the dispatcher wraps into the MCP envelope.
    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value>;
}

/// The immutable tool registry.
pub struct ToolRegistry {
    tools: Vec<Box<dyn MemoryTool>>,
}

impl ToolRegistry {
    /// Build a registry from an explicit tool set (tests register synthetic
    /// tools this way).
    #[must_use]
    pub fn from_tools(tools: Vec<Box<dyn MemoryTool>>) -> Self {
        Self { tools }
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn MemoryTool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Descriptor list for `tools/list`.
    #[must_use]
    pub fn descriptors(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.input_schema(),
                    "annotations": t.annotations(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Register all tools.
#[must_use]
pub fn register_all_tools() -> ToolRegistry {
    ToolRegistry::from_tools(vec![
        // Memory bank lifecycle and metadata
        Box::new(memory_bank::MemoryBankTool),
        // Entity CRUD
        Box::new(entity::EntityTool),
        // Graph introspection
        Box::new(introspect::IntrospectTool),
        // Working context sessions
        Box::new(context::ContextTool),
        // Read-side queries
        Box::new(query::QueryTool),
        // Relationship creation
        Box::new(associate::AssociateTool),
        // Umbrella algorithm tools
        Box::new(analyze::AnalyzeTool),
        Box::new(detect::DetectTool),
        // Bulk ingestion
        Box::new(bulk_import::BulkImportTool),
        // Full-graph search
        Box::new(search::SearchTool),
        // Deterministic memory maintenance
        Box::new(optimizer::MemoryOptimizerTool),
        // Individual graph algorithms
        Box::new(analyze::PageRankTool),
        Box::new(analyze::KCoreDecompositionTool),
        Box::new(analyze::LouvainCommunityDetectionTool),
        Box::new(analyze::ShortestPathTool),
        Box::new(detect::StronglyConnectedComponentsTool),
        Box::new(detect::WeaklyConnectedComponentsTool),
    ])
}


/// Scope arguments shared by every domain tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeArgs {
    pub client_project_root: String,
    pub repository: String,
    pub branch: String,
}

impl ScopeArgs {
    /// Resolve this scope to its database handle.
    pub async fn open(&self, ctx: &ToolContext) -> ToolResult<Arc<DatabaseHandle>> {
        if self.client_project_root.is_empty() {
            return Err(ToolError::validation(
                "clientProjectRoot",
                "must not be empty",
            ));
        }
        if self.repository.is_empty() {
            return Err(ToolError::validation("repository", "must not be empty"));
        }
        if self.branch.is_empty() {
            return Err(ToolError::validation("branch", "must not be empty"));
        }
        ctx.acquire_db(&self.client_project_root, &self.repository, &self.branch)
            .await
    }
}

/// Schema fragment for the shared scope properties.
pub(crate) fn scope_properties() -> serde_json::Map<String, Value> {
    let fragment = json!({
        "clientProjectRoot": {
            "type": "string",
            "description": "Absolute root of the client project"
        },
        "repository": {
            "type": "string",
            "description": "Repository name the graph is scoped to"
        },
        "branch": {
            "type": "string",
            "description": "Branch name (one graph file per branch)"
        }
    });
    match fragment {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Build an object schema from scope properties plus tool-specific ones.
pub(crate) fn object_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = scope_properties();
    if let Value::Object(map) = extra {
        properties.extend(map);
    }
    let mut all_required = vec!["clientProjectRoot", "repository", "branch"];
    all_required.extend_from_slice(required);
    json!({
        "type": "object",
        "properties": properties,
        "required": all_required,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_catalog() {
        let registry = register_all_tools();
        for name in [
            "memory-bank",
            "entity",
            "introspect",
            "context",
            "query",
            "associate",
            "analyze",
            "detect",
            "bulk-import",
            "search",
            "memory-optimizer",
            "pagerank",
            "k-core-decomposition",
            "louvain-community-detection",
            "strongly-connected-components",
            "weakly-connected-components",
            "shortest-path",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
        assert_eq!(registry.len(), 17);
    }

    #[test]
    fn test_descriptors_shape() {
        let registry = register_all_tools();
        let descriptors = registry.descriptors();
        let tools = descriptors["tools"].as_array().unwrap();
        assert_eq!(tools.len(), registry.len());
        for tool in tools {
            assert!(tool["name"].is_string());
            assert!(tool["description"].is_string());
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }

    #[test]
    fn test_object_schema_merges_required() {
        let schema = object_schema(json!({"id": {"type": "string"}}), &["id"]);
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"clientProjectRoot"));
        assert!(required.contains(&"id"));
        assert!(schema["properties"]["branch"].is_object());
    }
}
