//! Deterministic memory maintenance: stale-context analysis and pruning.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::ToolResult;

const DEFAULT_STALE_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizerInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    operation: Operation,
    #[serde(default)]
    stale_days: Option<i64>,
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Analyze,
    Prune,
}

/// Analyze and prune stale daily contexts.
pub struct MemoryOptimizerTool;

#[async_trait::async_trait]
impl MemoryTool for MemoryOptimizerTool {
    fn name(&self) -> &'static str {
        "memory-optimizer"
    }

    fn description(&self) -> &'static str {
        "Find Context entries older than staleDays (analyze) and optionally \
         delete them (prune). Prune defaults to a dry run."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "operation": {"type": "string", "enum": ["analyze", "prune"]},
                "staleDays": {
                    "type": "integer",
                    "description": "Age threshold in days (default 90)"
                },
                "dryRun": {
                    "type": "boolean",
                    "description": "Report what prune would delete without deleting"
                }
            }),
            &["operation"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: OptimizerInput = serde_json::from_value(input)?;
        let handle = input.scope.open(ctx).await?;
        let stale_days = input.stale_days.unwrap_or(DEFAULT_STALE_DAYS).max(0);
        let cutoff = chrono::Utc::now() - chrono::Duration::days(stale_days);

        let repository = input.scope.repository.clone();
        let contexts = handle
            .with_store(move |store| store.list_nodes(&repository, "Context", usize::MAX >> 1))
            .await?;

        let total = contexts.len();
        let stale: Vec<String> = contexts
            .into_iter()
            .filter(|node| {
                chrono::DateTime::parse_from_rfc3339(&node.updated_at)
                    .map(|updated| updated.with_timezone(&chrono::Utc) < cutoff)
                    .unwrap_or(false)
            })
            .map(|node| node.id)
            .collect();

        match input.operation {
            Operation::Analyze => Ok(json!({
                "operation": "analyze",
                "totalContexts": total,
                "staleDays": stale_days,
                "staleContexts": stale,
            })),
            Operation::Prune => {
                let removed = if input.dry_run {
                    Vec::new()
                } else {
                    let repository = input.scope.repository.clone();
                    let doomed = stale.clone();
                    handle
                        .with_store(move |store| {
                            let mut removed = Vec::new();
                            for id in doomed {
                                if store.delete_node(&repository, "Context", &id)? {
                                    removed.push(id);
                                }
                            }
                            Ok(removed)
                        })
                        .await?
                };
                Ok(json!({
                    "operation": "prune",
                    "dryRun": input.dry_run,
                    "candidates": stale,
                    "removed": removed,
                }))
            }
        }
    }
}
