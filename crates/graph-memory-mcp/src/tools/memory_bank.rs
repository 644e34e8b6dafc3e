//! Memory bank lifecycle: initialization and repository metadata.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::ToolResult;

const METADATA_LABEL: &str = "Metadata";
const METADATA_ID: &str = "meta";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryBankInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    operation: Operation,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Operation {
    Init,
    GetMetadata,
    UpdateMetadata,
}

/// Provision a memory bank and manage its metadata node.
pub struct MemoryBankTool;

#[async_trait::async_trait]
impl MemoryTool for MemoryBankTool {
    fn name(&self) -> &'static str {
        "memory-bank"
    }

    fn description(&self) -> &'static str {
        "Initialize the per-branch memory bank for a repository and read or \
         update its metadata."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "operation": {
                    "type": "string",
                    "enum": ["init", "get-metadata", "update-metadata"],
                    "description": "Lifecycle operation to perform"
                },
                "metadata": {
                    "type": "object",
                    "description": "Metadata fields to merge (update-metadata only)"
                }
            }),
            &["operation"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: MemoryBankInput = serde_json::from_value(input)?;
        let handle = input.scope.open(ctx).await?;
        let repository = input.scope.repository.clone();

        match input.operation {
            Operation::Init => {
                let branch = input.scope.branch.clone();
                let record = handle
                    .with_store(move |store| {
                        if let Some(existing) =
                            store.get_node(&repository, METADATA_LABEL, METADATA_ID)?
                        {
                            return Ok(existing);
                        }
                        let properties = json!({
                            "branch": branch,
                            "initialized": chrono::Utc::now().to_rfc3339(),
                        });
                        store.upsert_node(
                            &repository,
                            METADATA_LABEL,
                            METADATA_ID,
                            &repository,
                            &properties,
                        )
                    })
                    .await?;
                Ok(json!({
                    "success": true,
                    "path": handle.path().display().to_string(),
                    "metadata": record.to_json(),
                }))
            }
            Operation::GetMetadata => {
                let record = handle
                    .with_store(move |store| {
                        store.get_node(&repository, METADATA_LABEL, METADATA_ID)
                    })
                    .await?;
                Ok(match record {
                    Some(node) => json!({"found": true, "metadata": node.to_json()}),
                    None => json!({"found": false}),
                })
            }
            Operation::UpdateMetadata => {
                let updates = match input.metadata {
                    Some(Value::Object(map)) => map,
                    _ => {
                        return Err(crate::error::ToolError::validation(
                            "metadata",
                            "update-metadata requires a metadata object",
                        ));
                    }
                };
                let record = handle
                    .with_store(move |store| {
                        let existing = store.get_node(&repository, METADATA_LABEL, METADATA_ID)?;
                        let (name, mut properties) = match existing {
                            Some(node) => {
                                let props = match node.properties {
                                    Value::Object(map) => map,
                                    _ => serde_json::Map::new(),
                                };
                                (node.name, props)
                            }
                            None => (repository.clone(), serde_json::Map::new()),
                        };
                        properties.extend(updates);
                        store.upsert_node(
                            &repository,
                            METADATA_LABEL,
                            METADATA_ID,
                            &name,
                            &Value::Object(properties),
                        )
                    })
                    .await?;
                Ok(json!({"success": true, "metadata": record.to_json()}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::fixture;
    use super::*;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let f = fixture();
        let tool = MemoryBankTool;

        let first = tool
            .execute(&f.ctx, f.args(json!({"operation": "init"})))
            .await
            .unwrap();
        assert_eq!(first["success"], json!(true));
        assert!(first["path"].as_str().unwrap().ends_with("main.gmdb"));

        let second = tool
            .execute(&f.ctx, f.args(json!({"operation": "init"})))
            .await
            .unwrap();
        assert_eq!(
            first["metadata"]["properties"]["initialized"],
            second["metadata"]["properties"]["initialized"]
        );
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let f = fixture();
        let tool = MemoryBankTool;

        tool.execute(&f.ctx, f.args(json!({"operation": "init"})))
            .await
            .unwrap();

        let missing_scope = tool
            .execute(
                &f.ctx,
                f.args(json!({"operation": "update-metadata"})),
            )
            .await;
        assert!(missing_scope.is_err());

        tool.execute(
            &f.ctx,
            f.args(json!({
                "operation": "update-metadata",
                "metadata": {"techStack": ["rust", "sqlite"]}
            })),
        )
        .await
        .unwrap();

        let fetched = tool
            .execute(&f.ctx, f.args(json!({"operation": "get-metadata"})))
            .await
            .unwrap();
        assert_eq!(fetched["found"], json!(true));
        assert_eq!(
            fetched["metadata"]["properties"]["techStack"][0],
            json!("rust")
        );
    }

    #[tokio::test]
    async fn test_get_metadata_before_init() {
        let f = fixture();
        let result = MemoryBankTool
            .execute(&f.ctx, f.args(json!({"operation": "get-metadata"})))
            .await
            .unwrap();
        assert_eq!(result["found"], json!(false));
    }
}
