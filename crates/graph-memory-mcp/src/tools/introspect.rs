//! Graph introspection: labels, counts, property keys, indexes.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::{ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    query: Query,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Query {
    Labels,
    Count,
    Properties,
    Indexes,
}

/// Inspect the shape of a memory bank graph.
pub struct IntrospectTool;

#[async_trait::async_trait]
impl MemoryTool for IntrospectTool {
    fn name(&self) -> &'static str {
        "introspect"
    }

    fn description(&self) -> &'static str {
        "Inspect the graph: node labels, per-label counts, property keys of \
         a label, or the store's indexes."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "query": {
                    "type": "string",
                    "enum": ["labels", "count", "properties", "indexes"]
                },
                "label": {
                    "type": "string",
                    "description": "Node label (required for properties)"
                }
            }),
            &["query"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: IntrospectInput = serde_json::from_value(input)?;
        let handle = input.scope.open(ctx).await?;
        let repository = input.scope.repository.clone();

        match input.query {
            Query::Labels => {
                let labels = handle
                    .with_store(move |store| store.labels(&repository))
                    .await?;
                Ok(json!({"labels": labels}))
            }
            Query::Count => {
                let counts = handle
                    .with_store(move |store| store.count_by_label(&repository))
                    .await?;
                let total: i64 = counts.iter().map(|(_, n)| n).sum();
                let by_label: serde_json::Map<String, Value> = counts
                    .into_iter()
                    .map(|(label, n)| (label, json!(n)))
                    .collect();
                Ok(json!({"counts": by_label, "total": total}))
            }
            Query::Properties => {
                let label = input
                    .label
                    .ok_or_else(|| ToolError::validation("label", "required for properties"))?;
                let label_for_store = label.clone();
                let keys = handle
                    .with_store(move |store| store.property_keys(&repository, &label_for_store))
                    .await?;
                Ok(json!({"label": label, "keys": keys}))
            }
            Query::Indexes => {
                let rows = handle
                    .execute_query(
                        "SELECT name, tbl_name FROM sqlite_master WHERE type = 'index' \
                         AND name NOT LIKE 'sqlite_%' ORDER BY name",
                        &[],
                    )
                    .await?;
                Ok(json!({"indexes": rows}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::fixture;
    use super::*;

    async fn seed(f: &super::super::testing::Fixture) {
        let handle = f
            .ctx
            .acquire_db(f.root.path().to_str().unwrap(), "demo", "main")
            .await
            .unwrap();
        handle
            .with_store(|s| {
                s.upsert_node("demo", "Component", "c1", "Core", &json!({"kind": "lib"}))?;
                s.upsert_node("demo", "Component", "c2", "API", &json!({"status": "active"}))?;
                s.upsert_node("demo", "Decision", "d1", "Use SQLite", &json!({}))?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_labels_and_counts() {
        let f = fixture();
        seed(&f).await;
        let tool = IntrospectTool;

        let labels = tool
            .execute(&f.ctx, f.args(json!({"query": "labels"})))
            .await
            .unwrap();
        assert_eq!(labels["labels"], json!(["Component", "Decision"]));

        let counts = tool
            .execute(&f.ctx, f.args(json!({"query": "count"})))
            .await
            .unwrap();
        assert_eq!(counts["counts"]["Component"], json!(2));
        assert_eq!(counts["total"], json!(3));
    }

    #[tokio::test]
    async fn test_properties_requires_label() {
        let f = fixture();
        seed(&f).await;
        let tool = IntrospectTool;

        assert!(
            tool.execute(&f.ctx, f.args(json!({"query": "properties"})))
                .await
                .is_err()
        );

        let keys = tool
            .execute(
                &f.ctx,
                f.args(json!({"query": "properties", "label": "Component"})),
            )
            .await
            .unwrap();
        assert_eq!(keys["keys"], json!(["kind", "status"]));
    }

    #[tokio::test]
    async fn test_indexes_listed() {
        let f = fixture();
        seed(&f).await;
        let indexes = IntrospectTool
            .execute(&f.ctx, f.args(json!({"query": "indexes"})))
            .await
            .unwrap();
        let names: Vec<&str> = indexes["indexes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"idx_nodes_repo_label"));
    }
}
