//! Full-graph substring search.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::{ToolError, ToolResult};

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    query: String,
    #[serde(default)]
    entity_types: Vec<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Case-insensitive substring search over ids, names, and properties.
pub struct SearchTool;

#[async_trait::async_trait]
impl MemoryTool for SearchTool {
    fn name(&self) -> &'static str {
        "search"
    }

    fn description(&self) -> &'static str {
        "Search the graph by substring over entity ids, names, and property \
         text, optionally restricted to entity types."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "query": {"type": "string", "description": "Substring to look for"},
                "entityTypes": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Labels to search (e.g. [\"component\"]); empty = all"
                },
                "limit": {"type": "integer"}
            }),
            &["query"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: SearchInput = serde_json::from_value(input)?;
        if input.query.trim().is_empty() {
            return Err(ToolError::validation("query", "must not be empty"));
        }
        let handle = input.scope.open(ctx).await?;

        let labels: Vec<String> = input.entity_types.iter().map(|t| canonical_label(t)).collect();
        let repository = input.scope.repository.clone();
        let query = input.query.clone();
        let limit = input.limit.unwrap_or(DEFAULT_LIMIT);

        let records = handle
            .with_store(move |store| {
                let filter = if labels.is_empty() {
                    None
                } else {
                    Some(labels.as_slice())
                };
                store.search(&repository, &query, filter, limit)
            })
            .await?;

        Ok(json!({
            "query": input.query,
            "results": records.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
            "count": records.len(),
        }))
    }
}

/// Accept both label casing and the lowercase entity type names the other
/// tools use.
fn canonical_label(entity_type: &str) -> String {
    let mut chars = entity_type.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::fixture;
    use super::*;

    #[tokio::test]
    async fn test_search_with_type_filter() {
        let f = fixture();
        let handle = f
            .ctx
            .acquire_db(f.root.path().to_str().unwrap(), "demo", "main")
            .await
            .unwrap();
        handle
            .with_store(|s| {
                s.upsert_node("demo", "Component", "comp-auth", "Auth service", &json!({}))?;
                s.upsert_node("demo", "Decision", "dec-auth", "Auth via tokens", &json!({}))?;
                Ok(())
            })
            .await
            .unwrap();

        let all = SearchTool
            .execute(&f.ctx, f.args(json!({"query": "auth"})))
            .await
            .unwrap();
        assert_eq!(all["count"], json!(2));

        let only_components = SearchTool
            .execute(
                &f.ctx,
                f.args(json!({"query": "auth", "entityTypes": ["component"]})),
            )
            .await
            .unwrap();
        assert_eq!(only_components["count"], json!(1));
        assert_eq!(only_components["results"][0]["label"], json!("Component"));
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let f = fixture();
        let err = SearchTool
            .execute(&f.ctx, f.args(json!({"query": "  "})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[test]
    fn test_canonical_label() {
        assert_eq!(canonical_label("component"), "Component");
        assert_eq!(canonical_label("Component"), "Component");
        assert_eq!(canonical_label("RULE"), "Rule");
    }
}
