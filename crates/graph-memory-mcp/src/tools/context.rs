//! Working context sessions: one Context node per day, appended to as
//! agents report what they are doing.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::{StoreError, ToolError, ToolResult};

const CONTEXT_LABEL: &str = "Context";
const DEFAULT_LATEST_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    operation: Operation,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    observation: Option<String>,
    #[serde(default)]
    component_ids: Vec<String>,
    #[serde(default)]
    decision_ids: Vec<String>,
    #[serde(default)]
    rule_ids: Vec<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Update,
    Latest,
}

/// Append to and read the daily working context.
pub struct ContextTool;

#[async_trait::async_trait]
impl MemoryTool for ContextTool {
    fn name(&self) -> &'static str {
        "context"
    }

    fn description(&self) -> &'static str {
        "Update today's working context (one node per day, observations \
         append, named components, decisions, and rules are linked to it) \
         or fetch the latest context entries."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "operation": {"type": "string", "enum": ["update", "latest"]},
                "agent": {"type": "string"},
                "summary": {"type": "string"},
                "observation": {"type": "string"},
                "componentIds": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Components this context concerns (CONTEXT_OF)"
                },
                "decisionIds": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Decisions this context concerns (CONTEXT_OF_DECISION)"
                },
                "ruleIds": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Rules this context concerns (CONTEXT_OF_RULE)"
                },
                "limit": {"type": "integer", "description": "Max entries for latest"}
            }),
            &["operation"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: ContextInput = serde_json::from_value(input)?;
        let handle = input.scope.open(ctx).await?;
        let repository = input.scope.repository.clone();

        match input.operation {
            Operation::Update => {
                let has_associations = !input.component_ids.is_empty()
                    || !input.decision_ids.is_empty()
                    || !input.rule_ids.is_empty();
                if input.summary.is_none() && input.observation.is_none() && !has_associations {
                    return Err(ToolError::validation(
                        "summary",
                        "update requires a summary, an observation, or associations",
                    ));
                }
                let id = format!("ctx-{}", chrono::Utc::now().format("%Y-%m-%d"));
                let agent = input.agent;
                let summary = input.summary;
                let observation = input.observation;
                let associations = [
                    ("Component", "CONTEXT_OF", input.component_ids),
                    ("Decision", "CONTEXT_OF_DECISION", input.decision_ids),
                    ("Rule", "CONTEXT_OF_RULE", input.rule_ids),
                ];

                let (record, unresolved) = handle
                    .with_store(move |store| {
                        let existing = store.get_node(&repository, CONTEXT_LABEL, &id)?;
                        let mut properties = existing
                            .as_ref()
                            .and_then(|n| n.properties.as_object().cloned())
                            .unwrap_or_default();

                        if let Some(agent) = agent {
                            properties.insert("agent".to_string(), json!(agent));
                        }
                        let name = summary.clone().unwrap_or_else(|| {
                            existing.as_ref().map_or_else(|| id.clone(), |n| n.name.clone())
                        });
                        if let Some(summary) = summary {
                            properties.insert("summary".to_string(), json!(summary));
                        }
                        if let Some(observation) = observation {
                            let observations = properties
                                .entry("observations".to_string())
                                .or_insert_with(|| json!([]));
                            if let Value::Array(list) = observations {
                                list.push(json!(observation));
                            }
                        }

                        let record = store.upsert_node(
                            &repository,
                            CONTEXT_LABEL,
                            &id,
                            &name,
                            &Value::Object(properties),
                        )?;

                        // Associations to unknown entities are reported, not
                        // fatal.
                        let mut unresolved = Vec::new();
                        for (label, rel_type, targets) in associations {
                            for target in targets {
                                match store.upsert_edge(
                                    &repository,
                                    rel_type,
                                    (CONTEXT_LABEL, &id),
                                    (label, &target),
                                ) {
                                    Ok(()) => {}
                                    Err(StoreError::Rejected(_)) => {
                                        unresolved.push(format!("{label}:{target}"));
                                    }
                                    Err(e) => return Err(e),
                                }
                            }
                        }
                        Ok((record, unresolved))
                    })
                    .await?;

                let mut body = json!({"success": true, "context": record.to_json()});
                if !unresolved.is_empty() {
                    body["unresolvedAssociations"] = json!(unresolved);
                }
                Ok(body)
            }
            Operation::Latest => {
                let limit = input.limit.unwrap_or(DEFAULT_LATEST_LIMIT);
                let records = handle
                    .with_store(move |store| store.list_nodes(&repository, CONTEXT_LABEL, limit))
                    .await?;
                let contexts: Vec<Value> = records.iter().map(|r| r.to_json()).collect();
                Ok(json!({"contexts": contexts, "count": contexts.len()}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::fixture;
    use super::*;
    use crate::db::store::Direction;

    #[tokio::test]
    async fn test_update_appends_observations() {
        let f = fixture();
        let tool = ContextTool;

        tool.execute(
            &f.ctx,
            f.args(json!({
                "operation": "update",
                "agent": "planner",
                "summary": "refactoring the session layer",
                "observation": "registry lookups were racy"
            })),
        )
        .await
        .unwrap();

        let updated = tool
            .execute(
                &f.ctx,
                f.args(json!({
                    "operation": "update",
                    "observation": "sweep now owns eviction"
                })),
            )
            .await
            .unwrap();

        let observations = updated["context"]["properties"]["observations"]
            .as_array()
            .unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(
            updated["context"]["properties"]["summary"],
            json!("refactoring the session layer")
        );

        // Same day, same node.
        let latest = tool
            .execute(&f.ctx, f.args(json!({"operation": "latest"})))
            .await
            .unwrap();
        assert_eq!(latest["count"], json!(1));
    }

    #[tokio::test]
    async fn test_update_links_named_entities() {
        let f = fixture();
        let handle = f
            .ctx
            .acquire_db(f.root.path().to_str().unwrap(), "demo", "main")
            .await
            .unwrap();
        handle
            .with_store(|s| {
                s.upsert_node("demo", "Component", "comp-db", "DB", &json!({}))?;
                s.upsert_node("demo", "Decision", "dec-1", "Adopt graph memory", &json!({}))?;
                Ok(())
            })
            .await
            .unwrap();

        let updated = ContextTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "operation": "update",
                    "summary": "migrating storage",
                    "componentIds": ["comp-db", "comp-ghost"],
                    "decisionIds": ["dec-1"]
                })),
            )
            .await
            .unwrap();
        assert_eq!(
            updated["unresolvedAssociations"],
            json!(["Component:comp-ghost"])
        );

        let contexts = handle
            .with_store(|s| {
                s.neighbors("demo", "Component", "comp-db", Some("CONTEXT_OF"), Direction::Incoming)
            })
            .await
            .unwrap();
        assert_eq!(contexts.len(), 1);

        let decision_contexts = handle
            .with_store(|s| {
                s.neighbors(
                    "demo",
                    "Decision",
                    "dec-1",
                    Some("CONTEXT_OF_DECISION"),
                    Direction::Incoming,
                )
            })
            .await
            .unwrap();
        assert_eq!(decision_contexts.len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_content() {
        let f = fixture();
        let err = ContextTool
            .execute(&f.ctx, f.args(json!({"operation": "update"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_latest_empty_bank() {
        let f = fixture();
        let latest = ContextTool
            .execute(&f.ctx, f.args(json!({"operation": "latest", "limit": 5})))
            .await
            .unwrap();
        assert_eq!(latest["count"], json!(0));
    }
}
