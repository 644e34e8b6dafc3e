//! Read-side graph queries.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::db::store::Direction;
use crate::error::{ToolError, ToolResult};

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    #[serde(rename = "type")]
    query_type: QueryType,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    relationship_type: Option<String>,
    #[serde(default)]
    direction: Option<DependencyDirection>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum QueryType {
    Context,
    Entities,
    Relationships,
    Dependencies,
    Governance,
    History,
    Tags,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DependencyDirection {
    Dependencies,
    Dependents,
}

/// Read-side queries over the memory bank graph.
pub struct QueryTool;

#[async_trait::async_trait]
impl MemoryTool for QueryTool {
    fn name(&self) -> &'static str {
        "query"
    }

    fn description(&self) -> &'static str {
        "Query the graph: latest contexts, entities of a label, \
         relationships, component dependencies or dependents, governing \
         rules, a component's history, or tagged items."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "type": {
                    "type": "string",
                    "enum": [
                        "context", "entities", "relationships", "dependencies",
                        "governance", "history", "tags"
                    ]
                },
                "label": {"type": "string", "description": "Node label for entities"},
                "id": {"type": "string", "description": "Target node id"},
                "relationshipType": {"type": "string"},
                "direction": {
                    "type": "string",
                    "enum": ["dependencies", "dependents"],
                    "description": "Walk direction for dependencies"
                },
                "limit": {"type": "integer"}
            }),
            &["type"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: QueryInput = serde_json::from_value(input)?;
        let handle = input.scope.open(ctx).await?;
        let repository = input.scope.repository.clone();
        let limit = input.limit.unwrap_or(DEFAULT_LIMIT);

        match input.query_type {
            QueryType::Context => {
                let records = handle
                    .with_store(move |store| store.list_nodes(&repository, "Context", limit))
                    .await?;
                Ok(json!({
                    "contexts": records.iter().map(|r| r.to_json()).collect::<Vec<_>>()
                }))
            }
            QueryType::Entities => {
                let label = require(input.label, "label")?;
                let records = handle
                    .with_store(move |store| store.list_nodes(&repository, &label, limit))
                    .await?;
                Ok(json!({
                    "entities": records.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
                    "count": records.len(),
                }))
            }
            QueryType::Relationships => {
                let rel_type = input.relationship_type;
                let edges = handle
                    .with_store(move |store| store.edges(&repository, rel_type.as_deref()))
                    .await?;
                Ok(json!({
                    "relationships": edges.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
                    "count": edges.len(),
                }))
            }
            QueryType::Dependencies => {
                let id = require(input.id, "id")?;
                let direction = match input.direction.unwrap_or(DependencyDirection::Dependencies) {
                    DependencyDirection::Dependencies => Direction::Outgoing,
                    DependencyDirection::Dependents => Direction::Incoming,
                };
                let records = handle
                    .with_store(move |store| {
                        store.neighbors(
                            &repository,
                            "Component",
                            &id,
                            Some("DEPENDS_ON"),
                            direction,
                        )
                    })
                    .await?;
                Ok(json!({
                    "components": records.iter().map(|r| r.to_json()).collect::<Vec<_>>()
                }))
            }
            QueryType::Governance => {
                let id = require(input.id, "id")?;
                let records = handle
                    .with_store(move |store| {
                        store.neighbors(
                            &repository,
                            "Component",
                            &id,
                            Some("GOVERNS"),
                            Direction::Incoming,
                        )
                    })
                    .await?;
                Ok(json!({
                    "rules": records.iter().map(|r| r.to_json()).collect::<Vec<_>>()
                }))
            }
            QueryType::History => {
                let id = require(input.id, "id")?;
                let (contexts, decisions) = handle
                    .with_store(move |store| {
                        let contexts = store.neighbors(
                            &repository,
                            "Component",
                            &id,
                            Some("CONTEXT_OF"),
                            Direction::Incoming,
                        )?;
                        let decisions = store.neighbors(
                            &repository,
                            "Component",
                            &id,
                            Some("DECISION_ON"),
                            Direction::Incoming,
                        )?;
                        Ok((contexts, decisions))
                    })
                    .await?;
                Ok(json!({
                    "contexts": contexts.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
                    "decisions": decisions.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
                }))
            }
            QueryType::Tags => match input.id {
                Some(id) => {
                    let records = handle
                        .with_store(move |store| {
                            store.neighbors(
                                &repository,
                                "Tag",
                                &id,
                                Some("TAGGED_WITH"),
                                Direction::Incoming,
                            )
                        })
                        .await?;
                    Ok(json!({
                        "items": records.iter().map(|r| r.to_json()).collect::<Vec<_>>()
                    }))
                }
                None => {
                    let records = handle
                        .with_store(move |store| store.list_nodes(&repository, "Tag", limit))
                        .await?;
                    Ok(json!({
                        "tags": records.iter().map(|r| r.to_json()).collect::<Vec<_>>()
                    }))
                }
            },
        }
    }
}

fn require(value: Option<String>, field: &str) -> ToolResult<String> {
    value.ok_or_else(|| ToolError::validation(field, "required for this query type"))
}
