//! Entity CRUD: components, decisions, rules, files, and tags.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::{ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    operation: Operation,
    entity_type: EntityType,
    id: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Create,
    Get,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EntityType {
    Component,
    Decision,
    Rule,
    File,
    Tag,
}

impl EntityType {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Component => "Component",
            Self::Decision => "Decision",
            Self::Rule => "Rule",
            Self::File => "File",
            Self::Tag => "Tag",
        }
    }
}

/// Split a data payload into the node name and its property bag. `name`
/// travels as a column, everything else stays in the bag.
pub(crate) fn split_data(id: &str, data: Option<Value>) -> (String, Value) {
    let mut properties = match data {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let name = properties
        .remove("name")
        .and_then(|v| v.as_str().map(ToString::to_string))
        .unwrap_or_else(|| id.to_string());
    (name, Value::Object(properties))
}

/// Create, read, update, and delete graph entities.
pub struct EntityTool;

#[async_trait::async_trait]
impl MemoryTool for EntityTool {
    fn name(&self) -> &'static str {
        "entity"
    }

    fn description(&self) -> &'static str {
        "Create, get, update, or delete a Component, Decision, Rule, File, \
         or Tag node. Component dependencies in data.dependsOn are \
         materialized as DEPENDS_ON edges."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "operation": {
                    "type": "string",
                    "enum": ["create", "get", "update", "delete"]
                },
                "entityType": {
                    "type": "string",
                    "enum": ["component", "decision", "rule", "file", "tag"]
                },
                "id": {
                    "type": "string",
                    "description": "Domain id, unique per entity type"
                },
                "data": {
                    "type": "object",
                    "description": "Entity payload; name plus type-specific fields"
                }
            }),
            &["operation", "entityType", "id"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: EntityInput = serde_json::from_value(input)?;
        if input.id.is_empty() {
            return Err(ToolError::validation("id", "must not be empty"));
        }
        let handle = input.scope.open(ctx).await?;
        let repository = input.scope.repository.clone();
        let label = input.entity_type.label();
        let id = input.id.clone();

        match input.operation {
            Operation::Create | Operation::Update => {
                let is_update = matches!(input.operation, Operation::Update);
                let data = input.data.clone();
                let result = handle
                    .with_store(move |store| {
                        let existing = store.get_node(&repository, label, &id)?;
                        if is_update && existing.is_none() {
                            return Ok(None);
                        }

                        // Updates merge into the stored bag; creates start fresh.
                        let (name, properties) = match (&existing, is_update) {
                            (Some(node), true) => {
                                let mut merged = match &node.properties {
                                    Value::Object(map) => map.clone(),
                                    _ => serde_json::Map::new(),
                                };
                                let (name, incoming) = split_data(&id, data);
                                if let Value::Object(incoming) = incoming {
                                    merged.extend(incoming);
                                }
                                (name, Value::Object(merged))
                            }
                            _ => split_data(&id, data),
                        };

                        let depends_on: Vec<String> = properties
                            .get("dependsOn")
                            .and_then(Value::as_array)
                            .map(|deps| {
                                deps.iter()
                                    .filter_map(Value::as_str)
                                    .map(ToString::to_string)
                                    .collect()
                            })
                            .unwrap_or_default();

                        let record = store.upsert_node(&repository, label, &id, &name, &properties)?;

                        let mut missing = Vec::new();
                        for target in &depends_on {
                            match store.upsert_edge(
                                &repository,
                                "DEPENDS_ON",
                                (label, &id),
                                (label, target),
                            ) {
                                Ok(()) => {}
                                Err(crate::error::StoreError::Rejected(_)) => {
                                    missing.push(target.clone());
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        Ok(Some((record, missing)))
                    })
                    .await?;

                match result {
                    Some((record, missing)) => {
                        let mut body = json!({"success": true, "entity": record.to_json()});
                        if !missing.is_empty() {
                            body["unresolvedDependencies"] = json!(missing);
                        }
                        Ok(body)
                    }
                    None => Ok(json!({"success": false, "found": false})),
                }
            }
            Operation::Get => {
                let record = handle
                    .with_store(move |store| store.get_node(&repository, label, &id))
                    .await?;
                Ok(match record {
                    Some(node) => json!({"found": true, "entity": node.to_json()}),
                    None => json!({"found": false}),
                })
            }
            Operation::Delete => {
                let deleted = handle
                    .with_store(move |store| store.delete_node(&repository, label, &id))
                    .await?;
                Ok(json!({"success": deleted}))
            }
        }
    }
}
