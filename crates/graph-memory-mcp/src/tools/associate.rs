//! Relationship creation between existing entities.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::{ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociateInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    #[serde(rename = "type")]
    association: Association,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    component_id: Option<String>,
    #[serde(default)]
    decision_id: Option<String>,
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    item_label: Option<String>,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    tag_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Association {
    FileComponent,
    TagItem,
    DecisionComponent,
    RuleComponent,
}

/// Associate entities: files, tags, decisions, and rules onto the graph.
pub struct AssociateTool;

#[async_trait::async_trait]
impl MemoryTool for AssociateTool {
    fn name(&self) -> &'static str {
        "associate"
    }

    fn description(&self) -> &'static str {
        "Create a relationship: a File implementing a Component \
         (file-component), any item carrying a Tag (tag-item), a Decision \
         recorded against a Component (decision-component), or a Rule \
         governing a Component (rule-component)."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "type": {
                    "type": "string",
                    "enum": [
                        "file-component", "tag-item", "decision-component",
                        "rule-component"
                    ]
                },
                "fileId": {"type": "string"},
                "componentId": {"type": "string"},
                "decisionId": {"type": "string"},
                "ruleId": {"type": "string"},
                "itemLabel": {"type": "string"},
                "itemId": {"type": "string"},
                "tagId": {"type": "string"}
            }),
            &["type"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: AssociateInput = serde_json::from_value(input)?;
        let handle = input.scope.open(ctx).await?;
        let repository = input.scope.repository.clone();

        let (rel_type, from, to) = match input.association {
            Association::FileComponent => {
                let file = require(input.file_id, "fileId")?;
                let component = require(input.component_id, "componentId")?;
                ("IMPLEMENTS", ("File".to_string(), file), ("Component".to_string(), component))
            }
            Association::TagItem => {
                let label = require(input.item_label, "itemLabel")?;
                let item = require(input.item_id, "itemId")?;
                let tag = require(input.tag_id, "tagId")?;
                ("TAGGED_WITH", (label, item), ("Tag".to_string(), tag))
            }
            Association::DecisionComponent => {
                let decision = require(input.decision_id, "decisionId")?;
                let component = require(input.component_id, "componentId")?;
                (
                    "DECISION_ON",
                    ("Decision".to_string(), decision),
                    ("Component".to_string(), component),
                )
            }
            Association::RuleComponent => {
                let rule = require(input.rule_id, "ruleId")?;
                let component = require(input.component_id, "componentId")?;
                (
                    "GOVERNS",
                    ("Rule".to_string(), rule),
                    ("Component".to_string(), component),
                )
            }
        };

        let edge = json!({
            "type": rel_type,
            "from": {"label": from.0.clone(), "id": from.1.clone()},
            "to": {"label": to.0.clone(), "id": to.1.clone()},
        });
        handle
            .with_store(move |store| {
                store.upsert_edge(
                    &repository,
                    rel_type,
                    (&from.0, &from.1),
                    (&to.0, &to.1),
                )
            })
            .await?;

        Ok(json!({"success": true, "relationship": edge}))
    }
}

fn require(value: Option<String>, field: &str) -> ToolResult<String> {
    value.ok_or_else(|| ToolError::validation(field, "required for this association type"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::fixture;
    use super::*;
    use crate::db::store::Direction;

    #[tokio::test]
    async fn test_file_component_association() {
        let f = fixture();
        let handle = f
            .ctx
            .acquire_db(f.root.path().to_str().unwrap(), "demo", "main")
            .await
            .unwrap();
        handle
            .with_store(|s| {
                s.upsert_node("demo", "File", "src/session.rs", "session.rs", &json!({}))?;
                s.upsert_node("demo", "Component", "comp-session", "Sessions", &json!({}))?;
                Ok(())
            })
            .await
            .unwrap();

        let result = AssociateTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "type": "file-component",
                    "fileId": "src/session.rs",
                    "componentId": "comp-session"
                })),
            )
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["relationship"]["type"], json!("IMPLEMENTS"));

        let implementors = handle
            .with_store(|s| {
                s.neighbors(
                    "demo",
                    "Component",
                    "comp-session",
                    Some("IMPLEMENTS"),
                    Direction::Incoming,
                )
            })
            .await
            .unwrap();
        assert_eq!(implementors[0].id, "src/session.rs");
    }

    #[tokio::test]
    async fn test_rule_and_decision_associations() {
        let f = fixture();
        let handle = f
            .ctx
            .acquire_db(f.root.path().to_str().unwrap(), "demo", "main")
            .await
            .unwrap();
        handle
            .with_store(|s| {
                s.upsert_node("demo", "Component", "comp-core", "Core", &json!({}))?;
                s.upsert_node("demo", "Rule", "rule-1", "No cycles", &json!({}))?;
                s.upsert_node("demo", "Decision", "dec-1", "Adopt graph memory", &json!({}))?;
                Ok(())
            })
            .await
            .unwrap();

        let governs = AssociateTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "type": "rule-component",
                    "ruleId": "rule-1",
                    "componentId": "comp-core"
                })),
            )
            .await
            .unwrap();
        assert_eq!(governs["relationship"]["type"], json!("GOVERNS"));

        let decided = AssociateTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "type": "decision-component",
                    "decisionId": "dec-1",
                    "componentId": "comp-core"
                })),
            )
            .await
            .unwrap();
        assert_eq!(decided["relationship"]["type"], json!("DECISION_ON"));

        let rules = handle
            .with_store(|s| {
                s.neighbors("demo", "Component", "comp-core", Some("GOVERNS"), Direction::Incoming)
            })
            .await
            .unwrap();
        assert_eq!(rules[0].id, "rule-1");
    }

    #[tokio::test]
    async fn test_tag_item_requires_fields() {
        let f = fixture();
        let err = AssociateTool
            .execute(
                &f.ctx,
                f.args(json!({"type": "tag-item", "itemLabel": "Component"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_rejected() {
        let f = fixture();
        let err = AssociateTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "type": "file-component",
                    "fileId": "ghost.rs",
                    "componentId": "nope"
                })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Store(_)));
    }
}
