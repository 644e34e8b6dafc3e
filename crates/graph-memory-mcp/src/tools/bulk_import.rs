//! Bulk ingestion of components, decisions, and rules.

use serde::Deserialize;
use serde_json::{Value, json};

use super::entity::split_data;
use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::{StoreError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkImportInput {
    #[serde(flatten)]
    scope: ScopeArgs,
    #[serde(default)]
    components: Vec<Value>,
    #[serde(default)]
    decisions: Vec<Value>,
    #[serde(default)]
    rules: Vec<Value>,
}

/// Import whole entity sets in one call, streaming per-kind progress.
pub struct BulkImportTool;

#[async_trait::async_trait]
impl MemoryTool for BulkImportTool {
    fn name(&self) -> &'static str {
        "bulk-import"
    }

    fn description(&self) -> &'static str {
        "Import arrays of components, decisions, and rules in one call. \
         Component dependsOn edges are linked after all components exist."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "components": {"type": "array", "items": {"type": "object"}},
                "decisions": {"type": "array", "items": {"type": "object"}},
                "rules": {"type": "array", "items": {"type": "object"}}
            }),
            &[],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: BulkImportInput = serde_json::from_value(input)?;
        let handle = input.scope.open(ctx).await?;

        let total = input.components.len() + input.decisions.len() + input.rules.len();
        ctx.send_progress(json!({
            "status": "initializing",
            "message": format!("importing {total} entities"),
        }));

        let mut imported = serde_json::Map::new();
        let mut failed: Vec<Value> = Vec::new();

        for (label, items) in [
            ("Component", input.components),
            ("Decision", input.decisions),
            ("Rule", input.rules),
        ] {
            if items.is_empty() {
                continue;
            }
            ctx.ensure_live()?;

            let repository = input.scope.repository.clone();
            let batch = items;
            let outcome = handle
                .with_store(move |store| {
                    let mut ok = 0usize;
                    let mut errors: Vec<(String, String)> = Vec::new();
                    let mut pending_edges: Vec<(String, String)> = Vec::new();

                    for item in batch {
                        let Some(id) = item.get("id").and_then(Value::as_str).map(ToString::to_string)
                        else {
                            errors.push(("<missing id>".to_string(), "entity has no id".to_string()));
                            continue;
                        };
                        let mut payload = item.clone();
                        if let Some(map) = payload.as_object_mut() {
                            map.remove("id");
                        }
                        let (name, properties) = split_data(&id, Some(payload));
                        if let Some(deps) = properties.get("dependsOn").and_then(Value::as_array) {
                            for dep in deps.iter().filter_map(Value::as_str) {
                                pending_edges.push((id.clone(), dep.to_string()));
                            }
                        }
                        match store.upsert_node(&repository, label, &id, &name, &properties) {
                            Ok(_) => ok += 1,
                            Err(e) => errors.push((id, e.to_string())),
                        }
                    }

                    // Dependencies resolve only after the whole batch landed.
                    if label == "Component" {
                        for (from, to) in pending_edges {
                            match store.upsert_edge(
                                &repository,
                                "DEPENDS_ON",
                                ("Component", &from),
                                ("Component", &to),
                            ) {
                                Ok(()) | Err(StoreError::Rejected(_)) => {}
                                Err(e) => errors.push((from.clone(), e.to_string())),
                            }
                        }
                    }
                    Ok((ok, errors))
                })
                .await?;

            let (ok, errors) = outcome;
            ctx.send_progress(json!({
                "status": "in_progress",
                "message": format!("{label}: {ok} imported, {} failed", errors.len()),
                "kind": label,
                "imported": ok,
            }));
            imported.insert(label.to_lowercase() + "s", json!(ok));
            failed.extend(
                errors
                    .into_iter()
                    .map(|(id, error)| json!({"kind": label, "id": id, "error": error})),
            );
        }

        ctx.send_progress(json!({
            "status": "complete",
            "message": "import finished",
            "isFinal": true,
        }));

        Ok(json!({
            "success": failed.is_empty(),
            "imported": imported,
            "failed": failed,
        }))
    }
}
