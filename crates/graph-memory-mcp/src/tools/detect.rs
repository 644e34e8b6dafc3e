//! Structure detection: cycles, islands, and connected components.

use serde::Deserialize;
use serde_json::{Value, json};

use super::analyze::{ProjectionInput, load_snapshot, projection_properties};
use super::{MemoryTool, ToolContext, object_schema};
use crate::error::ToolResult;
use crate::graph::components;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectInput {
    #[serde(flatten)]
    projection: ProjectionInput,
    #[serde(rename = "type")]
    detection: Detection,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Detection {
    Cycles,
    Islands,
    StronglyConnected,
    WeaklyConnected,
}

fn components_json(groups: Vec<Vec<String>>) -> Value {
    json!(
        groups
            .into_iter()
            .map(|members| json!({"size": members.len(), "members": members}))
            .collect::<Vec<_>>()
    )
}

async fn run_strongly_connected(
    ctx: &ToolContext,
    projection: &ProjectionInput,
) -> ToolResult<Value> {
    let snapshot = load_snapshot(ctx, projection).await?;
    let groups = components::strongly_connected(&snapshot);
    finish(ctx, format!("{} strongly connected components", groups.len()));
    Ok(json!({
        "type": "strongly-connected",
        "status": "complete",
        "projectedGraphName": projection.projected_graph_name,
        "componentCount": groups.len(),
        "components": components_json(groups),
    }))
}

async fn run_weakly_connected(
    ctx: &ToolContext,
    projection: &ProjectionInput,
) -> ToolResult<Value> {
    let snapshot = load_snapshot(ctx, projection).await?;
    let groups = components::weakly_connected(&snapshot);
    finish(ctx, format!("{} weakly connected components", groups.len()));
    Ok(json!({
        "type": "weakly-connected",
        "status": "complete",
        "projectedGraphName": projection.projected_graph_name,
        "componentCount": groups.len(),
        "components": components_json(groups),
    }))
}

fn finish(ctx: &ToolContext, message: String) {
    ctx.send_progress(json!({
        "status": "complete",
        "message": message,
        "isFinal": true,
    }));
}

/// Umbrella detection tool.
pub struct DetectTool;

#[async_trait::async_trait]
impl MemoryTool for DetectTool {
    fn name(&self) -> &'static str {
        "detect"
    }

    fn description(&self) -> &'static str {
        "Detect graph structure: dependency cycles, isolated islands, or \
         strongly/weakly connected components."
    }

    fn input_schema(&self) -> Value {
        let mut extra = match projection_properties() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        extra.insert(
            "type".to_string(),
            json!({
                "type": "string",
                "enum": ["cycles", "islands", "strongly-connected", "weakly-connected"]
            }),
        );
        object_schema(Value::Object(extra), &["type", "projectedGraphName"])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: DetectInput = serde_json::from_value(input)?;
        match input.detection {
            Detection::Cycles => {
                let snapshot = load_snapshot(ctx, &input.projection).await?;
                let cycles = components::cycles(&snapshot);
                finish(ctx, format!("{} dependency cycles", cycles.len()));
                Ok(json!({
                    "type": "cycles",
                    "status": "complete",
                    "cycleCount": cycles.len(),
                    "cycles": components_json(cycles),
                }))
            }
            Detection::Islands => {
                let snapshot = load_snapshot(ctx, &input.projection).await?;
                let islands = components::islands(&snapshot);
                finish(ctx, format!("{} isolated nodes", islands.len()));
                Ok(json!({
                    "type": "islands",
                    "status": "complete",
                    "islandCount": islands.len(),
                    "islands": islands,
                }))
            }
            Detection::StronglyConnected => run_strongly_connected(ctx, &input.projection).await,
            Detection::WeaklyConnected => run_weakly_connected(ctx, &input.projection).await,
        }
    }
}

/// Standalone strongly-connected-components tool.
pub struct StronglyConnectedComponentsTool;

#[async_trait::async_trait]
impl MemoryTool for StronglyConnectedComponentsTool {
    fn name(&self) -> &'static str {
        "strongly-connected-components"
    }

    fn description(&self) -> &'static str {
        "Compute the strongly connected components of a projected graph."
    }

    fn input_schema(&self) -> Value {
        object_schema(projection_properties(), &["projectedGraphName"])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let projection: ProjectionInput = serde_json::from_value(input)?;
        run_strongly_connected(ctx, &projection).await
    }
}

/// Standalone weakly-connected-components tool.
pub struct WeaklyConnectedComponentsTool;

#[async_trait::async_trait]
impl MemoryTool for WeaklyConnectedComponentsTool {
    fn name(&self) -> &'static str {
        "weakly-connected-components"
    }

    fn description(&self) -> &'static str {
        "Compute the weakly connected components of a projected graph."
    }

    fn input_schema(&self) -> Value {
        object_schema(projection_properties(), &["projectedGraphName"])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let projection: ProjectionInput = serde_json::from_value(input)?;
        run_weakly_connected(ctx, &projection).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Fixture, fixture};
    use super::*;

    async fn seed_cycle(f: &Fixture) {
        let handle = f
            .ctx
            .acquire_db(f.root.path().to_str().unwrap(), "demo", "main")
            .await
            .unwrap();
        handle
            .with_store(|s| {
                for id in ["a", "b", "c", "lone"] {
                    s.upsert_node("demo", "Component", id, id, &json!({}))?;
                }
                s.upsert_edge("demo", "DEPENDS_ON", ("Component", "a"), ("Component", "b"))?;
                s.upsert_edge("demo", "DEPENDS_ON", ("Component", "b"), ("Component", "c"))?;
                s.upsert_edge("demo", "DEPENDS_ON", ("Component", "c"), ("Component", "a"))?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cycle_detection() {
        let f = fixture();
        seed_cycle(&f).await;

        let result = DetectTool
            .execute(
                &f.ctx,
                f.args(json!({"type": "cycles", "projectedGraphName": "g"})),
            )
            .await
            .unwrap();
        assert_eq!(result["cycleCount"], json!(1));
        assert_eq!(result["cycles"][0]["size"], json!(3));
    }

    #[tokio::test]
    async fn test_islands() {
        let f = fixture();
        seed_cycle(&f).await;

        let result = DetectTool
            .execute(
                &f.ctx,
                f.args(json!({"type": "islands", "projectedGraphName": "g"})),
            )
            .await
            .unwrap();
        assert_eq!(result["islands"], json!(["Component:lone"]));
    }

    #[tokio::test]
    async fn test_standalone_component_tools() {
        let mut f = fixture();
        seed_cycle(&f).await;

        let scc = StronglyConnectedComponentsTool
            .execute(&f.ctx, f.args(json!({"projectedGraphName": "g"})))
            .await
            .unwrap();
        assert_eq!(scc["componentCount"], json!(2));

        let wcc = WeaklyConnectedComponentsTool
            .execute(&f.ctx, f.args(json!({"projectedGraphName": "g"})))
            .await
            .unwrap();
        assert_eq!(wcc["componentCount"], json!(2));

        let progress = f.drain_progress();
        assert!(progress.iter().any(|p| p["isFinal"] == json!(true)));
    }
}
