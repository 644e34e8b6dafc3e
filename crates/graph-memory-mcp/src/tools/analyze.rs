//! Graph algorithm tools: PageRank, k-core, Louvain, shortest path.
//!
//! Exposed twice, matching the catalog: through the umbrella `analyze`
//! tool and as individually named tools. All of them stream progress
//! while the projection loads and the algorithm runs.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{MemoryTool, ScopeArgs, ToolContext, object_schema};
use crate::error::{ToolError, ToolResult};
use crate::graph::{GraphSnapshot, kcore, louvain, pagerank, shortest_path};

const DEFAULT_K: usize = 2;

/// Arguments shared by every projected-graph algorithm.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectionInput {
    #[serde(flatten)]
    pub scope: ScopeArgs,
    pub projected_graph_name: String,
    #[serde(default)]
    pub node_table_names: Vec<String>,
    #[serde(default)]
    pub relationship_table_names: Vec<String>,
}

/// Schema fragment for the shared projection properties.
pub(crate) fn projection_properties() -> Value {
    json!({
        "projectedGraphName": {
            "type": "string",
            "description": "Name for the in-memory projection"
        },
        "nodeTableNames": {
            "type": "array",
            "items": {"type": "string"},
            "description": "Node labels included in the projection (empty = all)"
        },
        "relationshipTableNames": {
            "type": "array",
            "items": {"type": "string"},
            "description": "Relationship types included (empty = all)"
        }
    })
}

/// Load the adjacency snapshot for a projection, streaming progress.
pub(crate) async fn load_snapshot(
    ctx: &ToolContext,
    projection: &ProjectionInput,
) -> ToolResult<GraphSnapshot> {
    let handle = projection.scope.open(ctx).await?;
    ctx.send_progress(json!({
        "status": "initializing",
        "message": format!("projecting graph {:?}", projection.projected_graph_name),
    }));

    let repository = projection.scope.repository.clone();
    let labels = projection.node_table_names.clone();
    let rel_types = projection.relationship_table_names.clone();
    let (nodes, edges) = handle
        .with_store(move |store| store.load_adjacency(&repository, &labels, &rel_types))
        .await?;
    ctx.ensure_live()?;

    let snapshot = GraphSnapshot::new(nodes, &edges);
    ctx.send_progress(json!({
        "status": "in_progress",
        "message": format!(
            "projected {} nodes and {} relationships",
            snapshot.node_count(),
            snapshot.edge_count()
        ),
        "nodeCount": snapshot.node_count(),
        "relationshipCount": snapshot.edge_count(),
    }));
    Ok(snapshot)
}

fn final_progress(ctx: &ToolContext, message: String) {
    ctx.send_progress(json!({
        "status": "complete",
        "message": message,
        "isFinal": true,
    }));
}

/// Bare ids are accepted when they are unambiguous among the
/// label-qualified snapshot ids.
fn resolve_node(snapshot: &GraphSnapshot, id: &str) -> Option<String> {
    if snapshot.index_of(id).is_some() {
        return Some(id.to_string());
    }
    let suffix = format!(":{id}");
    let mut matches = snapshot.ids().iter().filter(|n| n.ends_with(&suffix));
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first.clone())
}

async fn run_pagerank(ctx: &ToolContext, projection: &ProjectionInput) -> ToolResult<Value> {
    let snapshot = load_snapshot(ctx, projection).await?;
    let scores = pagerank::pagerank(&snapshot);
    final_progress(ctx, format!("ranked {} nodes", scores.len()));
    Ok(json!({
        "type": "pagerank",
        "status": "complete",
        "projectedGraphName": projection.projected_graph_name,
        "nodes": scores
            .into_iter()
            .map(|(id, score)| json!({"id": id, "score": score}))
            .collect::<Vec<_>>(),
    }))
}

async fn run_k_core(
    ctx: &ToolContext,
    projection: &ProjectionInput,
    k: usize,
) -> ToolResult<Value> {
    let snapshot = load_snapshot(ctx, projection).await?;
    let cores = kcore::core_numbers(&snapshot);
    let members = kcore::k_core(&snapshot, k);
    final_progress(ctx, format!("{} nodes in the {k}-core", members.len()));
    Ok(json!({
        "type": "k-core",
        "status": "complete",
        "projectedGraphName": projection.projected_graph_name,
        "k": k,
        "nodes": cores
            .into_iter()
            .map(|(id, core)| json!({"id": id, "core": core}))
            .collect::<Vec<_>>(),
        "members": members,
    }))
}

async fn run_louvain(ctx: &ToolContext, projection: &ProjectionInput) -> ToolResult<Value> {
    let snapshot = load_snapshot(ctx, projection).await?;
    let assignment = louvain::communities(&snapshot);
    let community_count = assignment
        .iter()
        .map(|(_, c)| *c)
        .collect::<std::collections::HashSet<_>>()
        .len();
    final_progress(ctx, format!("found {community_count} communities"));
    Ok(json!({
        "type": "louvain",
        "status": "complete",
        "projectedGraphName": projection.projected_graph_name,
        "communityCount": community_count,
        "nodes": assignment
            .into_iter()
            .map(|(id, community)| json!({"id": id, "community": community}))
            .collect::<Vec<_>>(),
    }))
}

async fn run_shortest_path(
    ctx: &ToolContext,
    projection: &ProjectionInput,
    start: &str,
    goal: &str,
) -> ToolResult<Value> {
    let snapshot = load_snapshot(ctx, projection).await?;
    let start_id = resolve_node(&snapshot, start)
        .ok_or_else(|| ToolError::validation("startNodeId", format!("unknown node {start:?}")))?;
    let goal_id = resolve_node(&snapshot, goal)
        .ok_or_else(|| ToolError::validation("endNodeId", format!("unknown node {goal:?}")))?;

    let path = shortest_path::shortest_path(&snapshot, &start_id, &goal_id);
    final_progress(
        ctx,
        match &path {
            Some(p) => format!("path of length {}", p.len().saturating_sub(1)),
            None => "no path".to_string(),
        },
    );
    Ok(match path {
        Some(path) => json!({
            "type": "shortest-path",
            "status": "complete",
            "found": true,
            "length": path.len() - 1,
            "path": path,
        }),
        None => json!({
            "type": "shortest-path",
            "status": "complete",
            "found": false,
        }),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeInput {
    #[serde(flatten)]
    projection: ProjectionInput,
    #[serde(rename = "type")]
    analysis: Analysis,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    start_node_id: Option<String>,
    #[serde(default)]
    end_node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Analysis {
    Pagerank,
    KCore,
    Louvain,
    ShortestPath,
}

/// Umbrella analysis tool.
pub struct AnalyzeTool;

#[async_trait::async_trait]
impl MemoryTool for AnalyzeTool {
    fn name(&self) -> &'static str {
        "analyze"
    }

    fn description(&self) -> &'static str {
        "Run a graph analysis over a projection: pagerank, k-core, louvain, \
         or shortest-path."
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
                "enum": ["pagerank", "k-core", "louvain", "shortest-path"]
            }),
        );
        extra.insert("k".to_string(), json!({"type": "integer"}));
        extra.insert("startNodeId".to_string(), json!({"type": "string"}));
        extra.insert("endNodeId".to_string(), json!({"type": "string"}));
        object_schema(Value::Object(extra), &["type", "projectedGraphName"])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: AnalyzeInput = serde_json::from_value(input)?;
        match input.analysis {
            Analysis::Pagerank => run_pagerank(ctx, &input.projection).await,
            Analysis::KCore => {
                run_k_core(ctx, &input.projection, input.k.unwrap_or(DEFAULT_K)).await
            }
            Analysis::Louvain => run_louvain(ctx, &input.projection).await,
            Analysis::ShortestPath => {
                let start = input.start_node_id.ok_or_else(|| {
                    ToolError::validation("startNodeId", "required for shortest-path")
                })?;
                let goal = input.end_node_id.ok_or_else(|| {
                    ToolError::validation("endNodeId", "required for shortest-path")
                })?;
                run_shortest_path(ctx, &input.projection, &start, &goal).await
            }
        }
    }
}

/// Standalone PageRank tool.
pub struct PageRankTool;

#[async_trait::async_trait]
impl MemoryTool for PageRankTool {
    fn name(&self) -> &'static str {
        "pagerank"
    }

    fn description(&self) -> &'static str {
        "Compute PageRank scores over a projected graph."
    }

    fn input_schema(&self) -> Value {
        object_schema(projection_properties(), &["projectedGraphName"])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let projection: ProjectionInput = serde_json::from_value(input)?;
        run_pagerank(ctx, &projection).await
    }
}

#[derive(Debug, Deserialize)]
struct KCoreInput {
    #[serde(flatten)]
    projection: ProjectionInput,
    #[serde(default)]
    k: Option<usize>,
}

/// Standalone k-core decomposition tool.
pub struct KCoreDecompositionTool;

#[async_trait::async_trait]
impl MemoryTool for KCoreDecompositionTool {
    fn name(&self) -> &'static str {
        "k-core-decomposition"
    }

    fn description(&self) -> &'static str {
        "Compute core numbers and the members of the k-core of a projected \
         graph."
    }

    fn input_schema(&self) -> Value {
        let mut extra = match projection_properties() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        extra.insert(
            "k".to_string(),
            json!({"type": "integer", "description": "Minimum core (default 2)"}),
        );
        object_schema(Value::Object(extra), &["projectedGraphName"])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: KCoreInput = serde_json::from_value(input)?;
        run_k_core(ctx, &input.projection, input.k.unwrap_or(DEFAULT_K)).await
    }
}

/// Standalone Louvain community detection tool.
pub struct LouvainCommunityDetectionTool;

#[async_trait::async_trait]
impl MemoryTool for LouvainCommunityDetectionTool {
    fn name(&self) -> &'static str {
        "louvain-community-detection"
    }

    fn description(&self) -> &'static str {
        "Detect communities in a projected graph by modularity optimization."
    }

    fn input_schema(&self) -> Value {
        object_schema(projection_properties(), &["projectedGraphName"])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let projection: ProjectionInput = serde_json::from_value(input)?;
        run_louvain(ctx, &projection).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShortestPathInput {
    #[serde(flatten)]
    projection: ProjectionInput,
    start_node_id: String,
    end_node_id: String,
}

/// Standalone shortest path tool.
pub struct ShortestPathTool;

#[async_trait::async_trait]
impl MemoryTool for ShortestPathTool {
    fn name(&self) -> &'static str {
        "shortest-path"
    }

    fn description(&self) -> &'static str {
        "Find the shortest directed path between two nodes of a projected \
         graph."
    }

    fn input_schema(&self) -> Value {
        let mut extra = match projection_properties() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        extra.insert("startNodeId".to_string(), json!({"type": "string"}));
        extra.insert("endNodeId".to_string(), json!({"type": "string"}));
        object_schema(
            Value::Object(extra),
            &["projectedGraphName", "startNodeId", "endNodeId"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<Value> {
        let input: ShortestPathInput = serde_json::from_value(input)?;
        run_shortest_path(
            ctx,
            &input.projection,
            &input.start_node_id,
            &input.end_node_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Fixture, fixture};
    use super::*;

    async fn seed(f: &Fixture) {
        let handle = f
            .ctx
            .acquire_db(f.root.path().to_str().unwrap(), "demo", "main")
            .await
            .unwrap();
        handle
            .with_store(|s| {
                for id in ["comp-api", "comp-auth", "comp-core"] {
                    s.upsert_node("demo", "Component", id, id, &json!({}))?;
                }
                s.upsert_edge("demo", "DEPENDS_ON", ("Component", "comp-api"), ("Component", "comp-core"))?;
                s.upsert_edge("demo", "DEPENDS_ON", ("Component", "comp-auth"), ("Component", "comp-core"))?;
                Ok(())
            })
            .await
            .unwrap();
    }

    fn projection_args(f: &Fixture) -> Value {
        f.args(json!({
            "projectedGraphName": "g",
            "nodeTableNames": ["Component"],
            "relationshipTableNames": ["DEPENDS_ON"],
        }))
    }

    #[tokio::test]
    async fn test_pagerank_streams_and_ranks() {
        let mut f = fixture();
        seed(&f).await;

        let result = PageRankTool
            .execute(&f.ctx, projection_args(&f))
            .await
            .unwrap();
        assert_eq!(result["type"], json!("pagerank"));
        assert_eq!(result["nodes"][0]["id"], json!("Component:comp-core"));

        let progress = f.drain_progress();
        assert!(progress.len() >= 2);
        let last = progress.last().unwrap();
        assert_eq!(last["isFinal"], json!(true));
        for params in &progress {
            assert_eq!(params["progressToken"], json!(1));
        }
    }

    #[tokio::test]
    async fn test_analyze_umbrella_kcore() {
        let f = fixture();
        seed(&f).await;

        let result = AnalyzeTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "type": "k-core",
                    "projectedGraphName": "g",
                    "k": 1,
                })),
            )
            .await
            .unwrap();
        assert_eq!(result["k"], json!(1));
        assert_eq!(result["members"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shortest_path_accepts_bare_ids() {
        let f = fixture();
        seed(&f).await;

        let result = ShortestPathTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "projectedGraphName": "g",
                    "startNodeId": "comp-api",
                    "endNodeId": "comp-core",
                })),
            )
            .await
            .unwrap();
        assert_eq!(result["found"], json!(true));
        assert_eq!(result["length"], json!(1));
    }

    #[tokio::test]
    async fn test_shortest_path_unknown_node() {
        let f = fixture();
        seed(&f).await;

        let err = ShortestPathTool
            .execute(
                &f.ctx,
                f.args(json!({
                    "projectedGraphName": "g",
                    "startNodeId": "ghost",
                    "endNodeId": "comp-core",
                })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_louvain_on_empty_projection() {
        let f = fixture();
        let result = LouvainCommunityDetectionTool
            .execute(&f.ctx, f.args(json!({"projectedGraphName": "g"})))
            .await
            .unwrap();
        assert_eq!(result["communityCount"], json!(0));
    }
}
