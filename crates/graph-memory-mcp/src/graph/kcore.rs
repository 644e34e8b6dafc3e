//! k-core decomposition by iterative peeling.

use super::GraphSnapshot;

/// Core number per node over the undirected projection. Returns `(id,
/// core)` in node order.
#[must_use]
pub fn core_numbers(graph: &GraphSnapshot) -> Vec<(String, usize)> {
    let n = graph.node_count();
    let adj = graph.undirected_adjacency();
    let mut degree: Vec<usize> = adj.iter().map(Vec::len).collect();
    let mut core = vec![0usize; n];
    let mut removed = vec![false; n];
    let mut current_core = 0usize;

    for _ in 0..n {
        // Peel the lowest-degree remaining node; its degree at removal,
        // made monotone over the peel order, is its core number.
        let Some(node) = (0..n)
            .filter(|&i| !removed[i])
            .min_by_key(|&i| (degree[i], i))
        else {
            break;
        };
        removed[node] = true;
        current_core = current_core.max(degree[node]);
        core[node] = current_core;
        for &neighbor in &adj[node] {
            if !removed[neighbor] {
                degree[neighbor] = degree[neighbor].saturating_sub(1);
            }
        }
    }

    (0..n).map(|i| (graph.id(i).to_string(), core[i])).collect()
}

/// Nodes whose core number is at least `k`.
#[must_use]
pub fn k_core(graph: &GraphSnapshot, k: usize) -> Vec<String> {
    core_numbers(graph)
        .into_iter()
        .filter(|(_, core)| *core >= k)
        .map(|(id, _)| id)
        .collect()
}
