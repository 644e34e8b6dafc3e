//! Community detection: single-level Louvain modularity optimization.
//!
//! Deterministic node order, undirected projection, unit edge weights.
//! One level is enough for the memory-bank graphs this server manages;
//! the community ids in the result are renumbered densely.

use std::collections::HashMap;

use super::GraphSnapshot;

/// Assign a community to every node. Returns `(id, community)` in node
/// order; community ids are dense and stable for a given snapshot.
#[must_use]
pub fn communities(graph: &GraphSnapshot) -> Vec<(String, usize)> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let adj = graph.undirected_adjacency();
    let degree: Vec<f64> = adj.iter().map(|neighbors| neighbors.len() as f64).collect();
    let two_m: f64 = degree.iter().sum();
    let mut community: Vec<usize> = (0..n).collect();

    if two_m == 0.0 {
        return finalize(graph, &community);
    }

    // Total degree per community, maintained incrementally.
    let mut community_degree = degree.clone();

    let mut improved = true;
    let mut rounds = 0;
    while improved && rounds < 10 {
        improved = false;
        rounds += 1;

        for v in 0..n {
            let current = community[v];

            // Links from v into each neighboring community.
            let mut links: HashMap<usize, f64> = HashMap::new();
            for &w in &adj[v] {
                *links.entry(community[w]).or_insert(0.0) += 1.0;
            }

            // Remove v from its community for the gain computation.
            community_degree[current] -= degree[v];
            let own_links = links.get(&current).copied().unwrap_or(0.0);

            let mut best = current;
            let mut best_gain = own_links - community_degree[current] * degree[v] / two_m;
            let mut candidates: Vec<usize> = links.keys().copied().collect();
            candidates.sort_unstable();
            for target in candidates {
                if target == current {
                    continue;
                }
                let gain = links[&target] - community_degree[target] * degree[v] / two_m;
                if gain > best_gain + 1e-12 {
                    best_gain = gain;
                    best = target;
                }
            }

            community_degree[best] += degree[v];
            if best != current {
                community[v] = best;
                improved = true;
            }
        }
    }

    finalize(graph, &community)
}

fn finalize(graph: &GraphSnapshot, community: &[usize]) -> Vec<(String, usize)> {
    let mut dense: HashMap<usize, usize> = HashMap::new();
    let mut result = Vec::with_capacity(community.len());
    for (v, &c) in community.iter().enumerate() {
        let next = dense.len();
        let id = *dense.entry(c).or_insert(next);
        result.push((graph.id(v).to_string(), id));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::snapshot_from;

    #[test]
    fn test_empty_graph() {
        assert!(communities(&snapshot_from(&[], &[])).is_empty());
    }

    #[test]
    fn test_two_cliques_bridge() {
        // Two triangles joined by a single bridge edge.
        let g = snapshot_from(
            &["a1", "a2", "a3", "b1", "b2", "b3"],
            &[
                ("a1", "a2"),
                ("a2", "a3"),
                ("a3", "a1"),
                ("b1", "b2"),
                ("b2", "b3"),
                ("b3", "b1"),
                ("a1", "b1"),
            ],
        );
        let assignment: HashMap<String, usize> = communities(&g).into_iter().collect();

        assert_eq!(assignment["a1"], assignment["a2"]);
        assert_eq!(assignment["a2"], assignment["a3"]);
        assert_eq!(assignment["b1"], assignment["b2"]);
        assert_eq!(assignment["b2"], assignment["b3"]);
        assert_ne!(assignment["a1"], assignment["b1"]);
    }

    #[test]
    fn test_isolated_nodes_keep_own_community() {
        let g = snapshot_from(&["a", "b", "c"], &[]);
        let assignment = communities(&g);
        let ids: std::collections::HashSet<usize> =
            assignment.iter().map(|(_, c)| *c).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_deterministic() {
        let g = snapshot_from(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "a")],
        );
        assert_eq!(communities(&g), communities(&g));
    }
}
