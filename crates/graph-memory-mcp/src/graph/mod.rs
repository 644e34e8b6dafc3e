//! Graph algorithms over store snapshots.
//!
//! The store materializes a [`GraphSnapshot`] (node ids plus directed
//! edges); the algorithm modules are pure functions over it, so they are
//! testable without a database and safe to run on the async runtime in
//! bounded steps.

pub mod components;
pub mod kcore;
pub mod louvain;
pub mod pagerank;
pub mod shortest_path;

use std::collections::HashMap;

/// An immutable adjacency snapshot.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// Directed edges as index pairs.
    edges: Vec<(usize, usize)>,
}

impl GraphSnapshot {
    /// Build a snapshot from node ids and edges named by id. Edges naming
    /// unknown endpoints are skipped.
    #[must_use]
    pub fn new(nodes: Vec<String>, edge_ids: &[(String, String)]) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let edges = edge_ids
            .iter()
            .filter_map(|(from, to)| Some((*index.get(from)?, *index.get(to)?)))
            .collect();
        Self {
            nodes,
            index,
            edges,
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node id for an index.
    #[must_use]
    pub fn id(&self, index: usize) -> &str {
        &self.nodes[index]
    }

    /// All node ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.nodes
    }

    /// Index for a node id.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Directed out-neighbor lists.
    #[must_use]
    pub fn out_adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for &(from, to) in &self.edges {
            adj[from].push(to);
        }
        adj
    }

    /// Directed in-neighbor lists.
    #[must_use]
    pub fn in_adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for &(from, to) in &self.edges {
            adj[to].push(from);
        }
        adj
    }

    /// Undirected neighbor lists with duplicate edges collapsed and self
    /// loops removed.
    #[must_use]
    pub fn undirected_adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for &(from, to) in &self.edges {
            if from == to {
                continue;
            }
            if !adj[from].contains(&to) {
                adj[from].push(to);
            }
            if !adj[to].contains(&from) {
                adj[to].push(from);
            }
        }
        adj
    }
}

#[cfg(test)]
pub(crate) fn snapshot_from(nodes: &[&str], edges: &[(&str, &str)]) -> GraphSnapshot {
    GraphSnapshot::new(
        nodes.iter().map(ToString::to_string).collect(),
        &edges
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect::<Vec<_>>(),
    )
}
