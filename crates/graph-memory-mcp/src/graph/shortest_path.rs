//! Unweighted shortest path by breadth-first search.

use std::collections::VecDeque;

use super::GraphSnapshot;

/// Shortest directed path from `start` to `goal`, inclusive of both ends.
/// `None` when either endpoint is unknown or no path exists.
#[must_use]
pub fn shortest_path(graph: &GraphSnapshot, start: &str, goal: &str) -> Option<Vec<String>> {
    let start_index = graph.index_of(start)?;
    let goal_index = graph.index_of(goal)?;
    if start_index == goal_index {
        return Some(vec![start.to_string()]);
    }

    let adj = graph.out_adjacency();
    let mut predecessor = vec![usize::MAX; graph.node_count()];
    let mut queue = VecDeque::from([start_index]);
    predecessor[start_index] = start_index;

    while let Some(v) = queue.pop_front() {
        for &w in &adj[v] {
            if predecessor[w] != usize::MAX {
                continue;
            }
            predecessor[w] = v;
            if w == goal_index {
                let mut path = vec![goal_index];
                let mut cursor = goal_index;
                while cursor != start_index {
                    cursor = predecessor[cursor];
                    path.push(cursor);
                }
                path.reverse();
                return Some(path.into_iter().map(|i| graph.id(i).to_string()).collect());
            }
            queue.push_back(w);
        }
    }
    None
}
