//! Connected components: strongly (iterative Tarjan) and weakly
//! (union-find).

use super::GraphSnapshot;

/// Strongly connected components of the directed snapshot. Each component
/// is a sorted list of node ids; components are ordered by their smallest
/// id.
#[must_use]
pub fn strongly_connected(graph: &GraphSnapshot) -> Vec<Vec<String>> {
    let n = graph.node_count();
    let adj = graph.out_adjacency();

    const UNVISITED: usize = usize::MAX;
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components: Vec<Vec<String>> = Vec::new();

    // Explicit DFS frames keep deep dependency chains off the call stack.
    enum Frame {
        Enter(usize),
        Resume(usize, usize),
    }

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }
        let mut frames = vec![Frame::Enter(start)];
        while let Some(frame) = frames.pop() {
            match frame {
                Frame::Enter(v) => {
                    index[v] = next_index;
                    lowlink[v] = next_index;
                    next_index += 1;
                    stack.push(v);
                    on_stack[v] = true;
                    frames.push(Frame::Resume(v, 0));
                }
                Frame::Resume(v, child) => {
                    if let Some(&w) = adj[v].get(child) {
                        frames.push(Frame::Resume(v, child + 1));
                        if index[w] == UNVISITED {
                            frames.push(Frame::Enter(w));
                        } else if on_stack[w] {
                            lowlink[v] = lowlink[v].min(index[w]);
                        }
                        continue;
                    }

                    // All children explored: fold lowlink into the parent
                    // frame and pop the component root.
                    if let Some(Frame::Resume(parent, _)) = frames.last() {
                        lowlink[*parent] = lowlink[*parent].min(lowlink[v]);
                    }
                    if lowlink[v] == index[v] {
                        let mut component = Vec::new();
                        loop {
                            let w = stack.pop().expect("tarjan stack underflow");
                            on_stack[w] = false;
                            component.push(graph.id(w).to_string());
                            if w == v {
                                break;
                            }
                        }
                        component.sort();
                        components.push(component);
                    }
                }
            }
        }
    }

    components.sort_by(|a, b| a[0].cmp(&b[0]));
    components
}

/// Strongly connected components of size greater than one, i.e. dependency
/// cycles.
#[must_use]
pub fn cycles(graph: &GraphSnapshot) -> Vec<Vec<String>> {
    strongly_connected(graph)
        .into_iter()
        .filter(|c| c.len() > 1)
        .collect()
}

/// Weakly connected components via union-find. Same ordering contract as
/// [`strongly_connected`].
#[must_use]
pub fn weakly_connected(graph: &GraphSnapshot) -> Vec<Vec<String>> {
    let n = graph.node_count();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cursor = x;
        while parent[cursor] != root {
            let next = parent[cursor];
            parent[cursor] = root;
            cursor = next;
        }
        root
    }

    for &(from, to) in &graph_edges(graph) {
        let a = find(&mut parent, from);
        let b = find(&mut parent, to);
        if a != b {
            parent[a.max(b)] = a.min(b);
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<String>> = std::collections::HashMap::new();
    for v in 0..n {
        let root = find(&mut parent, v);
        groups.entry(root).or_default().push(graph.id(v).to_string());
    }

    let mut components: Vec<Vec<String>> = groups.into_values().collect();
    for component in &mut components {
        component.sort();
    }
    components.sort_by(|a, b| a[0].cmp(&b[0]));
    components
}

/// Components containing a single node with no edges at all, i.e. isolated
/// islands.
#[must_use]
pub fn islands(graph: &GraphSnapshot) -> Vec<String> {
    let out = graph.out_adjacency();
    let incoming = graph.in_adjacency();
    (0..graph.node_count())
        .filter(|&v| out[v].is_empty() && incoming[v].is_empty())
        .map(|v| graph.id(v).to_string())
        .collect()
}

fn graph_edges(graph: &GraphSnapshot) -> Vec<(usize, usize)> {
    let mut edges = Vec::with_capacity(graph.edge_count());
    for (from, neighbors) in graph.out_adjacency().into_iter().enumerate() {
        for to in neighbors {
            edges.push((from, to));
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::snapshot_from;

    #[test]
    fn test_scc_finds_cycle() {
        let g = snapshot_from(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")],
        );
        let components = strongly_connected(&g);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec!["a", "b", "c"]);
        assert_eq!(components[1], vec!["d"]);

        assert_eq!(cycles(&g), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_scc_on_dag_is_singletons() {
        let g = snapshot_from(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        assert_eq!(strongly_connected(&g).len(), 3);
        assert!(cycles(&g).is_empty());
    }

    #[test]
    fn test_scc_two_cycles() {
        let g = snapshot_from(
            &["a", "b", "x", "y"],
            &[("a", "b"), ("b", "a"), ("x", "y"), ("y", "x")],
        );
        let components = cycles(&g);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec!["a", "b"]);
        assert_eq!(components[1], vec!["x", "y"]);
    }

    #[test]
    fn test_scc_deep_chain_no_overflow() {
        let ids: Vec<String> = (0..5000).map(|i| format!("n{i:05}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let edges: Vec<(&str, &str)> = refs.windows(2).map(|w| (w[0], w[1])).collect();
        let g = snapshot_from(&refs, &edges);
        assert_eq!(strongly_connected(&g).len(), 5000);
    }

    #[test]
    fn test_wcc_ignores_direction() {
        let g = snapshot_from(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("c", "b"), ("d", "e")],
        );
        let components = weakly_connected(&g);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec!["a", "b", "c"]);
        assert_eq!(components[1], vec!["d", "e"]);
    }

    #[test]
    fn test_islands() {
        let g = snapshot_from(&["a", "b", "lone"], &[("a", "b")]);
        assert_eq!(islands(&g), vec!["lone"]);
    }
}
