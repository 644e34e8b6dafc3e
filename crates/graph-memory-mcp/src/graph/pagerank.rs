//! PageRank over the directed snapshot.

use super::GraphSnapshot;

/// Damping factor.
const DAMPING: f64 = 0.85;

/// Iteration cap; convergence usually lands well before it.
const MAX_ITERATIONS: usize = 20;

/// L1 convergence threshold.
const TOLERANCE: f64 = 1e-6;

/// Compute PageRank scores. Dangling mass is redistributed uniformly, so
/// scores always sum to ~1. Returns `(id, score)` sorted by descending
/// score, ties broken by id.
#[must_use]
pub fn pagerank(graph: &GraphSnapshot) -> Vec<(String, f64)> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let out = graph.out_adjacency();
    let incoming = graph.in_adjacency();
    let uniform = 1.0 / n as f64;
    let mut ranks = vec![uniform; n];

    for _ in 0..MAX_ITERATIONS {
        let dangling_mass: f64 = (0..n)
            .filter(|&i| out[i].is_empty())
            .map(|i| ranks[i])
            .sum();

        let mut next = vec![(1.0 - DAMPING) * uniform + DAMPING * dangling_mass * uniform; n];
        for (node, next_rank) in next.iter_mut().enumerate() {
            let pushed: f64 = incoming[node]
                .iter()
                .map(|&src| ranks[src] / out[src].len() as f64)
                .sum();
            *next_rank += DAMPING * pushed;
        }

        let delta: f64 = ranks
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).abs())
            .sum();
        ranks = next;
        if delta < TOLERANCE {
            break;
        }
    }

    let mut scored: Vec<(String, f64)> = ranks
        .into_iter()
        .enumerate()
        .map(|(i, score)| (graph.id(i).to_string(), score))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}
