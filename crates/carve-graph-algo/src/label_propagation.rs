use std::collections::BTreeMap;

use crate::graph::{Adjacency, compact};
use crate::{ClusteringParams, Communities, WeightedGraph};

/// Weighted label propagation with asynchronous updates in node index order.
///
/// Every node adopts the label carrying the most edge weight among its
/// neighbours; ties go to the lowest label. The fixed order and tie-break make
/// repeated runs on the same graph agree, but the result still depends on node
/// numbering and may differ from other label propagation implementations.
pub fn label_propagation(graph: &WeightedGraph, params: &ClusteringParams) -> Communities {
    let adjacency = Adjacency::from_graph(graph);
    let mut labels = (0..adjacency.node_count()).collect::<Vec<_>>();

    for _ in 0..params.max_iterations.max(1) {
        let mut changed = false;
        for node in 0..adjacency.node_count() {
            if adjacency.neighbors[node].is_empty() {
                continue;
            }

            let mut weights = BTreeMap::<usize, f64>::new();
            for &(other, weight) in &adjacency.neighbors[node] {
                *weights.entry(labels[other]).or_insert(0.0) += weight;
            }

            let mut best = labels[node];
            let mut best_weight = f64::NEG_INFINITY;
            for (&label, &weight) in &weights {
                if weight > best_weight + 1e-12 {
                    best = label;
                    best_weight = weight;
                }
            }

            if best != labels[node] {
                labels[node] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let (membership, _) = compact(&labels);
    Communities::from_membership(&adjacency, membership, params.resolution)
}
