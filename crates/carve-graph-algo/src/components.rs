use std::collections::VecDeque;

use petgraph::unionfind::UnionFind;

use crate::WeightedGraph;
use crate::graph::{Adjacency, compact};

/// Component label per node, numbered by first appearance.
pub fn connected_components(graph: &WeightedGraph) -> Vec<usize> {
    let mut sets = UnionFind::<usize>::new(graph.node_count());
    for (left, right, _) in graph.edge_list() {
        sets.union(left, right);
    }
    let roots = (0..graph.node_count())
        .map(|node| sets.find(node))
        .collect::<Vec<_>>();
    compact(&roots).0
}

/// Splits every community into its connected pieces, walking only edges whose
/// endpoints share the community.
pub(crate) fn split_disconnected(adjacency: &Adjacency, membership: &[usize]) -> Vec<usize> {
    let node_count = adjacency.node_count();
    let mut labels = vec![usize::MAX; node_count];
    let mut next = 0;

    for start in 0..node_count {
        if labels[start] != usize::MAX {
            continue;
        }
        labels[start] = next;
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &(other, _) in &adjacency.neighbors[node] {
                if labels[other] == usize::MAX && membership[other] == membership[node] {
                    labels[other] = next;
                    queue.push_back(other);
                }
            }
        }
        next += 1;
    }

    labels
}
