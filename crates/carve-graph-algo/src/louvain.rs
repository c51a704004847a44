use std::collections::BTreeMap;

use crate::graph::{Adjacency, compact};
use crate::{ClusteringParams, Communities, WeightedGraph};

const GAIN_EPSILON: f64 = 1e-12;

/// Multilevel modularity optimization: local moving until no node improves,
/// then aggregate communities into nodes and repeat.
pub fn louvain(graph: &WeightedGraph, params: &ClusteringParams) -> Communities {
    let base = Adjacency::from_graph(graph);
    let mut membership = (0..base.node_count()).collect::<Vec<_>>();
    let mut level = base.clone();

    for _ in 0..params.max_iterations.max(1) {
        let (local, count, moved) = local_moving(&level, params);
        if !moved {
            break;
        }
        for community in &mut membership {
            *community = local[*community];
        }
        level = level.aggregate(&local, count);
    }

    Communities::from_membership(&base, membership, params.resolution)
}

/// One pass of greedy node moves in index order. A node moves only on a
/// strictly positive improvement; ties between target communities go to the
/// lowest community id.
pub(crate) fn local_moving(
    adjacency: &Adjacency,
    params: &ClusteringParams,
) -> (Vec<usize>, usize, bool) {
    let node_count = adjacency.node_count();
    let mut community = (0..node_count).collect::<Vec<_>>();
    let mut totals = adjacency.degrees.clone();
    let mut moved_any = false;

    if adjacency.total_degree <= 0.0 {
        let (compacted, count) = compact(&community);
        return (compacted, count, false);
    }

    for _ in 0..params.max_iterations.max(1) {
        let mut moved = false;
        for node in 0..node_count {
            let degree = adjacency.degrees[node];
            let current = community[node];
            let links = community_links(adjacency, &community, node);

            totals[current] -= degree;
            let gain = |target: usize| {
                links.get(&target).copied().unwrap_or(0.0)
                    - params.resolution * totals[target] * degree / adjacency.total_degree
            };

            let mut best = current;
            let mut best_gain = gain(current);
            for &candidate in links.keys() {
                let candidate_gain = gain(candidate);
                if candidate_gain > best_gain + GAIN_EPSILON {
                    best = candidate;
                    best_gain = candidate_gain;
                }
            }

            totals[best] += degree;
            if best != current {
                community[node] = best;
                moved = true;
                moved_any = true;
            }
        }
        if !moved {
            break;
        }
    }

    let (compacted, count) = compact(&community);
    (compacted, count, moved_any)
}

/// Edge weight from `node` into each neighbouring community, keyed in
/// ascending community order.
pub(crate) fn community_links(
    adjacency: &Adjacency,
    community: &[usize],
    node: usize,
) -> BTreeMap<usize, f64> {
    let mut links = BTreeMap::new();
    for &(other, weight) in &adjacency.neighbors[node] {
        *links.entry(community[other]).or_insert(0.0) += weight;
    }
    links
}

/// Newman modularity with a resolution parameter. Zero for edgeless graphs.
pub fn modularity(graph: &WeightedGraph, membership: &[usize], resolution: f64) -> f64 {
    modularity_of(&Adjacency::from_graph(graph), membership, resolution)
}

pub(crate) fn modularity_of(adjacency: &Adjacency, membership: &[usize], resolution: f64) -> f64 {
    if adjacency.total_degree <= 0.0 || membership.len() != adjacency.node_count() {
        return 0.0;
    }

    let mut internal = BTreeMap::<usize, f64>::new();
    let mut totals = BTreeMap::<usize, f64>::new();
    for node in 0..adjacency.node_count() {
        let community = membership[node];
        *totals.entry(community).or_insert(0.0) += adjacency.degrees[node];
        let entry = internal.entry(community).or_insert(0.0);
        *entry += 2.0 * adjacency.self_loops[node];
        for &(other, weight) in &adjacency.neighbors[node] {
            if membership[other] == community {
                *entry += weight;
            }
        }
    }

    let total = adjacency.total_degree;
    totals
        .iter()
        .map(|(community, degree)| {
            let inside = internal.get(community).copied().unwrap_or(0.0);
            inside / total - resolution * (degree / total).powi(2)
        })
        .sum()
}
