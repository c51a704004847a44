use crate::components::split_disconnected;
use crate::graph::{Adjacency, compact};
use crate::louvain::{community_links, local_moving};
use crate::{ClusteringParams, Communities, WeightedGraph};

/// Louvain with a refinement phase. After local moving, each community is
/// rebuilt from singletons that may only merge along edges inside it, and the
/// refined communities are what gets aggregated. A final split guarantees
/// every returned community is connected in the input graph.
pub fn leiden(graph: &WeightedGraph, params: &ClusteringParams) -> Communities {
    let base = Adjacency::from_graph(graph);
    let mut membership = (0..base.node_count()).collect::<Vec<_>>();
    let mut level = base.clone();

    for _ in 0..params.max_iterations.max(1) {
        let (coarse, coarse_count, moved) = local_moving(&level, params);
        if !moved {
            break;
        }

        let (refined, refined_count) = refine(&level, &coarse, params);
        let (collapse, count) = if refined_count < level.node_count() {
            (refined, refined_count)
        } else {
            (coarse, coarse_count)
        };

        for community in &mut membership {
            *community = collapse[*community];
        }
        level = level.aggregate(&collapse, count);
    }

    let membership = split_disconnected(&base, &membership);
    Communities::from_membership(&base, membership, params.resolution)
}

/// Merges singleton nodes into a neighbouring refined community of the same
/// coarse community when that strictly improves modularity. Merges only follow
/// edges, so every refined community is connected.
fn refine(
    adjacency: &Adjacency,
    coarse: &[usize],
    params: &ClusteringParams,
) -> (Vec<usize>, usize) {
    let node_count = adjacency.node_count();
    let mut refined = (0..node_count).collect::<Vec<_>>();
    let mut sizes = vec![1usize; node_count];
    let mut totals = adjacency.degrees.clone();

    if adjacency.total_degree <= 0.0 {
        return compact(&refined);
    }

    for node in 0..node_count {
        let current = refined[node];
        if sizes[current] != 1 {
            continue;
        }

        let degree = adjacency.degrees[node];
        let links = community_links(adjacency, &refined, node);
        let mut best = current;
        let mut best_gain = 0.0;
        for (&candidate, &weight) in &links {
            // Refined labels start as node indices and merges stay inside one
            // coarse community, so the label's founder shares its coarse id.
            if candidate == current || coarse[candidate] != coarse[node] {
                continue;
            }
            let gain = weight
                - params.resolution * totals[candidate] * degree / adjacency.total_degree;
            if gain > best_gain + 1e-12 {
                best = candidate;
                best_gain = gain;
            }
        }

        if best != current {
            refined[node] = best;
            sizes[current] -= 1;
            sizes[best] += 1;
            totals[current] -= degree;
            totals[best] += degree;
        }
    }

    compact(&refined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::connected_components;

    #[test]
    fn leiden_finds_the_two_dense_groups() {
        let graph = WeightedGraph::from_edges(
            6,
            &[
                (0, 1, 3.0),
                (1, 2, 3.0),
                (0, 2, 3.0),
                (3, 4, 3.0),
                (4, 5, 3.0),
                (3, 5, 3.0),
                (2, 3, 1.0),
            ],
        );

        let communities = leiden(&graph, &ClusteringParams::default());
        assert_eq!(communities.membership, vec![0, 0, 0, 1, 1, 1]);
        assert!(communities.modularity > 0.3);
    }

    #[test]
    fn leiden_communities_are_connected() {
        // Two disjoint paths.
        let graph = WeightedGraph::from_edges(
            7,
            &[(0, 1, 1.0), (1, 2, 1.0), (3, 4, 1.0), (4, 5, 1.0), (5, 6, 1.0)],
        );
        let communities = leiden(&graph, &ClusteringParams::default());
        let components = connected_components(&graph);

        for left in 0..graph.node_count() {
            for right in 0..graph.node_count() {
                if communities.membership[left] == communities.membership[right] {
                    assert_eq!(components[left], components[right]);
                }
            }
        }
    }
}
