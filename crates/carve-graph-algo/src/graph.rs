use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

/// Undirected weighted projection the clustering algorithms run on.
///
/// Nodes are dense indices `0..node_count`; callers keep the mapping back to
/// their own identifiers.
#[derive(Debug, Clone)]
pub struct WeightedGraph {
    graph: UnGraph<(), f64>,
}

impl WeightedGraph {
    /// Edges with an endpoint out of range, a self loop, or a weight that is
    /// not a positive finite number are ignored.
    pub fn from_edges(node_count: usize, edges: &[(usize, usize, f64)]) -> Self {
        let mut graph = UnGraph::with_capacity(node_count, edges.len());
        for _ in 0..node_count {
            graph.add_node(());
        }
        for &(left, right, weight) in edges {
            if left >= node_count || right >= node_count || left == right {
                continue;
            }
            if !(weight.is_finite() && weight > 0.0) {
                continue;
            }
            graph.add_edge(NodeIndex::new(left), NodeIndex::new(right), weight);
        }

        Self { graph }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_isolated(&self, node: usize) -> bool {
        self.graph
            .neighbors(NodeIndex::new(node))
            .next()
            .is_none()
    }

    pub fn total_weight(&self) -> f64 {
        self.graph.edge_references().map(|edge| *edge.weight()).sum()
    }

    pub(crate) fn edge_list(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.graph
            .edge_references()
            .map(|edge| (edge.source().index(), edge.target().index(), *edge.weight()))
    }
}

/// Adjacency with self loops, used while communities are aggregated level by
/// level. Each non-loop edge is stored in both directions.
#[derive(Debug, Clone)]
pub(crate) struct Adjacency {
    pub neighbors: Vec<Vec<(usize, f64)>>,
    pub self_loops: Vec<f64>,
    pub degrees: Vec<f64>,
    /// Sum of all degrees, i.e. twice the total edge weight.
    pub total_degree: f64,
}

impl Adjacency {
    pub fn from_graph(graph: &WeightedGraph) -> Self {
        let node_count = graph.node_count();
        let mut neighbors = vec![Vec::new(); node_count];
        for (left, right, weight) in graph.edge_list() {
            neighbors[left].push((right, weight));
            neighbors[right].push((left, weight));
        }
        Self::assemble(neighbors, vec![0.0; node_count])
    }

    fn assemble(mut neighbors: Vec<Vec<(usize, f64)>>, self_loops: Vec<f64>) -> Self {
        for list in &mut neighbors {
            list.sort_by_key(|(node, _)| *node);
        }
        let degrees = neighbors
            .iter()
            .zip(&self_loops)
            .map(|(list, self_loop)| {
                list.iter().map(|(_, weight)| weight).sum::<f64>() + 2.0 * self_loop
            })
            .collect::<Vec<_>>();
        let total_degree = degrees.iter().sum();

        Self {
            neighbors,
            self_loops,
            degrees,
            total_degree,
        }
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Collapses every community into one node. `membership` must be compact
    /// (`0..community_count`).
    pub fn aggregate(&self, membership: &[usize], community_count: usize) -> Self {
        let mut self_loops = vec![0.0; community_count];
        let mut merged = vec![BTreeMap::<usize, f64>::new(); community_count];

        for node in 0..self.node_count() {
            let community = membership[node];
            self_loops[community] += self.self_loops[node];
            for &(other, weight) in &self.neighbors[node] {
                let other_community = membership[other];
                if other_community == community {
                    // Visited once from each side.
                    self_loops[community] += weight / 2.0;
                } else {
                    *merged[community].entry(other_community).or_insert(0.0) += weight;
                }
            }
        }

        let neighbors = merged
            .into_iter()
            .map(|targets| targets.into_iter().collect::<Vec<_>>())
            .collect();
        Self::assemble(neighbors, self_loops)
    }
}

/// Renumbers labels to `0..count` in order of first appearance.
pub(crate) fn compact(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping = HashMap::new();
    let compacted = labels
        .iter()
        .map(|label| {
            let next = mapping.len();
            *mapping.entry(*label).or_insert(next)
        })
        .collect();
    (compacted, mapping.len())
}
