//! Native community detection over an undirected weighted graph.

mod components;
mod graph;
mod label_propagation;
mod leiden;
mod louvain;

pub use components::connected_components;
pub use graph::WeightedGraph;
pub use label_propagation::label_propagation;
pub use leiden::leiden;
pub use louvain::{louvain, modularity};

use graph::{Adjacency, compact};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteringParams {
    pub resolution: f64,
    pub max_iterations: usize,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_iterations: 100,
        }
    }
}

/// Community id per node (`0..count`, numbered by first appearance) plus the
/// modularity of that assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Communities {
    pub membership: Vec<usize>,
    pub count: usize,
    pub modularity: f64,
}

impl Communities {
    fn from_membership(adjacency: &Adjacency, membership: Vec<usize>, resolution: f64) -> Self {
        let (membership, count) = compact(&membership);
        let modularity = louvain::modularity_of(adjacency, &membership, resolution);
        Self {
            membership,
            count,
            modularity,
        }
    }

    /// Node indices grouped by community, in community order.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.count];
        for (node, community) in self.membership.iter().enumerate() {
            groups[*community].push(node);
        }
        groups
    }
}
