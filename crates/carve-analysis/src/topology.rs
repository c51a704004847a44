use std::collections::HashMap;

use async_trait::async_trait;
use carve_config::ClusteringConfig;
use carve_core::{DependencyGraph, Partition, StrategyKind};
use carve_graph_algo::{
    ClusteringParams, Communities, WeightedGraph, connected_components, label_propagation,
    leiden, louvain,
};
use tracing::debug;

use crate::{PartitionStrategy, StrategyError, ensure_min_nodes};

/// Topology clustering computed in process on the undirected projection of the
/// graph.
///
/// Label propagation breaks ties on the lowest node index, so all three
/// algorithms return the same partition for the same graph. Nodes without any
/// relationship are left unassigned.
#[derive(Debug, Clone)]
pub struct NativeStrategy {
    kind: StrategyKind,
    params: ClusteringParams,
    min_nodes: usize,
}

impl NativeStrategy {
    /// `None` for heuristic kinds, which have no topology algorithm.
    pub fn new(kind: StrategyKind, config: &ClusteringConfig) -> Option<Self> {
        if kind.is_heuristic() {
            return None;
        }
        Some(Self {
            kind,
            params: ClusteringParams {
                resolution: config.resolution,
                max_iterations: config.max_iterations.max(1),
            },
            min_nodes: config.min_nodes,
        })
    }

    fn detect(&self, graph: &WeightedGraph) -> Communities {
        match self.kind {
            StrategyKind::LabelPropagation => label_propagation(graph, &self.params),
            StrategyKind::Leiden => leiden(graph, &self.params),
            _ => louvain(graph, &self.params),
        }
    }
}

#[async_trait]
impl PartitionStrategy for NativeStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn partition(&self, graph: &DependencyGraph) -> Result<Partition, StrategyError> {
        ensure_min_nodes(self.kind, graph, self.min_nodes)?;

        let weighted = WeightedGraph::from_edges(graph.node_count(), &graph.undirected_weights());
        let communities = self.detect(&weighted);
        let component_count = connected_components(&weighted)
            .into_iter()
            .max()
            .map_or(0, |last| last + 1);

        let mut renumbered = HashMap::<usize, usize>::new();
        let mut assignments = Vec::new();
        for (position, node) in graph.nodes().iter().enumerate() {
            if weighted.is_isolated(position) {
                continue;
            }
            let next = renumbered.len();
            let cluster = *renumbered
                .entry(communities.membership[position])
                .or_insert(next);
            assignments.push((node.fqn.clone(), cluster.to_string()));
        }

        debug!(
            job_id = graph.job_id(),
            strategy = self.kind.as_str(),
            communities = renumbered.len(),
            components = component_count,
            unassigned = graph.node_count() - assignments.len(),
            modularity = communities.modularity,
            "native clustering finished"
        );

        Ok(Partition::from_assignments(self.kind, assignments)
            .with_modularity(Some(communities.modularity)))
    }
}
