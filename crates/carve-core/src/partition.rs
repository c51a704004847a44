use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ClusterId, DependencyGraph, StrategyKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("cluster id must not be empty")]
    EmptyClusterId,
    #[error("cluster {0} has no members")]
    EmptyCluster(ClusterId),
    #[error("{fqn} is assigned to both {first} and {second}")]
    DuplicateMember {
        fqn: String,
        first: ClusterId,
        second: ClusterId,
    },
    #[error("cluster {cluster} references {fqn}, which is not in the graph")]
    UnknownMember { cluster: ClusterId, fqn: String },
}

/// Output of one strategy run: cluster id to member FQNs.
///
/// Nodes a strategy declines to classify are simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub strategy: StrategyKind,
    pub clusters: BTreeMap<ClusterId, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modularity: Option<f64>,
}

impl Partition {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            clusters: BTreeMap::new(),
            modularity: None,
        }
    }

    /// Groups `(fqn, cluster)` pairs. Members end up sorted within a cluster.
    pub fn from_assignments<I, F, C>(strategy: StrategyKind, assignments: I) -> Self
    where
        I: IntoIterator<Item = (F, C)>,
        F: Into<String>,
        C: Into<ClusterId>,
    {
        let mut clusters = BTreeMap::<ClusterId, Vec<String>>::new();
        for (fqn, cluster) in assignments {
            clusters.entry(cluster.into()).or_default().push(fqn.into());
        }
        for members in clusters.values_mut() {
            members.sort();
        }

        Self {
            strategy,
            clusters,
            modularity: None,
        }
    }

    pub fn with_modularity(mut self, modularity: Option<f64>) -> Self {
        self.modularity = modularity.filter(|value| value.is_finite());
        self
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn assigned_count(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }

    pub fn cluster_of(&self, fqn: &str) -> Option<&str> {
        self.clusters
            .iter()
            .find(|(_, members)| members.iter().any(|member| member == fqn))
            .map(|(cluster, _)| cluster.as_str())
    }

    /// Checks the partition invariants against the graph it was computed on.
    pub fn validate(&self, graph: &DependencyGraph) -> Result<(), PartitionError> {
        let mut seen = HashMap::<&str, &str>::new();
        for (cluster, members) in &self.clusters {
            if cluster.trim().is_empty() {
                return Err(PartitionError::EmptyClusterId);
            }
            if members.is_empty() {
                return Err(PartitionError::EmptyCluster(cluster.clone()));
            }
            for fqn in members {
                if !graph.contains(fqn) {
                    return Err(PartitionError::UnknownMember {
                        cluster: cluster.clone(),
                        fqn: fqn.clone(),
                    });
                }
                if let Some(first) = seen.insert(fqn.as_str(), cluster.as_str()) {
                    return Err(PartitionError::DuplicateMember {
                        fqn: fqn.clone(),
                        first: first.to_owned(),
                        second: cluster.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Per-strategy cluster labels kept beside the graph instead of on its nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLabels {
    labels: BTreeMap<StrategyKind, BTreeMap<String, ClusterId>>,
}

impl ClusterLabels {
    pub fn record(&mut self, partition: &Partition) {
        let by_node = self.labels.entry(partition.strategy).or_default();
        by_node.clear();
        for (cluster, members) in &partition.clusters {
            for fqn in members {
                by_node.insert(fqn.clone(), cluster.clone());
            }
        }
    }

    pub fn label(&self, strategy: StrategyKind, fqn: &str) -> Option<&str> {
        self.labels
            .get(&strategy)
            .and_then(|by_node| by_node.get(fqn))
            .map(String::as_str)
    }

    /// Recorded strategies that left `fqn` unassigned.
    pub fn skipped_by(&self, fqn: &str) -> BTreeSet<StrategyKind> {
        self.labels
            .iter()
            .filter(|(_, by_node)| !by_node.contains_key(fqn))
            .map(|(strategy, _)| *strategy)
            .collect()
    }
}

/// Boundary quality numbers for one cluster. Built once from counts and never
/// mutated; cohesion is derived so it cannot disagree with the counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryMetrics {
    size: usize,
    cohesion: f64,
    coupling: usize,
    internal_dependencies: usize,
    external_dependencies: usize,
}

impl BoundaryMetrics {
    pub fn from_counts(
        size: usize,
        internal_dependencies: usize,
        external_dependencies: usize,
        coupling: usize,
    ) -> Self {
        let total = internal_dependencies + external_dependencies;
        let cohesion = if total == 0 {
            0.0
        } else {
            internal_dependencies as f64 / total as f64
        };

        Self {
            size,
            cohesion,
            coupling,
            internal_dependencies,
            external_dependencies,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cohesion(&self) -> f64 {
        self.cohesion
    }

    pub fn coupling(&self) -> usize {
        self.coupling
    }

    pub fn internal_dependencies(&self) -> usize {
        self.internal_dependencies
    }

    pub fn external_dependencies(&self) -> usize {
        self.external_dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExtractionOutput, RawEdge};

    fn graph() -> DependencyGraph {
        DependencyGraph::build(
            "job-1",
            &ExtractionOutput {
                declared: Vec::new(),
                edges: vec![
                    RawEdge::unweighted("app.A", "app.B"),
                    RawEdge::unweighted("app.B", "app.C"),
                ],
            },
        )
        .expect("graph")
    }

    #[test]
    fn validate_rejects_members_assigned_twice() {
        let partition = Partition::from_assignments(
            StrategyKind::Louvain,
            [("app.A", "c1"), ("app.B", "c1"), ("app.A", "c2")],
        );

        let err = partition.validate(&graph()).expect_err("duplicate member");
        assert_eq!(
            err,
            PartitionError::DuplicateMember {
                fqn: "app.A".to_owned(),
                first: "c1".to_owned(),
                second: "c2".to_owned(),
            }
        );
    }

    #[test]
    fn validate_accepts_partial_partitions() {
        let partition =
            Partition::from_assignments(StrategyKind::DomainDriven, [("app.A", "orders")]);
        partition.validate(&graph()).expect("partial partition is valid");
        assert_eq!(partition.cluster_of("app.A"), Some("orders"));
        assert_eq!(partition.cluster_of("app.C"), None);
    }

    #[test]
    fn labels_report_which_strategies_skipped_a_node() {
        let mut labels = ClusterLabels::default();
        labels.record(&Partition::from_assignments(
            StrategyKind::Louvain,
            [("app.A", "0"), ("app.B", "0"), ("app.C", "1")],
        ));
        labels.record(&Partition::from_assignments(
            StrategyKind::DomainDriven,
            [("app.A", "orders")],
        ));

        assert_eq!(labels.label(StrategyKind::Louvain, "app.C"), Some("1"));
        assert_eq!(
            labels.skipped_by("app.C").into_iter().collect::<Vec<_>>(),
            vec![StrategyKind::DomainDriven]
        );
        assert!(labels.skipped_by("app.A").is_empty());
    }

    #[test]
    fn cohesion_is_zero_without_outgoing_dependencies() {
        let metrics = BoundaryMetrics::from_counts(2, 0, 0, 0);
        assert_eq!(metrics.cohesion(), 0.0);

        let metrics = BoundaryMetrics::from_counts(2, 1, 3, 2);
        assert!((metrics.cohesion() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn with_modularity_drops_non_finite_scores() {
        let partition = Partition::new(StrategyKind::Louvain).with_modularity(Some(f64::NAN));
        assert_eq!(partition.modularity, None);
    }
}
