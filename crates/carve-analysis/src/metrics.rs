use std::collections::{BTreeSet, HashSet};

use carve_core::{BoundaryMetrics, DependencyGraph, Partition};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("cluster {0} has no members")]
    EmptyCluster(String),
}

/// Scores one cluster against the full graph.
///
/// Every outgoing edge of a member is internal when its target is also a
/// member and external otherwise. Coupling counts distinct external targets,
/// so two edges into the same outside class count once.
pub fn compute(
    cluster_id: &str,
    members: &[String],
    graph: &DependencyGraph,
) -> Result<BoundaryMetrics, MetricsError> {
    if members.is_empty() {
        return Err(MetricsError::EmptyCluster(cluster_id.to_owned()));
    }

    let member_set = members.iter().map(String::as_str).collect::<HashSet<_>>();
    let mut internal = 0;
    let mut external = 0;
    let mut external_targets = BTreeSet::new();
    for member in &member_set {
        for edge in graph.outgoing(member) {
            if member_set.contains(edge.target_fqn.as_str()) {
                internal += 1;
            } else {
                external += 1;
                external_targets.insert(edge.target_fqn.as_str());
            }
        }
    }

    Ok(BoundaryMetrics::from_counts(
        member_set.len(),
        internal,
        external,
        external_targets.len(),
    ))
}

/// Metrics for every cluster of `partition`, in cluster order.
pub fn score_partition(
    partition: &Partition,
    graph: &DependencyGraph,
) -> Result<Vec<(String, BoundaryMetrics)>, MetricsError> {
    partition
        .clusters
        .iter()
        .map(|(cluster_id, members)| {
            compute(cluster_id, members, graph).map(|metrics| (cluster_id.clone(), metrics))
        })
        .collect()
}
