mod delegated;
mod heuristic;
mod metrics;
mod table;
mod topology;

use async_trait::async_trait;
use carve_core::{DependencyGraph, Partition, PartitionError, StrategyKind};
use carve_store::CommunityError;
use thiserror::Error;

pub use delegated::DelegatedStrategy;
pub use heuristic::{ActorDrivenStrategy, DomainDrivenStrategy};
pub use metrics::{MetricsError, compute, score_partition};
pub use table::StrategyTable;
pub use topology::NativeStrategy;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("{strategy} needs at least {minimum} nodes, graph has {found}")]
    TooFewNodes {
        strategy: StrategyKind,
        found: usize,
        minimum: usize,
    },
    #[error("clustering service error: {0}")]
    Community(#[from] CommunityError),
    #[error("invalid partition: {0}")]
    Partition(#[from] PartitionError),
    #[error("{0} is not registered")]
    Unsupported(StrategyKind),
}

impl StrategyError {
    /// True when the failure came from the external clustering service.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Community(_))
    }
}

/// One way of grouping a job's graph into candidate service boundaries.
///
/// Implementations only read the graph. Nodes a strategy cannot place are left
/// out of the returned partition.
#[async_trait]
pub trait PartitionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn partition(&self, graph: &DependencyGraph) -> Result<Partition, StrategyError>;
}

pub(crate) fn ensure_min_nodes(
    strategy: StrategyKind,
    graph: &DependencyGraph,
    minimum: usize,
) -> Result<(), StrategyError> {
    if graph.node_count() < minimum {
        return Err(StrategyError::TooFewNodes {
            strategy,
            found: graph.node_count(),
            minimum,
        });
    }
    Ok(())
}
