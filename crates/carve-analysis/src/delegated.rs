use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use carve_core::{DependencyGraph, Partition, StrategyKind};
use carve_store::{
    CommunityAssignment, CommunityError, CommunityService, GraphProjection, algorithm_name,
};
use tracing::{debug, warn};

use crate::{PartitionStrategy, StrategyError, ensure_min_nodes};

/// Topology clustering run by an external community-detection service.
///
/// Each run creates a projection holding only the current job's graph and
/// drops it again on every exit path, including failed detection.
#[derive(Clone)]
pub struct DelegatedStrategy {
    kind: StrategyKind,
    service: Arc<dyn CommunityService>,
    min_nodes: usize,
}

impl std::fmt::Debug for DelegatedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedStrategy")
            .field("kind", &self.kind)
            .field("min_nodes", &self.min_nodes)
            .finish_non_exhaustive()
    }
}

impl DelegatedStrategy {
    pub fn new(
        kind: StrategyKind,
        service: Arc<dyn CommunityService>,
        min_nodes: usize,
    ) -> Result<Self, StrategyError> {
        algorithm_name(kind)?;
        Ok(Self {
            kind,
            service,
            min_nodes,
        })
    }

    async fn detect(
        &self,
        projection: &GraphProjection,
    ) -> Result<CommunityAssignment, CommunityError> {
        self.service.create_projection(projection).await?;
        self.service
            .detect(&projection.name, algorithm_name(self.kind)?)
            .await
    }
}

#[async_trait]
impl PartitionStrategy for DelegatedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn partition(&self, graph: &DependencyGraph) -> Result<Partition, StrategyError> {
        ensure_min_nodes(self.kind, graph, self.min_nodes)?;

        let projection = GraphProjection::from_graph(graph, self.kind);
        let detected = self.detect(&projection).await;
        if let Err(err) = self.service.drop_projection(&projection.name).await {
            warn!(
                job_id = graph.job_id(),
                projection = %projection.name,
                error = %err,
                "failed to drop clustering projection"
            );
        }
        let assignment = detected?;

        // Only this job's related nodes may come back, whatever the service sent.
        let related = projection
            .relationships
            .iter()
            .flat_map(|relationship| [relationship.source.as_str(), relationship.target.as_str()])
            .collect::<HashSet<_>>();
        let mut ignored = 0;
        let assignments = assignment
            .communities
            .iter()
            .filter(|(fqn, _)| {
                let keep = related.contains(fqn.as_str());
                if !keep {
                    ignored += 1;
                }
                keep
            })
            .map(|(fqn, community)| (fqn.clone(), community.to_string()))
            .collect::<Vec<_>>();

        debug!(
            job_id = graph.job_id(),
            strategy = self.kind.as_str(),
            assigned = assignments.len(),
            ignored,
            "delegated clustering finished"
        );

        Ok(Partition::from_assignments(self.kind, assignments).with_modularity(assignment.modularity))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::test_support::two_modules;

    #[derive(Default)]
    struct RecordingService {
        fail_detect: bool,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingService {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls").clone()
        }
    }

    #[async_trait]
    impl CommunityService for RecordingService {
        async fn create_projection(
            &self,
            projection: &GraphProjection,
        ) -> Result<(), CommunityError> {
            self.calls
                .lock()
                .expect("calls")
                .push(format!("create {}", projection.name));
            Ok(())
        }

        async fn detect(
            &self,
            projection: &str,
            algorithm: &str,
        ) -> Result<CommunityAssignment, CommunityError> {
            self.calls
                .lock()
                .expect("calls")
                .push(format!("detect {projection} {algorithm}"));
            if self.fail_detect {
                return Err(CommunityError::InvalidResponse("service unavailable".to_owned()));
            }
            let mut communities = BTreeMap::new();
            for fqn in [
                "com.shop.order.OrderController",
                "com.shop.order.OrderService",
                "com.shop.order.OrderRepository",
            ] {
                communities.insert(fqn.to_owned(), 7);
            }
            for fqn in [
                "com.shop.billing.BillingController",
                "com.shop.billing.InvoiceService",
                "com.shop.billing.InvoiceRepository",
            ] {
                communities.insert(fqn.to_owned(), 9);
            }
            communities.insert("com.shop.misc.Orphan".to_owned(), 11);
            communities.insert("com.other.job.Stranger".to_owned(), 7);
            Ok(CommunityAssignment {
                communities,
                modularity: Some(0.42),
            })
        }

        async fn drop_projection(&self, projection: &str) -> Result<(), CommunityError> {
            self.calls
                .lock()
                .expect("calls")
                .push(format!("drop {projection}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn assignments_are_scoped_to_the_job_graph() {
        let service = Arc::new(RecordingService::default());
        let strategy = DelegatedStrategy::new(StrategyKind::Leiden, service.clone(), 2)
            .expect("strategy");
        let graph = two_modules();

        let partition = strategy.partition(&graph).await.expect("partition");
        partition.validate(&graph).expect("valid");

        assert_eq!(partition.cluster_count(), 2);
        assert_eq!(partition.assigned_count(), 6);
        assert_eq!(partition.modularity, Some(0.42));
        assert_eq!(
            service.calls(),
            vec![
                "create carve-job-1-leiden",
                "detect carve-job-1-leiden leiden",
                "drop carve-job-1-leiden",
            ]
        );
    }

    #[tokio::test]
    async fn projection_is_dropped_when_detection_fails() {
        let service = Arc::new(RecordingService {
            fail_detect: true,
            ..RecordingService::default()
        });
        let strategy = DelegatedStrategy::new(StrategyKind::Louvain, service.clone(), 2)
            .expect("strategy");

        let err = strategy.partition(&two_modules()).await.expect_err("detect fails");
        assert!(err.is_external());
        assert_eq!(service.calls().last().map(String::as_str), Some("drop carve-job-1-louvain"));
    }

    #[test]
    fn heuristic_kinds_cannot_be_delegated() {
        let service = Arc::new(RecordingService::default());
        assert!(DelegatedStrategy::new(StrategyKind::ActorDriven, service, 2).is_err());
    }
}
