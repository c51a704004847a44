use std::collections::HashMap;
use std::sync::Arc;

use carve_config::{ClusteringBackend, ClusteringConfig};
use carve_core::StrategyKind;
use carve_store::{CommunityService, HttpCommunityService};

use crate::{
    ActorDrivenStrategy, DelegatedStrategy, DomainDrivenStrategy, NativeStrategy,
    PartitionStrategy, StrategyError,
};

/// Strategies keyed by kind, resolved once from configuration.
#[derive(Clone, Default)]
pub struct StrategyTable {
    strategies: HashMap<StrategyKind, Arc<dyn PartitionStrategy>>,
}

impl StrategyTable {
    /// Topology kinds run natively unless `backend = "external"`, in which
    /// case they go through the HTTP clustering service.
    pub fn from_config(config: &ClusteringConfig) -> Result<Self, StrategyError> {
        let service = match config.backend {
            ClusteringBackend::Native => None,
            ClusteringBackend::External => {
                Some(Arc::new(HttpCommunityService::from_config(config)?) as Arc<dyn CommunityService>)
            }
        };
        Self::with_service(config, service)
    }

    /// Like `from_config`, with the clustering service supplied by the caller.
    /// Without a service every topology kind runs natively.
    pub fn with_service(
        config: &ClusteringConfig,
        service: Option<Arc<dyn CommunityService>>,
    ) -> Result<Self, StrategyError> {
        let mut table = Self::default();
        for kind in StrategyKind::ALL {
            let strategy: Arc<dyn PartitionStrategy> = match kind {
                StrategyKind::DomainDriven => Arc::new(DomainDrivenStrategy::new(config.min_nodes)),
                StrategyKind::ActorDriven => Arc::new(ActorDrivenStrategy::new(config.min_nodes)),
                topology => match (&service, NativeStrategy::new(topology, config)) {
                    (Some(service), _) => {
                        Arc::new(DelegatedStrategy::new(topology, service.clone(), config.min_nodes)?)
                    }
                    (None, Some(native)) => Arc::new(native),
                    (None, None) => return Err(StrategyError::Unsupported(topology)),
                },
            };
            table.register(strategy);
        }
        Ok(table)
    }

    /// Replaces any strategy already registered for the same kind.
    pub fn register(&mut self, strategy: Arc<dyn PartitionStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Result<Arc<dyn PartitionStrategy>, StrategyError> {
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or(StrategyError::Unsupported(kind))
    }
}

impl std::fmt::Debug for StrategyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds = self.strategies.keys().collect::<Vec<_>>();
        kinds.sort_unstable();
        f.debug_struct("StrategyTable").field("kinds", &kinds).finish()
    }
}
