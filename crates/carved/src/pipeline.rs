use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use carve_analysis::{StrategyTable, compute};
use carve_config::CarveConfig;
use carve_core::{
    Boundary, ClusterLabels, Decomposition, DecompositionJob, DependencyGraph, Partition,
    StrategyKind,
};
use carve_extract::ExtractorTable;
use carve_infer::{ClusterSummary, LoadedNameSuggester, NameSuggester, load_name_suggester};
use carve_store::DecompositionStore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::PipelineError;

/// The steps of one decomposition run: extract, build and persist the graph,
/// partition, score, name and persist the results.
///
/// Every step finishes before the next starts. A failure stops the run but
/// leaves already committed steps in place, so a graph that was stored stays
/// stored when a strategy fails afterwards.
pub struct DecompositionPipeline {
    extractors: ExtractorTable,
    strategies: StrategyTable,
    namer: Arc<dyn NameSuggester>,
    store: Arc<dyn DecompositionStore>,
}

impl DecompositionPipeline {
    pub fn new(
        extractors: ExtractorTable,
        strategies: StrategyTable,
        namer: Arc<dyn NameSuggester>,
        store: Arc<dyn DecompositionStore>,
    ) -> Self {
        Self {
            extractors,
            strategies,
            namer,
            store,
        }
    }

    pub fn from_config(config: &CarveConfig, store: Arc<dyn DecompositionStore>) -> Result<Self> {
        let strategies = StrategyTable::from_config(&config.clustering)
            .context("failed to set up partition strategies")?;
        let loaded = load_name_suggester(&config.naming).unwrap_or_else(|err| {
            warn!(error = %err, "name suggester unavailable, boundaries stay unnamed");
            LoadedNameSuggester::unnamed()
        });
        debug!(
            provider = %loaded.provider_name,
            model = %loaded.model_name,
            "name suggester ready"
        );

        Ok(Self::new(
            ExtractorTable::from_config(config),
            strategies,
            Arc::<dyn NameSuggester>::from(loaded.suggester),
            store,
        ))
    }

    pub async fn run(&self, job: &DecompositionJob) -> Result<Vec<Decomposition>, PipelineError> {
        let strategies = requested_strategies(&job.strategies);
        if strategies.is_empty() {
            return Err(PipelineError::NoStrategies);
        }

        let output = self.extractors.extract(&job.source).await?;
        info!(
            job_id = %job.id,
            declared = output.declared.len(),
            edges = output.edges.len(),
            "extraction finished"
        );

        let graph = DependencyGraph::build(&job.id, &output)?;
        if graph.is_empty() {
            return Err(PipelineError::EmptyGraph(job.source.describe()));
        }
        self.store.replace_graph(&graph)?;
        let totals = graph.total_breakdown();
        info!(
            job_id = %job.id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            method_calls = totals.method_calls,
            field_accesses = totals.field_accesses,
            object_creations = totals.object_creations,
            type_references = totals.type_references,
            "graph stored"
        );

        let graph = Arc::new(graph);
        let partitions = self.partition_all(&graph, &strategies).await?;
        report_skipped(&graph, &partitions);

        let mut decompositions = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            decompositions.push(self.score(&graph, partition).await?);
        }

        self.store.save_decompositions(&job.id, &decompositions)?;
        info!(
            job_id = %job.id,
            strategies = decompositions.len(),
            "decompositions stored"
        );

        Ok(decompositions)
    }

    /// Runs every strategy concurrently on the shared read-only graph and
    /// returns validated partitions in request order.
    ///
    /// Every task runs to completion before this returns, so a delegated
    /// strategy always tears down its projection even when a sibling fails.
    /// The reported error is the one of the earliest requested strategy.
    async fn partition_all(
        &self,
        graph: &Arc<DependencyGraph>,
        strategies: &[StrategyKind],
    ) -> Result<Vec<Partition>, PipelineError> {
        let resolved = strategies
            .iter()
            .map(|&kind| {
                self.strategies
                    .get(kind)
                    .map_err(|source| PipelineError::Strategy {
                        strategy: kind,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut join_set = JoinSet::new();
        for (position, (kind, strategy)) in strategies.iter().copied().zip(resolved).enumerate() {
            let graph = graph.clone();
            join_set.spawn(async move {
                let result = strategy.partition(&graph).await;
                (position, kind, result)
            });
        }

        let mut partitions = Vec::with_capacity(strategies.len());
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (position, kind, result) = match joined {
                Ok(finished) => finished,
                Err(err) => {
                    failures.push((
                        usize::MAX,
                        PipelineError::Task(format!("strategy task: {err}")),
                    ));
                    continue;
                }
            };
            let checked = result
                .map_err(|source| PipelineError::Strategy {
                    strategy: kind,
                    source,
                })
                .and_then(|partition| {
                    partition
                        .validate(graph)
                        .map_err(|source| PipelineError::Partition {
                            strategy: kind,
                            source,
                        })?;
                    Ok(partition)
                });
            match checked {
                Ok(partition) => {
                    info!(
                        job_id = graph.job_id(),
                        strategy = kind.as_str(),
                        clusters = partition.cluster_count(),
                        assigned = partition.assigned_count(),
                        "partition finished"
                    );
                    partitions.push((position, partition));
                }
                Err(err) => {
                    warn!(
                        job_id = graph.job_id(),
                        strategy = kind.as_str(),
                        error = %err,
                        "partition failed"
                    );
                    failures.push((position, err));
                }
            }
        }

        if let Some((_, err)) = failures.into_iter().min_by_key(|(position, _)| *position) {
            return Err(err);
        }
        partitions.sort_by_key(|(position, _)| *position);
        Ok(partitions
            .into_iter()
            .map(|(_, partition)| partition)
            .collect())
    }

    async fn score(
        &self,
        graph: &DependencyGraph,
        partition: &Partition,
    ) -> Result<Decomposition, PipelineError> {
        let mut boundaries = Vec::with_capacity(partition.cluster_count());
        for (cluster_id, members) in &partition.clusters {
            let metrics =
                compute(cluster_id, members, graph).map_err(|source| PipelineError::Metrics {
                    strategy: partition.strategy,
                    source,
                })?;
            boundaries.push(Boundary {
                cluster_id: cluster_id.clone(),
                name: None,
                members: members.clone(),
                metrics,
            });
        }

        let names = self.suggest_names(graph.job_id(), partition).await;
        for boundary in &mut boundaries {
            boundary.name = names.get(&boundary.cluster_id).cloned();
        }

        Ok(Decomposition {
            job_id: graph.job_id().to_owned(),
            strategy: partition.strategy,
            modularity: partition.modularity,
            boundaries,
            unassigned: graph.node_count() - partition.assigned_count(),
        })
    }

    /// Names are advisory; a failing suggester leaves every boundary unnamed.
    async fn suggest_names(&self, job_id: &str, partition: &Partition) -> BTreeMap<String, String> {
        let summaries = partition
            .clusters
            .iter()
            .map(|(id, members)| ClusterSummary {
                id: id.clone(),
                members: members.clone(),
            })
            .collect::<Vec<_>>();
        match self.namer.suggest_names(&summaries).await {
            Ok(names) => names,
            Err(err) => {
                warn!(
                    job_id,
                    strategy = partition.strategy.as_str(),
                    error = %err,
                    "boundary naming failed"
                );
                BTreeMap::new()
            }
        }
    }
}

/// Requested strategies without repeats, first occurrence kept.
pub fn requested_strategies(requested: &[StrategyKind]) -> Vec<StrategyKind> {
    let mut unique = Vec::with_capacity(requested.len());
    for kind in requested {
        if !unique.contains(kind) {
            unique.push(*kind);
        }
    }
    unique
}

/// Side table of every partition's labels, keyed by strategy.
pub fn cluster_labels<'a>(partitions: impl IntoIterator<Item = &'a Partition>) -> ClusterLabels {
    let mut labels = ClusterLabels::default();
    for partition in partitions {
        labels.record(partition);
    }
    labels
}

fn report_skipped(graph: &DependencyGraph, partitions: &[Partition]) {
    let labels = cluster_labels(partitions);
    for node in graph.nodes() {
        let skipped = labels.skipped_by(&node.fqn);
        if !skipped.is_empty() {
            debug!(
                job_id = graph.job_id(),
                fqn = %node.fqn,
                strategies = ?skipped,
                "node left unassigned"
            );
        }
    }
}
