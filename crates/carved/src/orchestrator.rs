use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use carve_core::{
    Decomposition, DecompositionJob, JobId, JobStatus, SourceReference, StrategyKind,
};
use carve_store::DecompositionStore;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::PipelineError;
use crate::pipeline::{DecompositionPipeline, cluster_labels, requested_strategies};

const INTERRUPTED_REASON: &str = "internal: interrupted while running";

/// Everything known about one job: its lifecycle record, one decomposition
/// per strategy, and which strategies left each node unassigned.
#[derive(Debug, Clone, Serialize)]
pub struct DecompositionReport {
    pub job: DecompositionJob,
    pub decompositions: Vec<Decomposition>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped: BTreeMap<String, Vec<StrategyKind>>,
}

/// Owns the job state machine and runs the pipeline under it.
///
/// Calls for the same job id are serialized; different jobs run independently.
pub struct Orchestrator {
    pipeline: DecompositionPipeline,
    store: Arc<dyn DecompositionStore>,
    job_locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(pipeline: DecompositionPipeline, store: Arc<dyn DecompositionStore>) -> Self {
        Self {
            pipeline,
            store,
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Records a new PENDING job. Nothing runs until `run_job`.
    pub fn create_job(
        &self,
        source: SourceReference,
        strategies: &[StrategyKind],
    ) -> Result<DecompositionJob, PipelineError> {
        let strategies = requested_strategies(strategies);
        if strategies.is_empty() {
            return Err(PipelineError::NoStrategies);
        }
        let job = DecompositionJob::new(
            &Uuid::new_v4().to_string(),
            source,
            strategies,
            unix_timestamp_secs(),
        );
        self.store.insert_job(&job)?;
        info!(job_id = %job.id, source = %job.source.describe(), "job created");
        Ok(job)
    }

    /// Runs a PENDING job to COMPLETED or FAILED.
    ///
    /// A pipeline failure is not an error of this call: it is recorded on the
    /// returned job with its category and message. Errors are reserved for
    /// unknown jobs, illegal transitions and storage failures.
    pub async fn run_job(&self, job_id: &str) -> Result<DecompositionJob, PipelineError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.load(job_id)?;
        job.start(unix_timestamp_secs())?;
        self.store.update_job(&job)?;
        info!(
            job_id,
            strategies = ?job.strategies,
            "job running"
        );

        match self.pipeline.run(&job).await {
            Ok(decompositions) => {
                job.complete(unix_timestamp_secs())?;
                self.store.update_job(&job)?;
                info!(job_id, decompositions = decompositions.len(), "job completed");
            }
            Err(err) => {
                let category = err.category();
                error!(
                    job_id,
                    category = category.as_str(),
                    error = %err,
                    "job failed"
                );
                job.fail(format!("{}: {err}", category.as_str()), unix_timestamp_secs())?;
                self.store.update_job(&job)?;
            }
        }
        Ok(job)
    }

    /// Moves a finished job back to PENDING and drops its decompositions. The
    /// stored graph is kept until the next run replaces it.
    pub async fn restart(&self, job_id: &str) -> Result<DecompositionJob, PipelineError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.load(job_id)?;
        let previous = job.status;
        job.restart()?;
        self.store.clear_results(job_id)?;
        self.store.update_job(&job)?;
        info!(job_id, from = previous.as_str(), "job restarted");
        Ok(job)
    }

    /// Fails jobs left RUNNING by a process that died mid-run, so they can be
    /// restarted. Jobs this orchestrator is running right now are left alone.
    pub fn recover_interrupted(&self) -> Result<Vec<DecompositionJob>, PipelineError> {
        let mut recovered = Vec::new();
        for job in self.jobs()? {
            if job.status != JobStatus::Running {
                continue;
            }
            let lock = self.job_lock(&job.id);
            let Ok(_guard) = lock.try_lock() else {
                continue;
            };
            let mut job = self.load(&job.id)?;
            if job.status != JobStatus::Running {
                continue;
            }
            job.fail(INTERRUPTED_REASON, unix_timestamp_secs())?;
            self.store.update_job(&job)?;
            warn!(job_id = %job.id, "interrupted job marked failed");
            recovered.push(job);
        }
        Ok(recovered)
    }

    pub fn job(&self, job_id: &str) -> Result<DecompositionJob, PipelineError> {
        self.load(job_id)
    }

    pub fn jobs(&self) -> Result<Vec<DecompositionJob>, PipelineError> {
        Ok(self.store.list_jobs()?)
    }

    pub fn report(&self, job_id: &str) -> Result<DecompositionReport, PipelineError> {
        load_report(self.store.as_ref(), job_id)
    }

    fn load(&self, job_id: &str) -> Result<DecompositionJob, PipelineError> {
        load_job(self.store.as_ref(), job_id)
    }

    fn job_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .job_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(job_id.to_owned()).or_default().clone()
    }
}

pub fn load_job(
    store: &dyn DecompositionStore,
    job_id: &str,
) -> Result<DecompositionJob, PipelineError> {
    store
        .get_job(job_id)?
        .ok_or_else(|| PipelineError::UnknownJob(job_id.to_owned()))
}

/// Report for any job state, read straight from the store. Decompositions
/// only appear once the job completed; a restarted or failed job reports none.
pub fn load_report(
    store: &dyn DecompositionStore,
    job_id: &str,
) -> Result<DecompositionReport, PipelineError> {
    let job = load_job(store, job_id)?;
    if job.status != JobStatus::Completed {
        return Ok(DecompositionReport {
            job,
            decompositions: Vec::new(),
            skipped: BTreeMap::new(),
        });
    }

    let decompositions = store.decompositions(job_id)?;
    let partitions = decompositions
        .iter()
        .map(Decomposition::partition)
        .collect::<Vec<_>>();
    let labels = cluster_labels(&partitions);
    let mut skipped = BTreeMap::new();
    if let Some(graph) = store.load_graph(job_id)? {
        for node in graph.nodes() {
            let by = labels.skipped_by(&node.fqn);
            if !by.is_empty() {
                skipped.insert(node.fqn.clone(), by.into_iter().collect());
            }
        }
    }

    Ok(DecompositionReport {
        job,
        decompositions,
        skipped,
    })
}

pub fn unix_timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}
