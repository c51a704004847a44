use std::sync::Arc;

use carve_core::JobId;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::{Orchestrator, PipelineError};

const EVENT_QUEUE_CAPACITY: usize = 64;

/// Upstream triggers for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Created(JobId),
    Restarted(JobId),
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Created(job_id) | Self::Restarted(job_id) => job_id,
        }
    }
}

/// Runs one pipeline task per received event, at most `max_concurrent_jobs`
/// at a time. Events for the same job queue up on the orchestrator's per-job
/// lock.
pub struct JobDispatcher {
    sender: mpsc::Sender<JobEvent>,
    worker: JoinHandle<()>,
}

impl JobDispatcher {
    pub fn spawn(orchestrator: Arc<Orchestrator>, max_concurrent_jobs: usize) -> Self {
        let (sender, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let worker = tokio::spawn(run_worker(orchestrator, receiver, max_concurrent_jobs));
        Self { sender, worker }
    }

    pub async fn submit(&self, event: JobEvent) -> Result<(), PipelineError> {
        debug!(job_id = event.job_id(), event = ?event, "job event queued");
        self.sender
            .send(event)
            .await
            .map_err(|err| PipelineError::Task(format!("dispatcher stopped, dropped {:?}", err.0)))
    }

    /// Stops accepting events and waits until every queued and running job
    /// has finished.
    pub async fn shutdown(self) -> Result<(), PipelineError> {
        drop(self.sender);
        self.worker
            .await
            .map_err(|err| PipelineError::Task(format!("dispatcher worker: {err}")))
    }
}

async fn run_worker(
    orchestrator: Arc<Orchestrator>,
    mut receiver: mpsc::Receiver<JobEvent>,
    max_concurrent_jobs: usize,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_jobs.max(1)));
    let mut join_set = JoinSet::new();

    while let Some(event) = receiver.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("job semaphore closed");
                break;
            }
        };
        let orchestrator = orchestrator.clone();
        join_set.spawn(async move {
            let _permit = permit;
            handle_event(&orchestrator, event).await;
        });

        while let Some(joined) = join_set.try_join_next() {
            log_join(joined);
        }
    }

    while let Some(joined) = join_set.join_next().await {
        log_join(joined);
    }
}

async fn handle_event(orchestrator: &Orchestrator, event: JobEvent) {
    let job_id = event.job_id();
    if matches!(event, JobEvent::Restarted(_)) {
        info!(job_id, "re-running restarted job");
    }
    match orchestrator.run_job(job_id).await {
        Ok(job) => debug!(job_id, status = job.status.as_str(), "job event handled"),
        Err(err) => error!(
            job_id,
            category = err.category().as_str(),
            error = %err,
            "job event could not be handled"
        ),
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "pipeline task panicked or was cancelled");
    }
}
