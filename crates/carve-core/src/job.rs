use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BoundaryMetrics, ClusterId, JobId, Partition, SourceReference, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!(
                "invalid job status '{other}', expected one of: pending, running, completed, failed"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("job cannot move from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Lifecycle record of one decomposition request.
///
/// `PENDING -> RUNNING -> COMPLETED | FAILED`, and `restart` from either
/// terminal state back to `PENDING`. Identity, source and requested
/// strategies never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionJob {
    pub id: JobId,
    pub source: SourceReference,
    pub strategies: Vec<StrategyKind>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl DecompositionJob {
    pub fn new(id: &str, source: SourceReference, strategies: Vec<StrategyKind>, now: i64) -> Self {
        Self {
            id: id.to_owned(),
            source,
            strategies,
            status: JobStatus::Pending,
            failure_reason: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self, now: i64) -> Result<(), TransitionError> {
        self.transition(JobStatus::Pending, JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, now: i64) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running, JobStatus::Completed)?;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Any non-terminal job can fail, including one that never started.
    pub fn fail(&mut self, reason: impl Into<String>, now: i64) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        self.status = JobStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(now);
        Ok(())
    }

    /// Back to `PENDING` with timestamps and failure reason cleared.
    pub fn restart(&mut self) -> Result<(), TransitionError> {
        if !self.status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Pending,
            });
        }
        self.status = JobStatus::Pending;
        self.failure_reason = None;
        self.started_at = None;
        self.finished_at = None;
        Ok(())
    }

    fn transition(&mut self, from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status != from {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// One scored cluster of a decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub cluster_id: ClusterId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub members: Vec<String>,
    pub metrics: BoundaryMetrics,
}

/// Result of one strategy for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub job_id: JobId,
    pub strategy: StrategyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modularity: Option<f64>,
    pub boundaries: Vec<Boundary>,
    /// Graph nodes this strategy left unassigned.
    #[serde(default)]
    pub unassigned: usize,
}

impl Decomposition {
    pub fn partition(&self) -> Partition {
        Partition {
            strategy: self.strategy,
            clusters: self
                .boundaries
                .iter()
                .map(|boundary| (boundary.cluster_id.clone(), boundary.members.clone()))
                .collect(),
            modularity: self.modularity,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn job() -> DecompositionJob {
        DecompositionJob::new(
            "job-1",
            SourceReference::SourceTree {
                root: PathBuf::from("/repo"),
            },
            vec![StrategyKind::Louvain],
            10,
        )
    }

    #[test]
    fn happy_path_records_timestamps() {
        let mut job = job();
        job.start(11).expect("start");
        job.complete(12).expect("complete");

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!((job.started_at, job.finished_at), (Some(11), Some(12)));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut job = job();
        assert_eq!(
            job.complete(11),
            Err(TransitionError {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
            })
        );
        assert!(job.restart().is_err());

        job.start(11).expect("start");
        assert!(job.start(12).is_err());
    }

    #[test]
    fn restart_clears_failure_but_keeps_identity() {
        let mut job = job();
        job.start(11).expect("start");
        job.fail("jdeps exited with status 1", 12).expect("fail");
        assert!(job.fail("again", 13).is_err());

        job.restart().expect("restart");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.id, "job-1");
        assert_eq!(job.strategies, vec![StrategyKind::Louvain]);
        assert!(job.failure_reason.is_none());
        assert!(job.started_at.is_none() && job.finished_at.is_none());
        assert_eq!(job.created_at, 10);
    }
}
