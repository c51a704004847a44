use carve_analysis::{MetricsError, StrategyError};
use carve_core::{GraphError, PartitionError, StrategyKind, TransitionError};
use carve_extract::ExtractError;
use carve_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Failure classes a job can end in. Each maps to one recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad configuration or source reference.
    Input,
    /// The analysis tool or clustering service failed or timed out.
    ExternalTool,
    /// A structural invariant broke; this is a defect.
    Internal,
    /// Input too small or degenerate to compute on.
    Precondition,
    Storage,
    /// The job was not in a state that allows the request.
    State,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::ExternalTool => "external_tool",
            Self::Internal => "internal",
            Self::Precondition => "precondition",
            Self::Storage => "storage",
            Self::State => "state",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("graph construction failed: {0}")]
    Graph(#[from] GraphError),
    #[error("{0} produced no classes")]
    EmptyGraph(String),
    #[error("no strategies requested")]
    NoStrategies,
    #[error("strategy {strategy} failed: {source}")]
    Strategy {
        strategy: StrategyKind,
        #[source]
        source: StrategyError,
    },
    #[error("strategy {strategy} returned an invalid partition: {source}")]
    Partition {
        strategy: StrategyKind,
        #[source]
        source: PartitionError,
    },
    #[error("metrics for {strategy} failed: {source}")]
    Metrics {
        strategy: StrategyKind,
        #[source]
        source: MetricsError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Transition(#[from] TransitionError),
    #[error("unknown job {0}")]
    UnknownJob(String),
    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Extract(err) if err.is_tool_failure() => ErrorCategory::ExternalTool,
            Self::Extract(ExtractError::InvalidSource(_) | ExtractError::Io(_)) => {
                ErrorCategory::Input
            }
            Self::Extract(_) => ErrorCategory::Internal,
            Self::Graph(_) | Self::Partition { .. } | Self::Task(_) => ErrorCategory::Internal,
            Self::EmptyGraph(_) | Self::NoStrategies => ErrorCategory::Input,
            Self::Strategy { source, .. } => match source {
                StrategyError::TooFewNodes { .. } => ErrorCategory::Precondition,
                StrategyError::Community(_) => ErrorCategory::ExternalTool,
                StrategyError::Partition(_) | StrategyError::Unsupported(_) => {
                    ErrorCategory::Internal
                }
            },
            Self::Metrics { .. } => ErrorCategory::Precondition,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Transition(_) | Self::UnknownJob(_) => ErrorCategory::State,
        }
    }
}
