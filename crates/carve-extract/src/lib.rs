//! Dependency extraction: turns a codebase reference into raw class edges.

mod artifact;
mod source;
mod table;

use async_trait::async_trait;
use carve_core::{ExtractionOutput, ExtractorKind, SourceReference};
use thiserror::Error;

pub use artifact::{ArtifactExtractor, PackageScope, parse_dot};
pub use source::{
    DeclarationFailure, ParsedUnit, ReferenceEvent, SourceExtractor, TypeIndex, UnitEvents,
    UnitOutline, UnitScope, VisitError, collect_reference_events, extract_units, java_parser,
    outline_unit, parse_units, reduce_events,
};
pub use table::ExtractorTable;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid source: {0}")]
    InvalidSource(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("{tool} did not finish within {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },
    #[error("parser error: {0}")]
    Parser(String),
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
    #[error("extraction task failed: {0}")]
    Task(String),
    #[error("no extractor registered for {0}")]
    Unsupported(&'static str),
}

impl ExtractError {
    /// External tool failures as opposed to bad input or internal faults.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolSpawn { .. } | Self::ToolFailed { .. } | Self::ToolTimeout { .. }
        )
    }
}

/// Produces class-level edges for one source reference. Every edge endpoint
/// is a type seen by the same pass, and `(source, target)` pairs are unique.
#[async_trait]
pub trait DependencyExtractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;

    async fn extract(&self, source: &SourceReference) -> Result<ExtractionOutput, ExtractError>;
}
