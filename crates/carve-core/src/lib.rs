use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod graph;
mod job;
mod partition;

pub use graph::{DependencyGraph, GraphError};
pub use job::{Boundary, Decomposition, DecompositionJob, JobStatus, TransitionError};
pub use partition::{BoundaryMetrics, ClusterLabels, Partition, PartitionError};

pub type JobId = String;
pub type ClusterId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
    Unknown,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Record => "record",
            Self::Annotation => "annotation",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "class" => Self::Class,
            "interface" => Self::Interface,
            "enum" => Self::Enum,
            "record" => Self::Record,
            "annotation" => Self::Annotation,
            _ => Self::Unknown,
        }
    }
}

/// One analyzed type. Owned by exactly one job's graph snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassNode {
    pub id: String,
    pub simple_name: String,
    pub fqn: String,
    pub kind: NodeKind,
    pub job_id: JobId,
}

impl ClassNode {
    pub fn new(job_id: &str, fqn: &str, kind: NodeKind) -> Self {
        Self {
            id: stable_node_id(job_id, fqn),
            simple_name: simple_name(fqn).to_owned(),
            fqn: fqn.to_owned(),
            kind,
            job_id: job_id.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    MethodCall,
    FieldAccess,
    ObjectCreation,
    TypeReference,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MethodCall => "method_call",
            Self::FieldAccess => "field_access",
            Self::ObjectCreation => "object_creation",
            Self::TypeReference => "type_reference",
        }
    }
}

/// Per-kind reference counts behind a source-derived edge. The edge weight is
/// always the sum of these counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyBreakdown {
    pub method_calls: u32,
    pub field_accesses: u32,
    pub object_creations: u32,
    pub type_references: u32,
}

impl DependencyBreakdown {
    pub fn total(&self) -> u32 {
        self.method_calls + self.field_accesses + self.object_creations + self.type_references
    }

    pub fn record(&mut self, kind: ReferenceKind) {
        match kind {
            ReferenceKind::MethodCall => self.method_calls += 1,
            ReferenceKind::FieldAccess => self.field_accesses += 1,
            ReferenceKind::ObjectCreation => self.object_creations += 1,
            ReferenceKind::TypeReference => self.type_references += 1,
        }
    }

    pub fn merge(&mut self, other: &DependencyBreakdown) {
        self.method_calls += other.method_calls;
        self.field_accesses += other.field_accesses;
        self.object_creations += other.object_creations;
        self.type_references += other.type_references;
    }
}

/// Extractor output edge, before graph construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEdge {
    pub source_fqn: String,
    pub target_fqn: String,
    pub weight: u32,
    pub breakdown: Option<DependencyBreakdown>,
}

impl RawEdge {
    pub fn unweighted(source_fqn: impl Into<String>, target_fqn: impl Into<String>) -> Self {
        Self {
            source_fqn: source_fqn.into(),
            target_fqn: target_fqn.into(),
            weight: 1,
            breakdown: None,
        }
    }

    pub fn with_breakdown(
        source_fqn: impl Into<String>,
        target_fqn: impl Into<String>,
        breakdown: DependencyBreakdown,
    ) -> Self {
        Self {
            source_fqn: source_fqn.into(),
            target_fqn: target_fqn.into(),
            weight: breakdown.total(),
            breakdown: Some(breakdown),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredType {
    pub fqn: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub declared: Vec<DeclaredType>,
    pub edges: Vec<RawEdge>,
}

/// Directed, weighted class-to-class edge inside one job's graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub source_fqn: String,
    pub target_fqn: String,
    pub weight: u32,
    pub breakdown: Option<DependencyBreakdown>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    Artifact,
    Source,
}

impl ExtractorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artifact => "artifact",
            Self::Source => "source",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LabelPropagation,
    Louvain,
    Leiden,
    DomainDriven,
    ActorDriven,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        Self::LabelPropagation,
        Self::Louvain,
        Self::Leiden,
        Self::DomainDriven,
        Self::ActorDriven,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LabelPropagation => "label_propagation",
            Self::Louvain => "louvain",
            Self::Leiden => "leiden",
            Self::DomainDriven => "domain_driven",
            Self::ActorDriven => "actor_driven",
        }
    }

    /// Heuristic strategies work on names and metadata and must be
    /// deterministic; the others cluster on topology.
    pub fn is_heuristic(self) -> bool {
        matches!(self, Self::DomainDriven | Self::ActorDriven)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "label_propagation" => Ok(Self::LabelPropagation),
            "louvain" => Ok(Self::Louvain),
            "leiden" => Ok(Self::Leiden),
            "domain_driven" => Ok(Self::DomainDriven),
            "actor_driven" => Ok(Self::ActorDriven),
            other => Err(format!(
                "invalid strategy '{other}', expected one of: label_propagation, louvain, leiden, domain_driven, actor_driven"
            )),
        }
    }
}

/// What a job analyzes. Artifacts are already unpacked to a local path by the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceReference {
    Artifact {
        archive_path: PathBuf,
        include_prefix: String,
        #[serde(default)]
        exclude_prefixes: Vec<String>,
    },
    SourceTree {
        root: PathBuf,
    },
}

impl SourceReference {
    pub fn extractor_kind(&self) -> ExtractorKind {
        match self {
            Self::Artifact { .. } => ExtractorKind::Artifact,
            Self::SourceTree { .. } => ExtractorKind::Source,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Artifact {
                archive_path,
                include_prefix,
                ..
            } => format!("artifact {} ({include_prefix})", archive_path.display()),
            Self::SourceTree { root } => format!("source tree {}", root.display()),
        }
    }
}

pub fn simple_name(fqn: &str) -> &str {
    fqn.rsplit('.').next().unwrap_or(fqn)
}

pub fn package_of(fqn: &str) -> &str {
    fqn.rsplit_once('.').map(|(package, _)| package).unwrap_or("")
}

pub fn stable_node_id(job_id: &str, fqn: &str) -> String {
    let material = format!("{job_id}\n{fqn}");
    blake3::hash(material.as_bytes()).to_hex().to_string()
}
