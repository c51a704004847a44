use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::{ClassNode, Dependency, DependencyBreakdown, ExtractionOutput, JobId, NodeKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("edge {source_fqn} -> {target_fqn} references unknown node {missing}")]
    MissingEndpoint {
        source_fqn: String,
        target_fqn: String,
        missing: String,
    },
    #[error("node {fqn} belongs to job {found}, expected {expected}")]
    ForeignNode {
        fqn: String,
        expected: JobId,
        found: JobId,
    },
    #[error("duplicate node {0}")]
    DuplicateNode(String),
    #[error("duplicate edge {0} -> {1}")]
    DuplicateEdge(String, String),
    #[error("self edge on {0}")]
    SelfEdge(String),
}

/// Immutable class dependency graph for one job.
///
/// Nodes are kept in FQN order, so node indices double as the stable
/// identifiers clustering tie-breaks use.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyGraph {
    job_id: JobId,
    nodes: Vec<ClassNode>,
    edges: Vec<Dependency>,
    index: HashMap<String, usize>,
    outgoing: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Builds the graph from one extraction pass.
    ///
    /// Phase one materializes a node for every declared type and every edge
    /// endpoint; phase two attaches edges. Repeated (source, target) pairs are
    /// folded into one edge and self references are dropped.
    pub fn build(job_id: &str, output: &ExtractionOutput) -> Result<Self, GraphError> {
        let mut kinds = BTreeMap::<&str, NodeKind>::new();
        for declared in &output.declared {
            let fqn = declared.fqn.trim();
            if fqn.is_empty() {
                continue;
            }
            let entry = kinds.entry(fqn).or_insert(NodeKind::Unknown);
            if *entry == NodeKind::Unknown {
                *entry = declared.kind;
            }
        }

        let mut merged = BTreeMap::<(&str, &str), Dependency>::new();
        for edge in &output.edges {
            let source = edge.source_fqn.trim();
            let target = edge.target_fqn.trim();
            if source.is_empty() || target.is_empty() || source == target {
                continue;
            }
            kinds.entry(source).or_insert(NodeKind::Unknown);
            kinds.entry(target).or_insert(NodeKind::Unknown);

            match merged.get_mut(&(source, target)) {
                Some(existing) => {
                    existing.weight += edge.weight;
                    existing.breakdown = match (existing.breakdown, edge.breakdown) {
                        (Some(mut left), Some(right)) => {
                            left.merge(&right);
                            Some(left)
                        }
                        _ => None,
                    };
                }
                None => {
                    merged.insert(
                        (source, target),
                        Dependency {
                            source_fqn: source.to_owned(),
                            target_fqn: target.to_owned(),
                            weight: edge.weight,
                            breakdown: edge.breakdown,
                        },
                    );
                }
            }
        }

        let nodes = kinds
            .into_iter()
            .map(|(fqn, kind)| ClassNode::new(job_id, fqn, kind))
            .collect::<Vec<_>>();
        let edges = merged.into_values().collect::<Vec<_>>();

        Self::from_parts(job_id, nodes, edges)
    }

    /// Assembles a graph from already materialized nodes and edges, e.g. a
    /// persisted snapshot. An edge whose endpoint is not in `nodes` is a
    /// structural defect and fails immediately.
    pub fn from_parts(
        job_id: &str,
        mut nodes: Vec<ClassNode>,
        mut edges: Vec<Dependency>,
    ) -> Result<Self, GraphError> {
        nodes.sort_by(|left, right| left.fqn.cmp(&right.fqn));
        edges.sort_by(|left, right| {
            left.source_fqn
                .cmp(&right.source_fqn)
                .then_with(|| left.target_fqn.cmp(&right.target_fqn))
        });

        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            if node.job_id != job_id {
                return Err(GraphError::ForeignNode {
                    fqn: node.fqn.clone(),
                    expected: job_id.to_owned(),
                    found: node.job_id.clone(),
                });
            }
            if index.insert(node.fqn.clone(), position).is_some() {
                return Err(GraphError::DuplicateNode(node.fqn.clone()));
            }
        }

        let mut outgoing = vec![Vec::new(); nodes.len()];
        for (position, edge) in edges.iter().enumerate() {
            if edge.source_fqn == edge.target_fqn {
                return Err(GraphError::SelfEdge(edge.source_fqn.clone()));
            }
            if position > 0
                && edges[position - 1].source_fqn == edge.source_fqn
                && edges[position - 1].target_fqn == edge.target_fqn
            {
                return Err(GraphError::DuplicateEdge(
                    edge.source_fqn.clone(),
                    edge.target_fqn.clone(),
                ));
            }

            let source = lookup(&index, edge, &edge.source_fqn)?;
            lookup(&index, edge, &edge.target_fqn)?;
            outgoing[source].push(position);
        }

        Ok(Self {
            job_id: job_id.to_owned(),
            nodes,
            edges,
            index,
            outgoing,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn nodes(&self) -> &[ClassNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Dependency] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, fqn: &str) -> bool {
        self.index.contains_key(fqn)
    }

    pub fn index_of(&self, fqn: &str) -> Option<usize> {
        self.index.get(fqn).copied()
    }

    pub fn node(&self, fqn: &str) -> Option<&ClassNode> {
        self.index_of(fqn).map(|position| &self.nodes[position])
    }

    pub fn outgoing<'a>(&'a self, fqn: &str) -> impl Iterator<Item = &'a Dependency> + use<'a> {
        self.index_of(fqn)
            .map(|position| self.outgoing[position].as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |edge| &self.edges[*edge])
    }

    pub fn edge(&self, source_fqn: &str, target_fqn: &str) -> Option<&Dependency> {
        self.outgoing(source_fqn)
            .find(|edge| edge.target_fqn == target_fqn)
    }

    /// Symmetric relationship strength between node indices: `a -> b` and
    /// `b -> a` add up into one `(min, max)` pair. Zero weights count as 1.0.
    pub fn undirected_weights(&self) -> Vec<(usize, usize, f64)> {
        let mut pairs = BTreeMap::<(usize, usize), f64>::new();
        for edge in &self.edges {
            let (Some(source), Some(target)) = (
                self.index_of(&edge.source_fqn),
                self.index_of(&edge.target_fqn),
            ) else {
                continue;
            };
            let key = (source.min(target), source.max(target));
            *pairs.entry(key).or_insert(0.0) += f64::from(edge.weight.max(1));
        }

        pairs
            .into_iter()
            .map(|((left, right), weight)| (left, right, weight))
            .collect()
    }

    /// Per-kind reference counts summed over every source-derived edge.
    pub fn total_breakdown(&self) -> DependencyBreakdown {
        let mut total = DependencyBreakdown::default();
        for breakdown in self.edges.iter().filter_map(|edge| edge.breakdown.as_ref()) {
            total.merge(breakdown);
        }
        total
    }
}

fn lookup(
    index: &HashMap<String, usize>,
    edge: &Dependency,
    fqn: &str,
) -> Result<usize, GraphError> {
    index
        .get(fqn)
        .copied()
        .ok_or_else(|| GraphError::MissingEndpoint {
            source_fqn: edge.source_fqn.clone(),
            target_fqn: edge.target_fqn.clone(),
            missing: fqn.to_owned(),
        })
}
