use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use carve_config::ClusteringConfig;
use carve_core::{DependencyGraph, StrategyKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommunityError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid community response: {0}")]
    InvalidResponse(String),
    #[error("{0} has no community detection algorithm")]
    UnsupportedStrategy(StrategyKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedRelationship {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

/// The slice of one job's graph handed to the clustering service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphProjection {
    pub name: String,
    pub job_id: String,
    pub nodes: Vec<String>,
    pub relationships: Vec<ProjectedRelationship>,
}

impl GraphProjection {
    /// Undirected projection: both directions of a pair are folded into one
    /// relationship whose weight is their sum.
    pub fn from_graph(graph: &DependencyGraph, strategy: StrategyKind) -> Self {
        let nodes = graph
            .nodes()
            .iter()
            .map(|node| node.fqn.clone())
            .collect::<Vec<_>>();
        let relationships = graph
            .undirected_weights()
            .into_iter()
            .map(|(left, right, weight)| ProjectedRelationship {
                source: nodes[left].clone(),
                target: nodes[right].clone(),
                weight,
            })
            .collect();

        Self {
            name: projection_name(graph.job_id(), strategy),
            job_id: graph.job_id().to_owned(),
            nodes,
            relationships,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommunityAssignment {
    /// Node FQN to community id.
    pub communities: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modularity: Option<f64>,
}

/// External graph-clustering service. A projection lives on the server from
/// `create_projection` until `drop_projection`.
#[async_trait]
pub trait CommunityService: Send + Sync {
    async fn create_projection(&self, projection: &GraphProjection) -> Result<(), CommunityError>;

    async fn detect(
        &self,
        projection: &str,
        algorithm: &str,
    ) -> Result<CommunityAssignment, CommunityError>;

    async fn drop_projection(&self, projection: &str) -> Result<(), CommunityError>;
}

pub fn projection_name(job_id: &str, strategy: StrategyKind) -> String {
    format!("carve-{job_id}-{}", strategy.as_str())
}

pub fn algorithm_name(strategy: StrategyKind) -> Result<&'static str, CommunityError> {
    match strategy {
        StrategyKind::LabelPropagation => Ok("labelPropagation"),
        StrategyKind::Louvain => Ok("louvain"),
        StrategyKind::Leiden => Ok("leiden"),
        other => Err(CommunityError::UnsupportedStrategy(other)),
    }
}

#[derive(Debug, Clone)]
pub struct HttpCommunityService {
    client: reqwest::Client,
    endpoint: String,
    resolution: f64,
    max_iterations: usize,
}

impl HttpCommunityService {
    pub fn from_config(config: &ClusteringConfig) -> Result<Self, CommunityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim().trim_end_matches('/').to_owned(),
            resolution: config.resolution,
            max_iterations: config.max_iterations,
        })
    }

    fn projection_url(&self, projection: &str) -> String {
        format!("{}/projections/{projection}", self.endpoint)
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    assignments: Vec<NodeCommunity>,
    #[serde(default)]
    modularity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct NodeCommunity {
    node: String,
    community: i64,
}

#[async_trait]
impl CommunityService for HttpCommunityService {
    async fn create_projection(&self, projection: &GraphProjection) -> Result<(), CommunityError> {
        debug!(
            projection = %projection.name,
            nodes = projection.nodes.len(),
            relationships = projection.relationships.len(),
            "creating clustering projection"
        );
        self.client
            .post(format!("{}/projections", self.endpoint))
            .json(projection)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn detect(
        &self,
        projection: &str,
        algorithm: &str,
    ) -> Result<CommunityAssignment, CommunityError> {
        let body = serde_json::json!({
            "algorithm": algorithm,
            "relationshipWeightProperty": "weight",
            "resolution": self.resolution,
            "maxIterations": self.max_iterations,
        });
        let response: DetectResponse = self
            .client
            .post(format!("{}/communities", self.projection_url(projection)))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        assignment_from_response(response)
    }

    async fn drop_projection(&self, projection: &str) -> Result<(), CommunityError> {
        self.client
            .delete(self.projection_url(projection))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn assignment_from_response(response: DetectResponse) -> Result<CommunityAssignment, CommunityError> {
    let mut communities = BTreeMap::new();
    for entry in response.assignments {
        if let Some(previous) = communities.insert(entry.node.clone(), entry.community)
            && previous != entry.community
        {
            return Err(CommunityError::InvalidResponse(format!(
                "node {} assigned to communities {previous} and {}",
                entry.node, entry.community
            )));
        }
    }
    Ok(CommunityAssignment {
        communities,
        modularity: response.modularity.filter(|value| value.is_finite()),
    })
}
