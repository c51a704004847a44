//! Human-readable names for proposed service boundaries.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use carve_config::{NamingConfig, NamingProviderKind};
use carve_core::{ClusterId, package_of, simple_name};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub const MOCK_MODEL_NAME: &str = "mock";
pub const UNNAMED_PROVIDER_NAME: &str = "none";

#[derive(Debug, Error)]
pub enum NameError {
    #[error("naming endpoint is not configured")]
    MissingEndpoint,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid naming response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub members: Vec<String>,
}

/// Suggests a name per cluster id. Clusters without a suggestion are simply
/// missing from the result.
#[async_trait]
pub trait NameSuggester: Send + Sync {
    async fn suggest_names(
        &self,
        clusters: &[ClusterSummary],
    ) -> Result<BTreeMap<ClusterId, String>, NameError>;
}

pub struct LoadedNameSuggester {
    pub suggester: Box<dyn NameSuggester>,
    pub provider_name: String,
    pub model_name: String,
}

/// Derives a name from the cluster id and the package most members share.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockNameSuggester;

#[async_trait]
impl NameSuggester for MockNameSuggester {
    async fn suggest_names(
        &self,
        clusters: &[ClusterSummary],
    ) -> Result<BTreeMap<ClusterId, String>, NameError> {
        Ok(clusters
            .iter()
            .map(|cluster| (cluster.id.clone(), mock_name(cluster)))
            .collect())
    }
}

fn mock_name(cluster: &ClusterSummary) -> String {
    let mut packages = BTreeMap::<&str, usize>::new();
    for member in &cluster.members {
        *packages.entry(simple_name(package_of(member))).or_default() += 1;
    }
    let dominant = packages
        .iter()
        .filter(|(package, _)| !package.is_empty())
        .max_by(|left, right| left.1.cmp(right.1).then_with(|| right.0.cmp(left.0)))
        .map(|(package, _)| *package);

    match dominant {
        Some(package) => format!("{package}-service-{}", cluster.id),
        None => format!("service-{}", cluster.id),
    }
}

/// Suggests nothing, so every boundary stays unnamed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnnamedSuggester;

#[async_trait]
impl NameSuggester for UnnamedSuggester {
    async fn suggest_names(
        &self,
        _clusters: &[ClusterSummary],
    ) -> Result<BTreeMap<ClusterId, String>, NameError> {
        Ok(BTreeMap::new())
    }
}

impl LoadedNameSuggester {
    pub fn unnamed() -> Self {
        Self {
            suggester: Box::new(UnnamedSuggester),
            provider_name: UNNAMED_PROVIDER_NAME.to_owned(),
            model_name: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpNameSuggester {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl HttpNameSuggester {
    /// Every request is bounded by `timeout`; a stalled service fails the
    /// naming call instead of holding up the job.
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NameError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NamesResponse {
    names: BTreeMap<ClusterId, String>,
}

#[async_trait]
impl NameSuggester for HttpNameSuggester {
    async fn suggest_names(
        &self,
        clusters: &[ClusterSummary],
    ) -> Result<BTreeMap<ClusterId, String>, NameError> {
        if clusters.is_empty() {
            return Ok(BTreeMap::new());
        }
        let body = json!({
            "model": self.model,
            "clusters": clusters,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response: NamesResponse = request.send().await?.error_for_status()?.json().await?;
        debug!(requested = clusters.len(), named = response.names.len(), "naming service replied");

        clean_names(clusters, response.names)
    }
}

/// Keeps names for requested clusters only, trimmed and non-empty.
fn clean_names(
    clusters: &[ClusterSummary],
    names: BTreeMap<ClusterId, String>,
) -> Result<BTreeMap<ClusterId, String>, NameError> {
    let mut cleaned = BTreeMap::new();
    for (id, name) in names {
        if !clusters.iter().any(|cluster| cluster.id == id) {
            return Err(NameError::InvalidResponse(format!(
                "name returned for unknown cluster {id}"
            )));
        }
        let name = name.trim();
        if !name.is_empty() {
            cleaned.insert(id, name.to_owned());
        }
    }
    Ok(cleaned)
}

pub fn load_name_suggester(config: &NamingConfig) -> Result<LoadedNameSuggester, NameError> {
    match config.provider {
        NamingProviderKind::Mock => Ok(LoadedNameSuggester {
            suggester: Box::new(MockNameSuggester),
            provider_name: NamingProviderKind::Mock.as_str().to_owned(),
            model_name: MOCK_MODEL_NAME.to_owned(),
        }),
        NamingProviderKind::Http => {
            let endpoint = config.endpoint.clone().ok_or(NameError::MissingEndpoint)?;
            let api_key = read_env_non_empty(&config.api_key_env);
            let model_name = config.model.clone().unwrap_or_default();
            Ok(LoadedNameSuggester {
                suggester: Box::new(HttpNameSuggester::new(
                    endpoint,
                    api_key,
                    config.model.clone(),
                    Duration::from_secs(config.timeout_secs.max(1)),
                )?),
                provider_name: NamingProviderKind::Http.as_str().to_owned(),
                model_name,
            })
        }
    }
}

fn read_env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
