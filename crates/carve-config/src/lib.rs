use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use carve_core::StrategyKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CARVE_DIR_NAME: &str = ".carve";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_ARTIFACT_TOOL: &str = "jdeps";
pub const DEFAULT_ARTIFACT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CLUSTERING_ENDPOINT: &str = "http://127.0.0.1:7474";
pub const DEFAULT_CLUSTERING_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_MIN_NODES: usize = 2;
pub const DEFAULT_NAMING_API_KEY_ENV: &str = "CARVE_NAMING_API_KEY";
pub const DEFAULT_NAMING_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringBackend {
    #[default]
    Native,
    External,
}

impl ClusteringBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::External => "external",
        }
    }
}

impl std::str::FromStr for ClusteringBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "native" => Ok(Self::Native),
            "external" => Ok(Self::External),
            other => Err(format!(
                "invalid clustering backend '{other}', expected one of: native, external"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamingProviderKind {
    #[default]
    Mock,
    Http,
}

impl NamingProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Http => "http",
        }
    }
}

impl std::str::FromStr for NamingProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "mock" => Ok(Self::Mock),
            "http" => Ok(Self::Http),
            other => Err(format!(
                "invalid naming provider '{other}', expected one of: mock, http"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CarveConfig {
    #[serde(default)]
    pub artifact: ArtifactConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_tool")]
    pub tool: String,
    #[serde(default = "default_artifact_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            tool: default_artifact_tool(),
            timeout_secs: DEFAULT_ARTIFACT_TIMEOUT_SECS,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub include_tests: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: default_exclude_dirs(),
            include_tests: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default = "default_enabled_strategies")]
    pub enabled: Vec<StrategyKind>,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_strategies(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default)]
    pub backend: ClusteringBackend,
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_min_nodes")]
    pub min_nodes: usize,
    #[serde(default = "default_clustering_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_clustering_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            backend: ClusteringBackend::Native,
            resolution: default_resolution(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            min_nodes: DEFAULT_MIN_NODES,
            endpoint: default_clustering_endpoint(),
            timeout_secs: DEFAULT_CLUSTERING_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default)]
    pub provider: NamingProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_naming_api_key_env")]
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_naming_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            provider: NamingProviderKind::Mock,
            endpoint: None,
            api_key_env: default_naming_api_key_env(),
            model: None,
            timeout_secs: DEFAULT_NAMING_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn carve_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(CARVE_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    carve_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(workspace_root: impl AsRef<Path>) -> Result<CarveConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(CarveConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: CarveConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<CarveConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(carve_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = CarveConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Non-fatal problems worth surfacing at startup. The pipeline still runs with
/// the normalized values.
pub fn validate_config(config: &CarveConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.strategies.enabled.is_empty() {
        warnings.push(ConfigWarning {
            code: "strategies_empty",
            message: "strategies.enabled is empty; jobs must name their strategies explicitly"
                .to_owned(),
        });
    }
    if config.artifact.timeout_secs == 0 {
        warnings.push(ConfigWarning {
            code: "artifact_timeout_zero",
            message: "artifact.timeout_secs is 0; artifact extraction is bounded to 1 second"
                .to_owned(),
        });
    }
    if !(config.clustering.resolution.is_finite() && config.clustering.resolution > 0.0) {
        warnings.push(ConfigWarning {
            code: "clustering_resolution_invalid",
            message: format!(
                "clustering.resolution must be a positive number, got {}",
                config.clustering.resolution
            ),
        });
    }
    if config.clustering.backend == ClusteringBackend::External
        && config.clustering.endpoint.is_empty()
    {
        warnings.push(ConfigWarning {
            code: "clustering_endpoint_missing",
            message: "clustering.backend is external but clustering.endpoint is empty".to_owned(),
        });
    }
    if config.naming.provider == NamingProviderKind::Http && config.naming.endpoint.is_none() {
        warnings.push(ConfigWarning {
            code: "naming_endpoint_missing",
            message: "naming.provider is http but naming.endpoint is not set; boundaries will stay unnamed"
                .to_owned(),
        });
    }

    warnings
}

fn default_artifact_tool() -> String {
    DEFAULT_ARTIFACT_TOOL.to_owned()
}

fn default_artifact_timeout_secs() -> u64 {
    DEFAULT_ARTIFACT_TIMEOUT_SECS
}

fn default_exclude_dirs() -> Vec<String> {
    ["target", "build", ".git", "node_modules"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_enabled_strategies() -> Vec<StrategyKind> {
    vec![
        StrategyKind::Louvain,
        StrategyKind::Leiden,
        StrategyKind::LabelPropagation,
        StrategyKind::DomainDriven,
        StrategyKind::ActorDriven,
    ]
}

fn default_resolution() -> f64 {
    1.0
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_min_nodes() -> usize {
    DEFAULT_MIN_NODES
}

fn default_clustering_endpoint() -> String {
    DEFAULT_CLUSTERING_ENDPOINT.to_owned()
}

fn default_clustering_timeout_secs() -> u64 {
    DEFAULT_CLUSTERING_TIMEOUT_SECS
}

fn default_naming_timeout_secs() -> u64 {
    DEFAULT_NAMING_TIMEOUT_SECS
}

fn default_naming_api_key_env() -> String {
    DEFAULT_NAMING_API_KEY_ENV.to_owned()
}

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: CarveConfig) -> CarveConfig {
    let tool = config.artifact.tool.trim();
    config.artifact.tool = if tool.is_empty() {
        default_artifact_tool()
    } else {
        tool.to_owned()
    };
    config.artifact.extra_args.retain(|arg| !arg.trim().is_empty());

    config.source.exclude_dirs = config
        .source
        .exclude_dirs
        .iter()
        .map(|dir| dir.trim().trim_matches('/').to_owned())
        .filter(|dir| !dir.is_empty())
        .collect();

    let mut seen = HashSet::new();
    config.strategies.enabled.retain(|kind| seen.insert(*kind));

    config.clustering.endpoint = config.clustering.endpoint.trim().to_owned();
    config.clustering.max_iterations = config.clustering.max_iterations.max(1);
    config.clustering.min_nodes = config.clustering.min_nodes.max(1);

    config.naming.endpoint = normalize_optional(config.naming.endpoint.take());
    config.naming.model = normalize_optional(config.naming.model.take());
    let api_key_env = config.naming.api_key_env.trim();
    if api_key_env.is_empty() {
        config.naming.api_key_env = default_naming_api_key_env();
    } else {
        config.naming.api_key_env = api_key_env.to_owned();
    }

    config.pipeline.max_concurrent_jobs = config.pipeline.max_concurrent_jobs.max(1);

    config
}
