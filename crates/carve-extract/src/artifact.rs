use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use carve_config::ArtifactConfig;
use carve_core::{ExtractionOutput, ExtractorKind, RawEdge, SourceReference};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{DependencyExtractor, ExtractError};

const SUMMARY_DOT: &str = "summary.dot";
const INNER_TYPE_SEPARATOR: char = '$';

/// Runs a class-level dependency analyzer (`jdeps` by default) against a
/// compiled archive and reads its DOT output.
#[derive(Debug, Clone, Default)]
pub struct ArtifactExtractor {
    config: ArtifactConfig,
}

/// Package filters for one artifact run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageScope {
    include_prefix: String,
    exclude_prefixes: Vec<String>,
}

impl PackageScope {
    pub fn new(include_prefix: &str, exclude_prefixes: &[String]) -> Result<Self, ExtractError> {
        let include_prefix = include_prefix.trim().trim_end_matches('.').to_owned();
        if include_prefix.is_empty() {
            return Err(ExtractError::InvalidSource(
                "artifact include prefix must not be empty".to_owned(),
            ));
        }
        let exclude_prefixes = exclude_prefixes
            .iter()
            .map(|prefix| prefix.trim().trim_end_matches('.').to_owned())
            .filter(|prefix| !prefix.is_empty())
            .collect();
        Ok(Self {
            include_prefix,
            exclude_prefixes,
        })
    }

    /// True when `fqn` is inside the include prefix, outside every excluded
    /// prefix and not an inner type.
    pub fn admits(&self, fqn: &str) -> bool {
        !fqn.contains(INNER_TYPE_SEPARATOR)
            && in_package(fqn, &self.include_prefix)
            && !self
                .exclude_prefixes
                .iter()
                .any(|prefix| in_package(fqn, prefix))
    }

    fn include_pattern(&self) -> String {
        package_pattern(&self.include_prefix)
    }

    fn exclude_patterns(&self) -> impl Iterator<Item = String> + '_ {
        self.exclude_prefixes
            .iter()
            .map(|prefix| package_pattern(prefix))
    }
}

impl ArtifactExtractor {
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }

    /// Full argument list for one run, tool name excluded.
    pub fn tool_args(&self, scope: &PackageScope, archive: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = self.config.extra_args.clone();
        args.push("-verbose:class".to_owned());
        args.push("-include".to_owned());
        args.push(scope.include_pattern());
        for pattern in scope.exclude_patterns() {
            args.push("-filter".to_owned());
            args.push(pattern);
        }
        args.push("-dotoutput".to_owned());
        args.push(output_dir.display().to_string());
        args.push(archive.display().to_string());
        args
    }

    pub async fn extract_archive(
        &self,
        archive: &Path,
        scope: &PackageScope,
    ) -> Result<ExtractionOutput, ExtractError> {
        if !archive.is_file() {
            return Err(ExtractError::InvalidSource(format!(
                "artifact {} does not exist or is not a file",
                archive.display()
            )));
        }

        // Removed on drop, so every return path below cleans up.
        let output_dir = tempfile::Builder::new().prefix("carve-dot-").tempdir()?;
        let args = self.tool_args(scope, archive, output_dir.path());
        let tool = self.config.tool.as_str();
        debug!(tool, args = ?args, "running artifact dependency tool");

        let mut command = Command::new(tool);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ExtractError::ToolSpawn {
                    tool: tool.to_owned(),
                    source,
                });
            }
            Err(_) => {
                return Err(ExtractError::ToolTimeout {
                    tool: tool.to_owned(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(ExtractError::ToolFailed {
                tool: tool.to_owned(),
                status: output
                    .status
                    .code()
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_owned()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let mut edges = BTreeSet::new();
        for dot_file in dot_files(output_dir.path())? {
            let content = tokio::fs::read_to_string(&dot_file).await?;
            edges.extend(parse_dot(&content, scope)?);
        }

        let edges = edges
            .into_iter()
            .map(|(source, target)| RawEdge::unweighted(source, target))
            .collect::<Vec<_>>();
        info!(
            archive = %archive.display(),
            include = %scope.include_prefix,
            edges = edges.len(),
            "artifact extraction finished"
        );

        Ok(ExtractionOutput {
            declared: Vec::new(),
            edges,
        })
    }
}

#[async_trait]
impl DependencyExtractor for ArtifactExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Artifact
    }

    async fn extract(&self, source: &SourceReference) -> Result<ExtractionOutput, ExtractError> {
        let SourceReference::Artifact {
            archive_path,
            include_prefix,
            exclude_prefixes,
        } = source
        else {
            return Err(ExtractError::InvalidSource(format!(
                "artifact extractor cannot read {}",
                source.describe()
            )));
        };

        let scope = PackageScope::new(include_prefix, exclude_prefixes)?;
        self.extract_archive(archive_path, &scope).await
    }
}

/// Class-to-class pairs from one DOT file, filtered through `scope`. Self
/// edges are dropped.
pub fn parse_dot(
    content: &str,
    scope: &PackageScope,
) -> Result<BTreeSet<(String, String)>, ExtractError> {
    let edge_re = Regex::new(r#""([^"]+)"\s*->\s*"([^"]+)""#)?;
    let mut edges = BTreeSet::new();
    for captures in edge_re.captures_iter(content) {
        let source = strip_annotation(&captures[1]);
        let target = strip_annotation(&captures[2]);
        if source == target || !scope.admits(source) || !scope.admits(target) {
            continue;
        }
        edges.insert((source.to_owned(), target.to_owned()));
    }
    Ok(edges)
}

fn dot_files(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_dot = path.extension().is_some_and(|ext| ext == "dot");
        let is_summary = path.file_name().is_some_and(|name| name == SUMMARY_DOT);
        if is_dot && !is_summary {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        warn!(dir = %dir.display(), "artifact tool wrote no class-level DOT output");
    }
    Ok(files)
}

/// `"java.util.List (java.base)"` names the archive or module after the
/// class; only the class name matters.
fn strip_annotation(name: &str) -> &str {
    name.split(" (").next().unwrap_or(name).trim()
}

fn in_package(fqn: &str, prefix: &str) -> bool {
    fqn.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.'))
}

fn package_pattern(prefix: &str) -> String {
    format!(r"^{}\..*", regex::escape(prefix))
}
