use std::path::PathBuf;

use carve_core::{SourceReference, StrategyKind};
use clap::{Args, Parser, Subcommand};

use crate::logging::LogFormat;

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct AnalyzeArgs {
    #[arg(
        long,
        conflicts_with_all = ["artifact", "include", "exclude"],
        required_unless_present = "artifact",
        help = "Root of a Java source tree"
    )]
    pub source: Option<PathBuf>,

    #[arg(long, requires = "include", help = "Compiled archive (jar) to analyze")]
    pub artifact: Option<PathBuf>,

    #[arg(long, help = "Package prefix the artifact analysis is restricted to")]
    pub include: Option<String>,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "PREFIX",
        help = "Comma-separated package prefixes to leave out of the artifact analysis"
    )]
    pub exclude: Vec<String>,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "STRATEGY",
        value_parser = parse_strategy,
        help = "Comma-separated strategies (default: [strategies].enabled from config)"
    )]
    pub strategies: Vec<StrategyKind>,
}

impl AnalyzeArgs {
    pub fn source_reference(&self) -> Option<SourceReference> {
        if let Some(root) = &self.source {
            return Some(SourceReference::SourceTree { root: root.clone() });
        }
        let archive_path = self.artifact.clone()?;
        Some(SourceReference::Artifact {
            archive_path,
            include_prefix: self.include.clone().unwrap_or_default(),
            exclude_prefixes: self.exclude.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct JobArgs {
    #[arg(help = "Job id")]
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Extract, partition and score a codebase, then print the report
    Analyze(AnalyzeArgs),
    /// Show a job's status and failure reason
    Status(JobArgs),
    /// Print the decomposition report of a job
    Report(JobArgs),
    /// Reset a finished job and run it again
    Restart(JobArgs),
    /// List all jobs
    Jobs,
    /// Mark jobs left running by a crashed process as failed so they can be restarted
    Recover,
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "CARVE microservice decomposition engine")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .carve/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_strategy(value: &str) -> Result<StrategyKind, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn analyze_source_tree_with_strategies() {
        let cli = Cli::try_parse_from([
            "carved",
            "--workspace",
            "/tmp/ws",
            "analyze",
            "--source",
            "/repo",
            "--strategies",
            "louvain,domain_driven",
        ])
        .expect("analyze should parse");

        assert_eq!(cli.log_format, LogFormat::Human);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(
                    args.strategies,
                    vec![StrategyKind::Louvain, StrategyKind::DomainDriven]
                );
                assert_eq!(
                    args.source_reference(),
                    Some(SourceReference::SourceTree {
                        root: PathBuf::from("/repo")
                    })
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn analyze_artifact_collects_prefixes() {
        let cli = Cli::try_parse_from([
            "carved",
            "analyze",
            "--artifact",
            "app.jar",
            "--include",
            "com.acme",
            "--exclude",
            "com.acme.legacy,com.acme.generated",
            "--log-format",
            "json",
        ])
        .expect("artifact analyze should parse");

        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Analyze(args) => {
                assert!(args.strategies.is_empty());
                assert_eq!(
                    args.source_reference(),
                    Some(SourceReference::Artifact {
                        archive_path: PathBuf::from("app.jar"),
                        include_prefix: "com.acme".to_owned(),
                        exclude_prefixes: vec![
                            "com.acme.legacy".to_owned(),
                            "com.acme.generated".to_owned()
                        ],
                    })
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn analyze_rejects_unknown_strategy_and_missing_source() {
        assert!(
            Cli::try_parse_from(["carved", "analyze", "--source", ".", "--strategies", "kmeans"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["carved", "analyze"]).is_err());
        assert!(Cli::try_parse_from(["carved", "analyze", "--artifact", "app.jar"]).is_err());
    }

    #[test]
    fn job_subcommands_take_an_id() {
        let cli = Cli::try_parse_from(["carved", "restart", "job-1"]).expect("restart");
        assert_eq!(
            cli.command,
            Commands::Restart(JobArgs {
                job_id: "job-1".to_owned()
            })
        );
        let cli = Cli::try_parse_from(["carved", "jobs"]).expect("jobs");
        assert_eq!(cli.command, Commands::Jobs);
        let cli = Cli::try_parse_from(["carved", "recover"]).expect("recover");
        assert_eq!(cli.command, Commands::Recover);
    }
}
