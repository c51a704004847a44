use std::ffi::OsStr;

use anyhow::{Context, Result};
use carve_config::{config_path, ensure_workspace_config, validate_config};
use carved::cli::Cli;
use carved::commands::run_command;
use carved::logging::init_logging;
use clap::Parser;
use tracing::warn;

fn main() -> Result<()> {
    let cli = parse_cli();
    run(cli)
}

fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.log_format)?;

    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;
    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    for warning in validate_config(&config) {
        warn!(code = warning.code, "{}", warning.message);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let mut out = std::io::stdout().lock();
    runtime.block_on(run_command(&workspace, &config, cli.command, &mut out))
}
