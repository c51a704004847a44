use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use carve_config::CarveConfig;
use carve_core::{DecompositionJob, JobStatus};
use carve_store::{DecompositionStore, SqliteStore};
use serde::Serialize;

use crate::cli::{AnalyzeArgs, Commands};
use crate::orchestrator::{load_job, load_report};
use crate::{DecompositionPipeline, JobDispatcher, JobEvent, Orchestrator};

/// Opens the workspace store and runs one command, writing its output to
/// `out`. Only commands that run jobs build the pipeline.
pub async fn run_command(
    workspace: &Path,
    config: &CarveConfig,
    command: Commands,
    out: &mut dyn Write,
) -> Result<()> {
    let store: Arc<dyn DecompositionStore> = Arc::new(
        SqliteStore::open(workspace)
            .with_context(|| format!("failed to open store in {}", workspace.display()))?,
    );

    match command {
        Commands::Analyze(args) => {
            let orchestrator = orchestrator(config, store)?;
            analyze(&orchestrator, config, &args, out).await
        }
        Commands::Restart(args) => {
            let orchestrator = orchestrator(config, store)?;
            orchestrator.restart(&args.job_id).await?;
            dispatch(&orchestrator, config, JobEvent::Restarted(args.job_id.clone())).await?;
            finish(&orchestrator, &args.job_id, out)
        }
        Commands::Recover => {
            let orchestrator = orchestrator(config, store)?;
            for job in orchestrator.recover_interrupted()? {
                writeln!(out, "{}", job_line(&job))?;
            }
            Ok(())
        }
        Commands::Status(args) => {
            let job = load_job(store.as_ref(), &args.job_id)?;
            write_json(out, &job)
        }
        Commands::Report(args) => {
            let report = load_report(store.as_ref(), &args.job_id)?;
            write_json(out, &report)
        }
        Commands::Jobs => {
            for job in store.list_jobs()? {
                writeln!(out, "{}", job_line(&job))?;
            }
            Ok(())
        }
    }
}

fn orchestrator(config: &CarveConfig, store: Arc<dyn DecompositionStore>) -> Result<Arc<Orchestrator>> {
    let pipeline = DecompositionPipeline::from_config(config, store.clone())?;
    Ok(Arc::new(Orchestrator::new(pipeline, store)))
}

async fn analyze(
    orchestrator: &Arc<Orchestrator>,
    config: &CarveConfig,
    args: &AnalyzeArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let source = args
        .source_reference()
        .ok_or_else(|| anyhow!("analyze needs --source or --artifact"))?;
    let strategies = if args.strategies.is_empty() {
        config.strategies.enabled.clone()
    } else {
        args.strategies.clone()
    };

    let job = orchestrator.create_job(source, &strategies)?;
    dispatch(orchestrator, config, JobEvent::Created(job.id.clone())).await?;
    finish(orchestrator, &job.id, out)
}

async fn dispatch(orchestrator: &Arc<Orchestrator>, config: &CarveConfig, event: JobEvent) -> Result<()> {
    let dispatcher = JobDispatcher::spawn(orchestrator.clone(), config.pipeline.max_concurrent_jobs);
    dispatcher.submit(event).await?;
    dispatcher.shutdown().await?;
    Ok(())
}

/// Prints the report and turns a failed job into a command error.
fn finish(orchestrator: &Orchestrator, job_id: &str, out: &mut dyn Write) -> Result<()> {
    let report = orchestrator.report(job_id)?;
    write_json(out, &report)?;
    if report.job.status == JobStatus::Failed {
        bail!(
            "job {job_id} failed: {}",
            report.job.failure_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}

fn job_line(job: &DecompositionJob) -> String {
    let strategies = job
        .strategies
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}\t{}\t{}\t{}",
        job.id,
        job.status,
        strategies,
        job.source.describe()
    )
}

fn write_json(out: &mut dyn Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("failed to write JSON output")?;
    writeln!(out)?;
    Ok(())
}
