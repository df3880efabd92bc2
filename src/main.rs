mod catalog;
mod cli;
mod config;
mod error;
mod logging;
mod orchestrator;
mod pipeline;
mod report;
mod runner;
mod ui;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;
use tracing::{info, warn};

use catalog::MetricCatalog;
use cli::{Cli, parse_error_exit_code};
use config::PipelineConfig;
use orchestrator::{BatchOrchestrator, BatchRequest, RunSummary};
use runner::ProcessRunner;
use ui::BatchProgress;

/// Exit status when the batch was interrupted.
const EXIT_CANCELLED: u8 = 130;
/// Exit status in strict mode when anything failed.
const EXIT_FAILURES: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        return ExitCode::from(1);
    }
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(parse_error_exit_code(&err));
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

/// Validates everything up front, then runs the batch with the run log attached.
async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(secs) = cli.timeout_secs {
        config.timeout_secs = secs;
    }
    if let Some(jobs) = cli.jobs {
        config.max_parallel_jobs = jobs;
    }
    config.validate()?;

    let request = BatchRequest {
        identification_path: cli.identification_file.clone(),
        spectra_paths: cli.spectra_file.clone(),
        output_directory: cli.output_directory.clone(),
        temp_directory: cli.temp_root(),
    };
    request.validate()?;
    let catalog = MetricCatalog::load(config.metric_definitions(), &config.scripts_dir)?;
    request.create_output_directory()?;

    let (dispatch, log_path) = logging::file_dispatch(&request.output_directory, cli.verbose)?;
    let code = execute(&cli, &config, &catalog, &request)
        .with_subscriber(dispatch)
        .await;
    eprintln!("log written to {}", log_path.display());
    Ok(code)
}

async fn execute(
    cli: &Cli,
    config: &PipelineConfig,
    catalog: &MetricCatalog,
    request: &BatchRequest,
) -> ExitCode {
    let runner = ProcessRunner::new(Duration::from_secs(config.timeout_secs));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        timeout_secs = runner.timeout().as_secs(),
        parallel_jobs = config.max_parallel_jobs,
        scripts_dir = %config.scripts_dir.display(),
        "qcml-pipeline starting"
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let progress = BatchProgress::start(request.spectra_paths.len());
    let summary = BatchOrchestrator::new(&runner, &config.tools, catalog, &progress, cancel_rx)
        .with_max_parallel_jobs(config.max_parallel_jobs)
        .run(request)
        .await;
    progress.finish(&summary);
    if cli.json {
        progress.print_summary(&summary);
    }

    if let Err(err) = write_summary(&summary, &request.output_directory).await {
        warn!("{err:#}");
    }
    if let Some(output_file) = &cli.output_file {
        copy_final_report(&summary, output_file).await;
    }

    if summary.was_cancelled() {
        warn!("batch cancelled");
        ExitCode::from(EXIT_CANCELLED)
    } else if cli.strict && summary.has_failures() {
        ExitCode::from(EXIT_FAILURES)
    } else {
        ExitCode::SUCCESS
    }
}

async fn write_summary(summary: &RunSummary, output_directory: &Path) -> Result<()> {
    let path = output_directory.join(summary.file_name());
    let json = serde_json::to_string_pretty(summary)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("failed to write run summary {}", path.display()))?;
    info!(summary = %path.display(), "run summary written");
    Ok(())
}

/// Copies the report to `output_file` when the batch produced exactly one.
async fn copy_final_report(summary: &RunSummary, output_file: &Path) {
    if summary.jobs.len() > 1 {
        warn!(
            output_file = %output_file.display(),
            "output file ignored: several spectra files were given"
        );
        return;
    }
    let reports = summary.reports();
    let [report] = reports.as_slice() else {
        warn!(
            output_file = %output_file.display(),
            "no report was built; output file not written"
        );
        return;
    };
    if is_same_file(report, output_file).await {
        info!(
            report = %report.display(),
            "output file is the report itself; nothing to copy"
        );
        return;
    }
    match tokio::fs::copy(report, output_file).await {
        Ok(_) => info!(
            report = %report.display(),
            output_file = %output_file.display(),
            "final report copied"
        ),
        Err(e) => warn!(
            output_file = %output_file.display(),
            "could not copy final report: {e}"
        ),
    }
}

/// Copying a file onto itself truncates it, so both paths are compared
/// after resolving links and relative components.
async fn is_same_file(a: &Path, b: &Path) -> bool {
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
