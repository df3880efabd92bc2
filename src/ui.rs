//! Terminal progress for a batch: a job counter with spinner and coloured
//! per-item results.
//!
//! [`BatchProgress`] is the [`BatchObserver`] used by the binary. It uses
//! `indicatif` for the progress line and `console` for colours.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::catalog::MetricDefinition;
use crate::error::{BuildError, MetricError};
use crate::orchestrator::{BatchObserver, JobRecord, JobStatus, RunSummary};
use crate::report::{ReportArtifact, SpectraJob};

pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl BatchProgress {
    /// Starts the progress line for `total_jobs` spectra files.
    pub fn start(total_jobs: usize) -> Self {
        let pb = ProgressBar::new(total_jobs as u64);
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message("starting");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Clears the progress line and prints the totals.
    pub fn finish(&self, summary: &RunSummary) {
        self.pb.finish_and_clear();
        let reports = summary.reports().len();
        let total = summary.jobs.len();
        let style = if summary.has_failures() {
            &self.red
        } else {
            &self.green
        };
        println!(
            "{}",
            style.apply_to(format!("─── {reports}/{total} reports built ───"))
        );
        println!(
            "  metrics embedded: {}, failed: {}",
            summary.embedded_metrics(),
            summary.failed_metrics()
        );
        if summary.was_cancelled() {
            println!("  {}", self.yellow.apply_to("batch cancelled"));
        }
    }

    /// Prints the run summary as pretty JSON.
    pub fn print_summary(&self, summary: &RunSummary) {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("could not serialize run summary: {e}"),
        }
    }
}

impl BatchObserver for BatchProgress {
    fn job_started(&self, job: &SpectraJob) {
        self.pb
            .set_message(format!("building {}", job.spectra_path.display()));
    }

    fn build_failed(&self, error: &BuildError) {
        self.pb
            .println(format!("  {} {error}", self.red.apply_to("✗")));
    }

    fn report_built(&self, report: &ReportArtifact) {
        self.pb.println(format!(
            "  {} {}",
            self.green.apply_to("✓"),
            report.path.display()
        ));
    }

    fn metric_started(&self, report: &ReportArtifact, metric: &MetricDefinition) {
        let file = report
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.pb
            .set_message(format!("{file}: {} ({})", metric.name, metric.accession));
    }

    fn metric_finished(
        &self,
        _report: &ReportArtifact,
        metric: &MetricDefinition,
        result: Result<(), &MetricError>,
    ) {
        match result {
            Ok(()) => self.pb.println(format!(
                "    {} {}",
                self.green.apply_to("+"),
                self.dim.apply_to(&metric.name)
            )),
            Err(err) => self.pb.println(format!(
                "    {} {} [{}] {err}",
                self.yellow.apply_to("!"),
                metric.name,
                err.stage()
            )),
        }
    }

    fn job_finished(&self, record: &JobRecord) {
        if record.status == JobStatus::Cancelled && record.report_path.is_none() {
            self.pb.println(format!(
                "  {} {} (cancelled)",
                self.yellow.apply_to("-"),
                record.spectra_path.display()
            ));
        }
        self.pb.inc(1);
    }
}
