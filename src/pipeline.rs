//! The export → plot → embed sequence that adds one metric plot to a report.
//!
//! Stages run strictly in order and the first failing stage ends the
//! invocation. Nothing is rolled back: export files already written stay in
//! the scratch directory, and an embedder that fails half-way may have
//! touched the report.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::catalog::MetricDefinition;
use crate::config::ToolsConfig;
use crate::error::{FailureReason, MetricError};
use crate::report::ReportArtifact;
use crate::runner::{Invocation, StageResult, ToolRunner};

/// The three stages of a metric pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Export,
    Plot,
    Embed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Export => write!(f, "EXPORT"),
            Stage::Plot => write!(f, "PLOT"),
            Stage::Embed => write!(f, "EMBED"),
        }
    }
}

/// One series written to CSV by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSeries {
    pub accession: String,
    pub path: PathBuf,
}

/// Scratch file name for an accession; `:` is not portable in file names.
fn accession_file_stem(accession: &str) -> String {
    accession.replace(':', "_")
}

pub fn export_path(temp_dir: &Path, accession: &str) -> PathBuf {
    temp_dir.join(format!("{}.csv", accession_file_stem(accession)))
}

pub fn plot_path(temp_dir: &Path, metric_accession: &str) -> PathBuf {
    temp_dir.join(format!("{}.png", accession_file_stem(metric_accession)))
}

/// Applies metric definitions to reports using the configured tools.
pub struct MetricPipeline<'a, R> {
    runner: &'a R,
    tools: &'a ToolsConfig,
}

impl<'a, R: ToolRunner> MetricPipeline<'a, R> {
    pub fn new(runner: &'a R, tools: &'a ToolsConfig) -> Self {
        Self { runner, tools }
    }

    /// Runs all three stages for `metric` against `report`, writing scratch
    /// files to `temp_dir`. Returns the same report once the plot is embedded.
    #[instrument(
        skip_all,
        fields(report = %report.path.display(), metric = %metric.accession)
    )]
    pub async fn apply<'r>(
        &self,
        report: &'r ReportArtifact,
        metric: &MetricDefinition,
        temp_dir: &Path,
    ) -> Result<&'r ReportArtifact, MetricError> {
        let result = self.run_stages(report, metric, temp_dir).await;
        match &result {
            Ok(()) => info!(name = %metric.name, "metric embedded"),
            Err(err) => warn!(
                name = %metric.name,
                stage = %err.stage(),
                timed_out = err.is_timeout(),
                "could not add metric to {}: {err}",
                report.path.display()
            ),
        }
        result.map(|()| report)
    }

    async fn run_stages(
        &self,
        report: &ReportArtifact,
        metric: &MetricDefinition,
        temp_dir: &Path,
    ) -> Result<(), MetricError> {
        let series = self.export(report, metric, temp_dir).await?;
        let plot = self.plot(metric, &series, temp_dir).await?;
        self.embed(report, metric, &plot).await
    }

    /// EXPORT: one extractor call per required series, in declared order.
    async fn export(
        &self,
        report: &ReportArtifact,
        metric: &MetricDefinition,
        temp_dir: &Path,
    ) -> Result<Vec<ExportedSeries>, MetricError> {
        let mut series = Vec::with_capacity(metric.required_exports.len());
        for accession in &metric.required_exports {
            let path = export_path(temp_dir, accession);
            let invocation = Invocation::new(&self.tools.extractor)
                .arg("-in")
                .path(&report.path)
                .arg("-out_csv")
                .path(&path)
                .opt("-qp", accession);

            self.expect_success(Stage::Export, &invocation)
                .await
                .map_err(|reason| MetricError::ExportFailed {
                    accession: accession.clone(),
                    reason,
                })?;
            series.push(ExportedSeries {
                accession: accession.clone(),
                path,
            });
        }
        Ok(series)
    }

    /// PLOT: `<plotter> <script> <csv>... <png>`.
    async fn plot(
        &self,
        metric: &MetricDefinition,
        series: &[ExportedSeries],
        temp_dir: &Path,
    ) -> Result<PathBuf, MetricError> {
        let png = plot_path(temp_dir, &metric.accession);
        debug!(
            series = %series.iter().map(|s| s.accession.as_str()).collect::<Vec<_>>().join(","),
            "plotting exported series"
        );
        let invocation = series
            .iter()
            .fold(
                Invocation::new(&self.tools.plotter).path(&metric.plot_script),
                |inv, s| inv.path(&s.path),
            )
            .path(&png);

        self.expect_success(Stage::Plot, &invocation)
            .await
            .map_err(|reason| MetricError::PlotFailed {
                metric: metric.accession.clone(),
                reason,
            })?;
        Ok(png)
    }

    /// EMBED: rewrites the report in place with the plot attached.
    async fn embed(
        &self,
        report: &ReportArtifact,
        metric: &MetricDefinition,
        plot: &Path,
    ) -> Result<(), MetricError> {
        let invocation = Invocation::new(&self.tools.embedder)
            .arg("-in")
            .path(&report.path)
            .arg("-out")
            .path(&report.path)
            .arg("-plot")
            .path(plot)
            .opt("-qp_att_acc", &metric.parent_accession)
            .opt("-cv_acc", &metric.accession);

        self.expect_success(Stage::Embed, &invocation)
            .await
            .map_err(|reason| MetricError::EmbedFailed {
                metric: metric.accession.clone(),
                reason,
            })
    }

    async fn expect_success(
        &self,
        stage: Stage,
        invocation: &Invocation,
    ) -> Result<(), FailureReason> {
        debug!(%stage, command = %invocation, "running stage");
        match self.runner.run(invocation).await {
            StageResult::Success { .. } => Ok(()),
            StageResult::Failure { reason, .. } => Err(reason),
        }
    }
}
