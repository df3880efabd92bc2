use std::path::PathBuf;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::config::ToolsConfig;
use crate::error::{BuildError, ConfigError, MetricError};
use crate::pipeline::{MetricPipeline, Stage};
use crate::report::{ReportArtifact, ReportBuilder, SpectraJob, report_path_for};
use crate::runner::ToolRunner;

/// The inputs of one batch: an identification file shared by all spectra files.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub identification_path: PathBuf,
    pub spectra_paths: Vec<PathBuf>,
    pub output_directory: PathBuf,
    pub temp_directory: PathBuf,
}

impl BatchRequest {
    /// Checks inputs before any tool runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spectra_paths.is_empty() {
            return Err(ConfigError::NoSpectraFiles);
        }
        if !self.identification_path.is_file() {
            return Err(ConfigError::MissingInput {
                what: "identification file",
                path: self.identification_path.clone(),
            });
        }

        let mut reports: Vec<(PathBuf, &PathBuf)> = Vec::with_capacity(self.spectra_paths.len());
        for spectra in &self.spectra_paths {
            if !spectra.is_file() {
                return Err(ConfigError::MissingInput {
                    what: "spectra file",
                    path: spectra.clone(),
                });
            }
            let report = report_path_for(&self.output_directory, spectra);
            if let Some((_, first)) = reports.iter().find(|(r, _)| *r == report) {
                return Err(ConfigError::DuplicateReport {
                    first: (*first).clone(),
                    second: spectra.clone(),
                    report,
                });
            }
            reports.push((report, spectra));
        }
        Ok(())
    }

    /// Creates the output directory if it does not exist yet.
    pub fn create_output_directory(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_directory).map_err(|source| {
            ConfigError::OutputDirectory {
                path: self.output_directory.clone(),
                source,
            }
        })
    }

    /// One job per spectra file, in input order.
    pub fn jobs(&self) -> Vec<SpectraJob> {
        self.spectra_paths
            .iter()
            .map(|spectra| {
                SpectraJob::new(
                    &self.identification_path,
                    spectra,
                    &self.output_directory,
                    &self.temp_directory,
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Report built and every metric embedded.
    Completed,
    /// Report built, at least one metric failed.
    MetricsFailed,
    BuildFailed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Embedded,
    Failed,
    Cancelled,
}

/// Outcome of one metric against one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub accession: String,
    pub status: MetricStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricRecord {
    fn new(metric: &MetricDefinition, status: MetricStatus) -> Self {
        Self {
            name: metric.name.clone(),
            accession: metric.accession.clone(),
            status,
            stage: None,
            error: None,
        }
    }

    fn failed(metric: &MetricDefinition, err: &MetricError) -> Self {
        Self {
            stage: Some(err.stage()),
            error: Some(err.to_string()),
            ..Self::new(metric, MetricStatus::Failed)
        }
    }
}

/// Outcome of one spectra file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub spectra_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: Vec<MetricRecord>,
}

impl JobRecord {
    fn cancelled(job: &SpectraJob) -> Self {
        Self {
            spectra_path: job.spectra_path.clone(),
            report_path: None,
            status: JobStatus::Cancelled,
            error: None,
            metrics: Vec::new(),
        }
    }

    fn build_failed(err: &BuildError) -> Self {
        Self {
            spectra_path: err.job.spectra_path.clone(),
            report_path: None,
            status: JobStatus::BuildFailed,
            error: Some(err.reason.to_string()),
            metrics: Vec::new(),
        }
    }

    fn built(report: &ReportArtifact, metrics: Vec<MetricRecord>) -> Self {
        let status = if metrics.iter().any(|m| m.status == MetricStatus::Failed) {
            JobStatus::MetricsFailed
        } else if metrics.iter().any(|m| m.status == MetricStatus::Cancelled) {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        Self {
            spectra_path: report.job.spectra_path.clone(),
            report_path: Some(report.path.clone()),
            status,
            error: None,
            metrics,
        }
    }
}

/// Structured record of a whole batch, written next to the reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub jobs: Vec<JobRecord>,
}

impl RunSummary {
    pub fn file_name(&self) -> String {
        format!("qcml-run-{}.json", self.run_id)
    }

    /// Paths of every report the calculator produced.
    pub fn reports(&self) -> Vec<&PathBuf> {
        self.jobs.iter().filter_map(|j| j.report_path.as_ref()).collect()
    }

    pub fn failed_builds(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::BuildFailed)
            .count()
    }

    pub fn failed_metrics(&self) -> usize {
        self.jobs
            .iter()
            .flat_map(|j| &j.metrics)
            .filter(|m| m.status == MetricStatus::Failed)
            .count()
    }

    pub fn embedded_metrics(&self) -> usize {
        self.jobs
            .iter()
            .flat_map(|j| &j.metrics)
            .filter(|m| m.status == MetricStatus::Embedded)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_builds() > 0 || self.failed_metrics() > 0
    }

    /// True when any job or metric was skipped because of cancellation,
    /// including jobs whose status already records a failed metric.
    pub fn was_cancelled(&self) -> bool {
        self.jobs.iter().any(|j| {
            j.status == JobStatus::Cancelled
                || j.metrics.iter().any(|m| m.status == MetricStatus::Cancelled)
        })
    }
}

/// Receives progress notifications while a batch runs.
pub trait BatchObserver {
    fn job_started(&self, _job: &SpectraJob) {}
    fn report_built(&self, _report: &ReportArtifact) {}
    fn build_failed(&self, _error: &BuildError) {}
    fn metric_started(&self, _report: &ReportArtifact, _metric: &MetricDefinition) {}
    fn metric_finished(
        &self,
        _report: &ReportArtifact,
        _metric: &MetricDefinition,
        _result: Result<(), &MetricError>,
    ) {
    }
    fn job_finished(&self, _record: &JobRecord) {}
}

/// Observer that ignores every notification.
#[cfg(test)]
pub struct SilentObserver;

#[cfg(test)]
impl BatchObserver for SilentObserver {}

/// Drives every spectra file through report building and the metric catalog.
///
/// A failed build skips that file's metrics; a failed metric moves on to the
/// next one. Neither stops the batch. Metrics of one report run one after
/// another, so the report never has two embedders writing to it.
pub struct BatchOrchestrator<'a, R> {
    runner: &'a R,
    tools: &'a ToolsConfig,
    catalog: &'a MetricCatalog,
    observer: &'a dyn BatchObserver,
    cancel: watch::Receiver<bool>,
    max_parallel_jobs: usize,
}

impl<'a, R: ToolRunner> BatchOrchestrator<'a, R> {
    pub fn new(
        runner: &'a R,
        tools: &'a ToolsConfig,
        catalog: &'a MetricCatalog,
        observer: &'a dyn BatchObserver,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            runner,
            tools,
            catalog,
            observer,
            cancel,
            max_parallel_jobs: 1,
        }
    }

    /// Number of spectra files processed at the same time.
    pub fn with_max_parallel_jobs(mut self, jobs: usize) -> Self {
        self.max_parallel_jobs = jobs.max(1);
        self
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn run(&self, request: &BatchRequest) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            identification = %request.identification_path.display(),
            spectra_files = request.spectra_paths.len(),
            metrics = self.catalog.len(),
            "starting qcML batch"
        );

        let jobs = request.jobs();
        // `buffered` keeps records in input order whatever the completion order.
        let records: Vec<JobRecord> = stream::iter(&jobs)
            .map(|job| self.run_job(job))
            .buffered(self.max_parallel_jobs)
            .collect()
            .await;

        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            jobs: records,
        };
        info!(
            %run_id,
            reports = summary.reports().len(),
            failed_builds = summary.failed_builds(),
            embedded_metrics = summary.embedded_metrics(),
            failed_metrics = summary.failed_metrics(),
            "qcML batch finished"
        );
        summary
    }

    async fn run_job(&self, job: &SpectraJob) -> JobRecord {
        if self.is_cancelled() {
            warn!(spectra = %job.spectra_path.display(), "cancelled before start");
            let record = JobRecord::cancelled(job);
            self.observer.job_finished(&record);
            return record;
        }
        self.observer.job_started(job);

        let builder = ReportBuilder::new(self.runner, &self.tools.calculator);
        let report = match builder.build(job).await {
            Ok(report) => report,
            Err(err) => {
                self.observer.build_failed(&err);
                let record = JobRecord::build_failed(&err);
                self.observer.job_finished(&record);
                return record;
            }
        };
        self.observer.report_built(&report);

        let pipeline = MetricPipeline::new(self.runner, self.tools);
        let mut metrics = Vec::with_capacity(self.catalog.len());
        for metric in self.catalog.iter() {
            if self.is_cancelled() {
                metrics.push(MetricRecord::new(metric, MetricStatus::Cancelled));
                continue;
            }
            self.observer.metric_started(&report, metric);
            let result = pipeline
                .apply(&report, metric, &job.temp_directory)
                .await
                .map(|_| ());
            self.observer
                .metric_finished(&report, metric, result.as_ref().map(|_| ()));
            metrics.push(match result {
                Ok(()) => MetricRecord::new(metric, MetricStatus::Embedded),
                Err(err) => MetricRecord::failed(metric, &err),
            });
        }

        let record = JobRecord::built(&report, metrics);
        self.observer.job_finished(&record);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RUN_QUALITY_ACCESSION;
    use crate::error::FailureReason;
    use crate::pipeline::tests::{ScriptedRunner, has_arg};
    use crate::runner::Invocation;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn metric(name: &str, accession: &str, exports: &[&str]) -> MetricDefinition {
        MetricDefinition {
            name: name.into(),
            accession: accession.into(),
            parent_accession: RUN_QUALITY_ACCESSION.into(),
            required_exports: exports.iter().map(|e| e.to_string()).collect(),
            plot_script: PathBuf::from(format!("/scripts/{name}.R")),
        }
    }

    fn catalog() -> MetricCatalog {
        MetricCatalog::from_unchecked(vec![
            metric("tic", "QC:0000023", &["QC:0000022"]),
            metric("idmap", "QC:0000035", &["QC:0000044", "QC:0000038"]),
            metric("mass_acc", "QC:0000053", &["QC:0000038"]),
        ])
    }

    fn request(tmp: &TempDir, spectra: &[&str]) -> BatchRequest {
        BatchRequest {
            identification_path: tmp.path().join("run.mzid"),
            spectra_paths: spectra.iter().map(|s| tmp.path().join(s)).collect(),
            output_directory: tmp.path().join("out"),
            temp_directory: tmp.path().join("scratch"),
        }
    }

    fn is_calculator_for(inv: &Invocation, spectra: &str) -> bool {
        inv.program_name() == "QCCalculator"
            && inv.args_lossy().iter().any(|a| a.ends_with(spectra))
    }

    /// Collects observer notifications; optionally flips the cancel flag
    /// after the n-th notification matching `cancel_on`.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        cancel: Option<(watch::Sender<bool>, &'static str)>,
    }

    impl Recorder {
        fn cancelling_on(tx: watch::Sender<bool>, event: &'static str) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                cancel: Some((tx, event)),
            }
        }

        fn push(&self, event: String) {
            if let Some((tx, trigger)) = &self.cancel
                && event.starts_with(trigger)
            {
                let _ = tx.send(true);
            }
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl BatchObserver for Recorder {
        fn job_started(&self, job: &SpectraJob) {
            self.push(format!("job_started {}", job.spectra_path.display()));
        }
        fn report_built(&self, report: &ReportArtifact) {
            self.push(format!("report_built {}", report.path.display()));
        }
        fn build_failed(&self, error: &BuildError) {
            self.push(format!("build_failed {}", error.job.spectra_path.display()));
        }
        fn metric_finished(
            &self,
            _report: &ReportArtifact,
            metric: &MetricDefinition,
            result: Result<(), &MetricError>,
        ) {
            let outcome = if result.is_ok() { "ok" } else { "err" };
            self.push(format!("metric_finished {} {outcome}", metric.accession));
        }
        fn job_finished(&self, record: &JobRecord) {
            self.push(format!("job_finished {:?}", record.status));
        }
    }

    async fn run_batch(
        runner: &ScriptedRunner,
        catalog: &MetricCatalog,
        observer: &dyn BatchObserver,
        request: &BatchRequest,
        cancel: watch::Receiver<bool>,
    ) -> RunSummary {
        let tools = ToolsConfig::default();
        BatchOrchestrator::new(runner, &tools, catalog, observer, cancel)
            .run(request)
            .await
    }

    #[tokio::test]
    async fn single_spectra_file_gets_every_metric() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::succeeding();
        let catalog = catalog();
        let (_tx, rx) = watch::channel(false);
        let req = request(&tmp, &["a.mzML"]);

        let summary = run_batch(&runner, &catalog, &SilentObserver, &req, rx).await;

        assert_eq!(summary.jobs.len(), 1);
        let job = &summary.jobs[0];
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.report_path, Some(tmp.path().join("out").join("a.qcML")));
        assert_eq!(job.metrics.len(), 3);
        assert!(job.metrics.iter().all(|m| m.status == MetricStatus::Embedded));

        assert_eq!(runner.calls_to("QCCalculator").len(), 1);
        assert_eq!(runner.calls_to("QCEmbedder").len(), 3);
        assert_eq!(runner.calls_to("QCExtractor").len(), 4);
        assert!(!summary.has_failures());
        assert_eq!(summary.embedded_metrics(), 3);
    }

    #[tokio::test]
    async fn failed_build_skips_metrics_and_batch_continues() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::failing_when(|inv| {
            is_calculator_for(inv, "b.mzML").then_some(FailureReason::EmptyOutput)
        });
        let catalog = catalog();
        let recorder = Recorder::default();
        let (_tx, rx) = watch::channel(false);
        let req = request(&tmp, &["b.mzML", "a.mzML"]);

        let summary = run_batch(&runner, &catalog, &recorder, &req, rx).await;

        assert_eq!(summary.jobs[0].status, JobStatus::BuildFailed);
        assert!(summary.jobs[0].metrics.is_empty());
        assert_eq!(
            summary.jobs[0].error.as_deref(),
            Some("exited successfully but produced no output")
        );
        assert_eq!(summary.jobs[1].status, JobStatus::Completed);

        let b_report = tmp.path().join("out").join("b.qcML").display().to_string();
        let touched_b = runner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program_name() != "QCCalculator")
            .any(|c| has_arg(c, &b_report));
        assert!(!touched_b);
        assert_eq!(runner.calls_to("QCCalculator").len(), 2);
        assert_eq!(runner.calls_to("QCEmbedder").len(), 3);

        let events = recorder.events();
        assert!(events[0].starts_with("job_started"));
        assert!(events[1].starts_with("build_failed"));
        assert_eq!(events[2], "job_finished BuildFailed");
        assert_eq!(summary.failed_builds(), 1);
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn builds_once_per_spectra_and_metrics_only_for_built_reports() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::failing_when(|inv| {
            is_calculator_for(inv, "c.mzML").then_some(FailureReason::ExitStatus(1))
        });
        let catalog = catalog();
        let (_tx, rx) = watch::channel(false);
        let req = request(&tmp, &["a.mzML", "b.mzML", "c.mzML", "d.mzML"]);

        let summary = run_batch(&runner, &catalog, &SilentObserver, &req, rx).await;

        assert_eq!(runner.calls_to("QCCalculator").len(), 4);
        // three built reports, three metrics each
        assert_eq!(runner.calls_to("QCEmbedder").len(), 9);
        assert_eq!(runner.calls_to("Rscript").len(), 9);
        assert_eq!(summary.reports().len(), 3);
        let order: Vec<_> = summary.jobs.iter().map(|j| j.spectra_path.clone()).collect();
        assert_eq!(order, req.spectra_paths);
    }

    #[tokio::test]
    async fn failing_metric_does_not_disturb_the_others() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog();
        let req = request(&tmp, &["a.mzML", "b.mzML"]);

        let baseline = ScriptedRunner::succeeding();
        let (_tx, rx) = watch::channel(false);
        run_batch(&baseline, &catalog, &SilentObserver, &req, rx).await;

        // idmap's plot breaks on every report.
        let runner = ScriptedRunner::failing_when(|inv| {
            (inv.program_name() == "Rscript" && has_arg(inv, "/scripts/idmap.R"))
                .then_some(FailureReason::ExitStatus(1))
        });
        let (_tx, rx) = watch::channel(false);
        let summary = run_batch(&runner, &catalog, &SilentObserver, &req, rx).await;

        for job in &summary.jobs {
            assert_eq!(job.status, JobStatus::MetricsFailed);
            let statuses: Vec<_> = job.metrics.iter().map(|m| m.status).collect();
            assert_eq!(
                statuses,
                vec![MetricStatus::Embedded, MetricStatus::Failed, MetricStatus::Embedded]
            );
            assert_eq!(job.metrics[1].stage, Some(Stage::Plot));
        }

        // Same calls as the clean run, minus one embed per report.
        let expected: Vec<Invocation> = baseline
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !(c.program_name() == "QCEmbedder" && has_arg(c, "QC:0000035")))
            .cloned()
            .collect();
        assert_eq!(*runner.calls.lock().unwrap(), expected);
        assert_eq!(summary.failed_metrics(), 2);
    }

    #[tokio::test]
    async fn embed_failure_moves_on_to_next_metric() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::failing_when(|inv| {
            (inv.program_name() == "QCEmbedder" && has_arg(inv, "QC:0000023"))
                .then_some(FailureReason::ExitStatus(1))
        });
        let catalog = catalog();
        let recorder = Recorder::default();
        let (_tx, rx) = watch::channel(false);
        let req = request(&tmp, &["a.mzML"]);

        let summary = run_batch(&runner, &catalog, &recorder, &req, rx).await;

        let metrics = &summary.jobs[0].metrics;
        assert_eq!(metrics[0].status, MetricStatus::Failed);
        assert_eq!(metrics[0].stage, Some(Stage::Embed));
        assert_eq!(metrics[1].status, MetricStatus::Embedded);
        assert_eq!(runner.calls_to("QCEmbedder").len(), 3);

        let finished: Vec<_> = recorder
            .events()
            .into_iter()
            .filter(|e| e.starts_with("metric_finished"))
            .collect();
        assert_eq!(
            finished,
            vec![
                "metric_finished QC:0000023 err",
                "metric_finished QC:0000035 ok",
                "metric_finished QC:0000053 ok",
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_at_next_spectra_file() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::succeeding();
        let catalog = catalog();
        let (tx, rx) = watch::channel(false);
        let recorder = Recorder::cancelling_on(tx, "job_finished");
        let req = request(&tmp, &["a.mzML", "b.mzML", "c.mzML"]);

        let summary = run_batch(&runner, &catalog, &recorder, &req, rx).await;

        assert_eq!(summary.jobs[0].status, JobStatus::Completed);
        assert_eq!(summary.jobs[1].status, JobStatus::Cancelled);
        assert_eq!(summary.jobs[2].status, JobStatus::Cancelled);
        assert_eq!(runner.calls_to("QCCalculator").len(), 1);
        assert!(summary.was_cancelled());
        assert!(!summary.has_failures());
    }

    #[tokio::test]
    async fn cancellation_stops_between_metrics() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::succeeding();
        let catalog = catalog();
        let (tx, rx) = watch::channel(false);
        let recorder = Recorder::cancelling_on(tx, "metric_finished");
        let req = request(&tmp, &["a.mzML"]);

        let summary = run_batch(&runner, &catalog, &recorder, &req, rx).await;

        let job = &summary.jobs[0];
        assert_eq!(job.status, JobStatus::Cancelled);
        let statuses: Vec<_> = job.metrics.iter().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![MetricStatus::Embedded, MetricStatus::Cancelled, MetricStatus::Cancelled]
        );
        assert_eq!(runner.calls_to("QCEmbedder").len(), 1);
    }

    #[tokio::test]
    async fn cancellation_after_failed_metric_is_still_reported() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::failing_when(|inv| {
            (inv.program_name() == "QCEmbedder" && has_arg(inv, "QC:0000023"))
                .then_some(FailureReason::ExitStatus(1))
        });
        let catalog = catalog();
        let (tx, rx) = watch::channel(false);
        let recorder = Recorder::cancelling_on(tx, "metric_finished");
        let req = request(&tmp, &["a.mzML"]);

        let summary = run_batch(&runner, &catalog, &recorder, &req, rx).await;

        let job = &summary.jobs[0];
        assert_eq!(job.status, JobStatus::MetricsFailed);
        let statuses: Vec<_> = job.metrics.iter().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![MetricStatus::Failed, MetricStatus::Cancelled, MetricStatus::Cancelled]
        );
        assert!(summary.was_cancelled());
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn parallel_jobs_keep_input_order_and_private_scratch() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::succeeding();
        let catalog = catalog();
        let tools = ToolsConfig::default();
        let (_tx, rx) = watch::channel(false);
        let req = request(&tmp, &["a.mzML", "b.mzML", "c.mzML"]);

        let summary = BatchOrchestrator::new(&runner, &tools, &catalog, &SilentObserver, rx)
            .with_max_parallel_jobs(3)
            .run(&req)
            .await;

        let order: Vec<_> = summary.jobs.iter().map(|j| j.spectra_path.clone()).collect();
        assert_eq!(order, req.spectra_paths);
        assert!(summary.jobs.iter().all(|j| j.status == JobStatus::Completed));

        let scratch_a = tmp.path().join("scratch").join("a").join("QC_0000022.csv");
        let scratch_b = tmp.path().join("scratch").join("b").join("QC_0000022.csv");
        let exports = runner.calls_to("QCExtractor");
        assert!(exports.iter().any(|c| has_arg(c, &scratch_a.display().to_string())));
        assert!(exports.iter().any(|c| has_arg(c, &scratch_b.display().to_string())));
    }

    #[test]
    fn summary_serializes_statuses_in_snake_case() {
        let record = JobRecord {
            spectra_path: PathBuf::from("/data/a.mzML"),
            report_path: Some(PathBuf::from("/out/a.qcML")),
            status: JobStatus::MetricsFailed,
            error: None,
            metrics: vec![MetricRecord {
                name: "tic".into(),
                accession: "QC:0000023".into(),
                status: MetricStatus::Failed,
                stage: Some(Stage::Export),
                error: Some("export of QC:0000022 failed: exited with status 1".into()),
            }],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "metrics_failed");
        assert_eq!(json["metrics"][0]["status"], "failed");
        assert_eq!(json["metrics"][0]["stage"], "Export");
        assert!(json.get("error").is_none());
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "x").unwrap();
        path
    }

    #[test]
    fn validate_rejects_empty_spectra_list() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "run.mzid");
        let req = request(&tmp, &[]);
        assert!(matches!(req.validate(), Err(ConfigError::NoSpectraFiles)));
    }

    #[test]
    fn validate_rejects_missing_inputs() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.mzML");
        let req = request(&tmp, &["a.mzML"]);
        assert!(matches!(
            req.validate(),
            Err(ConfigError::MissingInput { what: "identification file", .. })
        ));

        touch(tmp.path(), "run.mzid");
        let req = request(&tmp, &["a.mzML", "missing.mzML"]);
        assert!(matches!(
            req.validate(),
            Err(ConfigError::MissingInput { what: "spectra file", .. })
        ));
    }

    #[test]
    fn validate_rejects_spectra_sharing_a_report() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "run.mzid");
        touch(tmp.path(), "a.mzML");
        touch(tmp.path(), "a.mgf");
        let req = request(&tmp, &["a.mzML", "a.mgf"]);
        match req.validate() {
            Err(ConfigError::DuplicateReport { report, .. }) => {
                assert_eq!(report, tmp.path().join("out").join("a.qcML"));
            }
            other => panic!("expected DuplicateReport, got {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_good_request_and_creates_output() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "run.mzid");
        touch(tmp.path(), "a.mzML");
        touch(tmp.path(), "b.mzML");
        let req = request(&tmp, &["a.mzML", "b.mzML"]);
        req.validate().unwrap();
        req.create_output_directory().unwrap();
        assert!(req.output_directory.is_dir());
        assert_eq!(req.jobs().len(), 2);
    }
}
