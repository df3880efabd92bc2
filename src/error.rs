use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::Stage;
use crate::report::SpectraJob;

/// Problems detected before any work starts. The only fatal error kind.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no spectra files given")]
    NoSpectraFiles,

    #[error("{what} not found: {}", .path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    #[error(
        "spectra files {} and {} would both write report {}",
        .first.display(),
        .second.display(),
        .report.display()
    )]
    DuplicateReport {
        first: PathBuf,
        second: PathBuf,
        report: PathBuf,
    },

    #[error("could not create output directory {}: {source}", .path.display())]
    OutputDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("metric catalog is empty")]
    EmptyCatalog,

    #[error("metric {metric}: invalid accession {accession:?}")]
    InvalidAccession { metric: String, accession: String },

    #[error("metric {0}: no export accessions declared")]
    NoExports(String),

    #[error("metric {metric}: export accession {accession} listed twice")]
    DuplicateExport { metric: String, accession: String },

    #[error("metric accession {0} defined twice")]
    DuplicateMetric(String),

    #[error("metric {metric}: plot script not found at {}", .path.display())]
    MissingScript { metric: String, path: PathBuf },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("could not read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Why a single external tool invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("could not start process: {0}")]
    Spawn(String),

    #[error("exited with status {0}")]
    ExitStatus(i32),

    #[error("terminated by signal")]
    Signal,

    #[error("exited successfully but produced no output")]
    EmptyOutput,

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("i/o error: {0}")]
    Io(String),
}

/// The calculator could not produce a report for a spectra file.
#[derive(Debug, Clone, Error)]
#[error("could not create qcML for {}: {reason}", .job.spectra_path.display())]
pub struct BuildError {
    pub job: SpectraJob,
    pub reason: FailureReason,
}

/// A metric pipeline stopped at one of its stages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    #[error("export of {accession} failed: {reason}")]
    ExportFailed {
        accession: String,
        reason: FailureReason,
    },

    #[error("plot for {metric} failed: {reason}")]
    PlotFailed {
        metric: String,
        reason: FailureReason,
    },

    #[error("embedding {metric} failed: {reason}")]
    EmbedFailed {
        metric: String,
        reason: FailureReason,
    },
}

impl MetricError {
    /// The stage the pipeline stopped at.
    pub fn stage(&self) -> Stage {
        match self {
            MetricError::ExportFailed { .. } => Stage::Export,
            MetricError::PlotFailed { .. } => Stage::Plot,
            MetricError::EmbedFailed { .. } => Stage::Embed,
        }
    }

    pub fn reason(&self) -> &FailureReason {
        match self {
            MetricError::ExportFailed { reason, .. }
            | MetricError::PlotFailed { reason, .. }
            | MetricError::EmbedFailed { reason, .. } => reason,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.reason(), FailureReason::Timeout(_))
    }
}
