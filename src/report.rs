use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::error::{BuildError, FailureReason};
use crate::runner::{Invocation, StageResult, ToolRunner};

/// File extension of the reports written by the calculator.
pub const REPORT_EXTENSION: &str = "qcML";

/// Everything needed to produce the report for one spectra file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectraJob {
    pub identification_path: PathBuf,
    pub spectra_path: PathBuf,
    pub output_directory: PathBuf,
    /// Scratch space private to this job.
    pub temp_directory: PathBuf,
}

impl SpectraJob {
    /// The job's scratch directory is `temp_root/<spectra stem>`.
    pub fn new(
        identification: &Path,
        spectra: &Path,
        output_directory: &Path,
        temp_root: &Path,
    ) -> Self {
        let stem = spectra_stem(spectra);
        Self {
            identification_path: identification.to_path_buf(),
            spectra_path: spectra.to_path_buf(),
            output_directory: output_directory.to_path_buf(),
            temp_directory: temp_root.join(stem),
        }
    }

    /// `<output_directory>/<spectra base name>.qcML`
    pub fn report_path(&self) -> PathBuf {
        report_path_for(&self.output_directory, &self.spectra_path)
    }
}

fn spectra_stem(spectra: &Path) -> String {
    spectra
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spectra".to_string())
}

pub fn report_path_for(output_directory: &Path, spectra: &Path) -> PathBuf {
    output_directory.join(format!("{}.{REPORT_EXTENSION}", spectra_stem(spectra)))
}

/// A report on disk, owned by the job that built it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub job: SpectraJob,
}

/// Runs the calculator that turns spectra and identifications into a report.
pub struct ReportBuilder<'a, R> {
    runner: &'a R,
    calculator: &'a str,
}

impl<'a, R: ToolRunner> ReportBuilder<'a, R> {
    pub fn new(runner: &'a R, calculator: &'a str) -> Self {
        Self { runner, calculator }
    }

    /// Invocation for `job`: `-in <spectra> -out <report> -id <identifications>`.
    pub fn invocation(&self, job: &SpectraJob) -> Invocation {
        Invocation::new(self.calculator)
            .arg("-in")
            .path(&job.spectra_path)
            .arg("-out")
            .path(&job.report_path())
            .arg("-id")
            .path(&job.identification_path)
    }

    #[instrument(skip_all, fields(spectra = %job.spectra_path.display()))]
    pub async fn build(&self, job: &SpectraJob) -> Result<ReportArtifact, BuildError> {
        info!(
            identification = %job.identification_path.display(),
            "creating qcML"
        );

        if let Err(e) = tokio::fs::create_dir_all(&job.temp_directory).await {
            let err = BuildError {
                job: job.clone(),
                reason: FailureReason::Io(format!(
                    "creating {}: {e}",
                    job.temp_directory.display()
                )),
            };
            warn!("{err} - skipping");
            return Err(err);
        }

        match self.runner.run(&self.invocation(job)).await {
            StageResult::Success { .. } => {
                let path = job.report_path();
                info!(report = %path.display(), "qcML created");
                Ok(ReportArtifact {
                    path,
                    job: job.clone(),
                })
            }
            StageResult::Failure { reason, output } => {
                let err = BuildError {
                    job: job.clone(),
                    reason,
                };
                warn!(output = %output.trim_end(), "{err} - skipping");
                Err(err)
            }
        }
    }
}
