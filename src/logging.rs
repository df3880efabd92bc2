//! Run log written to the output directory.
//!
//! The subscriber is handed back as a [`Dispatch`] and attached to the batch
//! future by the caller instead of being installed process-wide.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// `<output_directory>/qcml-pipeline-<UTC timestamp>.log`
pub fn log_file_path(output_directory: &Path, now: DateTime<Utc>) -> PathBuf {
    output_directory.join(format!(
        "qcml-pipeline-{}.log",
        now.format("%Y%m%dT%H%M%SZ")
    ))
}

/// Level used when `RUST_LOG` is not set.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Creates the log file and a subscriber writing plain-text events to it.
pub fn file_dispatch(output_directory: &Path, verbose: bool) -> Result<(Dispatch, PathBuf)> {
    let path = log_file_path(output_directory, Utc::now());
    let file = File::create(&path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_env_filter(filter)
        .finish();

    Ok((Dispatch::new(subscriber), path))
}
