//! Command-line interface based on clap.
//!
//! Defines the [`Cli`] struct: the three required inputs (identification
//! file, spectra files, output directory), the optional output file and
//! scratch directory, and flags overriding the config file.

use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;

/// Builds qcML quality-control reports for proteomics runs and embeds metric plots.
#[derive(Debug, Parser)]
#[command(name = "qcml-pipeline", version, about)]
pub struct Cli {
    /// Identification file (mzid or idXML) referencing the spectra files.
    #[arg(short, long, alias = "mzid", value_name = "FILE")]
    pub identification_file: PathBuf,

    /// Spectra files (mzML or mgf) referenced by the identification file.
    #[arg(
        short,
        long,
        alias = "spectras",
        value_name = "FILE",
        num_args = 1..,
        required = true
    )]
    pub spectra_file: Vec<PathBuf>,

    /// Directory receiving one report per spectra file and the run log.
    #[arg(short, long, alias = "outdir", value_name = "DIR")]
    pub output_directory: PathBuf,

    /// Copy of the final report; only used with a single spectra file.
    #[arg(short = 'f', long, alias = "outfile", value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Scratch directory for exported series and plots.
    #[arg(short, long, value_name = "DIR")]
    pub temp_directory: Option<PathBuf>,

    /// Config file (defaults to ./qcml-pipeline.toml when present).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Per-tool time limit in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Number of spectra files processed concurrently.
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Exit with status 2 when any report or metric failed.
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    /// Print the run summary as JSON when done.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Log at debug level.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Scratch root: the given directory or one under the system temp dir.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("qcml-pipeline"))
    }
}

/// Process exit status for a parse error: 0 for help and version output,
/// 1 for everything else.
pub fn parse_error_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => 1,
    }
}
