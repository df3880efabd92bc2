//! Pipeline settings loaded from `qcml-pipeline.toml`.
//!
//! The struct [`PipelineConfig`] holds every tunable. Keys missing from the
//! file take sensible defaults, and a missing default file is not an error.
//! `QCML_SCRIPTS_DIR` takes precedence over the file for the scripts
//! directory; command-line flags are applied last by the binary.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::{MetricDefinition, builtin_definitions};
use crate::error::ConfigError;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "qcml-pipeline.toml";

/// Environment variable overriding `scripts_dir`.
pub const SCRIPTS_DIR_ENV: &str = "QCML_SCRIPTS_DIR";

/// Executables for the four external tools. Looked up on `PATH` unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub calculator: String,
    pub extractor: String,
    pub plotter: String,
    pub embedder: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            calculator: "QCCalculator".to_string(),
            extractor: "QCExtractor".to_string(),
            plotter: "Rscript".to_string(),
            embedder: "QCEmbedder".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Directory the metric plot scripts are resolved against.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Upper bound for a single tool invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Spectra files processed concurrently.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,

    /// Replaces the built-in catalog when present.
    #[serde(default)]
    pub metrics: Option<Vec<MetricDefinition>>,
}

// OpenMS installs ProduceQCFigures_*.R here.
fn default_scripts_dir() -> PathBuf {
    PathBuf::from("share/OpenMS/SCRIPTS")
}

// Ten minutes.
fn default_timeout_secs() -> u64 {
    600
}

fn default_max_parallel_jobs() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            scripts_dir: default_scripts_dir(),
            timeout_secs: default_timeout_secs(),
            max_parallel_jobs: default_max_parallel_jobs(),
            metrics: None,
        }
    }
}

impl PipelineConfig {
    /// Loads `path`, or [`DEFAULT_CONFIG_FILE`] when `None`.
    /// Only an explicitly named file is required to exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = if required || path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var(SCRIPTS_DIR_ENV)
            && !dir.is_empty()
        {
            config.scripts_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Rejects settings no run could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting(
                "timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_parallel_jobs == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_parallel_jobs must be at least 1".into(),
            ));
        }
        let tools = [
            ("calculator", &self.tools.calculator),
            ("extractor", &self.tools.extractor),
            ("plotter", &self.tools.plotter),
            ("embedder", &self.tools.embedder),
        ];
        for (name, program) in tools {
            if program.trim().is_empty() {
                return Err(ConfigError::InvalidSetting(format!(
                    "tools.{name} must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// The configured metric list, falling back to the built-in catalog.
    pub fn metric_definitions(&self) -> Vec<MetricDefinition> {
        self.metrics.clone().unwrap_or_else(builtin_definitions)
    }
}
