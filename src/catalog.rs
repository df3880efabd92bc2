//! The table of QC metrics rendered into every report.
//!
//! Each [`MetricDefinition`] names the data series it needs from the report,
//! the R script that plots them, and the accessions the plot is attached
//! under. A [`MetricCatalog`] is validated once at startup so that malformed
//! definitions surface as configuration errors instead of per-report
//! failures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Attachment point for run-level quality parameters in qcML.
pub const RUN_QUALITY_ACCESSION: &str = "QC:0000004";

/// One plot-producing QC metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Short label used in progress output.
    pub name: String,
    /// Accession the plot is stored under.
    pub accession: String,
    /// Accession of the element the plot is attached to.
    #[serde(default = "default_parent_accession")]
    pub parent_accession: String,
    /// Series exported from the report, in the order the script expects them.
    pub required_exports: Vec<String>,
    /// Plot script, relative to the scripts directory unless absolute.
    pub plot_script: PathBuf,
}

fn default_parent_accession() -> String {
    RUN_QUALITY_ACCESSION.to_string()
}

// (name, metric accession, exports, script)
const BUILTIN_METRICS: &[(&str, &str, &[&str], &str)] = &[
    ("tic", "QC:0000023", &["QC:0000022"], "ProduceQCFigures_tic.R"),
    (
        "idmap",
        "QC:0000035",
        &["QC:0000044", "QC:0000038"],
        "ProduceQCFigures_idmap.R",
    ),
    ("mass_acc", "QC:0000053", &["QC:0000038"], "ProduceQCFigures_acc.R"),
    ("rt_acc", "QC:0000054", &["QC:0000038"], "ProduceQCFigures_rt_acc.R"),
    ("inj", "QC:0000055", &["QC:0000044"], "ProduceQCFigures_inj.R"),
];

/// The metrics shipped with the tool, with unresolved script references.
pub fn builtin_definitions() -> Vec<MetricDefinition> {
    BUILTIN_METRICS
        .iter()
        .map(|&(name, accession, exports, script)| MetricDefinition {
            name: name.to_string(),
            accession: accession.to_string(),
            parent_accession: default_parent_accession(),
            required_exports: exports.iter().map(|e| e.to_string()).collect(),
            plot_script: PathBuf::from(script),
        })
        .collect()
}

/// Checks the `PREFIX:digits` shape of a controlled-vocabulary accession.
pub fn is_valid_accession(accession: &str) -> bool {
    match accession.split_once(':') {
        Some((prefix, number)) => {
            !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_uppercase())
                && !number.is_empty()
                && number.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Validated, ordered set of metrics with resolved script paths.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    metrics: Vec<MetricDefinition>,
}

impl MetricCatalog {
    /// Validates `definitions` and resolves their scripts against `scripts_dir`.
    pub fn load(
        definitions: Vec<MetricDefinition>,
        scripts_dir: &Path,
    ) -> Result<Self, ConfigError> {
        if definitions.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut seen_metrics = HashSet::new();
        let mut metrics = Vec::with_capacity(definitions.len());
        for mut def in definitions {
            for accession in [&def.accession, &def.parent_accession] {
                if !is_valid_accession(accession) {
                    return Err(ConfigError::InvalidAccession {
                        metric: def.name.clone(),
                        accession: accession.clone(),
                    });
                }
            }
            if !seen_metrics.insert(def.accession.clone()) {
                return Err(ConfigError::DuplicateMetric(def.accession));
            }
            if def.required_exports.is_empty() {
                return Err(ConfigError::NoExports(def.name));
            }

            let mut seen_exports = HashSet::new();
            for export in &def.required_exports {
                if !is_valid_accession(export) {
                    return Err(ConfigError::InvalidAccession {
                        metric: def.name.clone(),
                        accession: export.clone(),
                    });
                }
                if !seen_exports.insert(export.as_str()) {
                    return Err(ConfigError::DuplicateExport {
                        metric: def.name.clone(),
                        accession: export.clone(),
                    });
                }
            }

            let script = if def.plot_script.is_absolute() {
                def.plot_script.clone()
            } else {
                scripts_dir.join(&def.plot_script)
            };
            if !script.is_file() {
                return Err(ConfigError::MissingScript {
                    metric: def.name,
                    path: script,
                });
            }
            def.plot_script = script;
            metrics.push(def);
        }

        Ok(Self { metrics })
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }
}

#[cfg(test)]
impl MetricCatalog {
    /// Skips validation; script paths are taken as given.
    pub(crate) fn from_unchecked(metrics: Vec<MetricDefinition>) -> Self {
        Self { metrics }
    }
}
