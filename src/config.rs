//! Pipeline configuration
//!
//! Everything a run needs to know beyond its inputs is passed explicitly in
//! a [`PipelineConfig`]; nothing is read from process-wide state. Any field
//! missing from a JSON config file takes its default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QcError;
use crate::metrics::MetricParams;
use crate::timeseries::DetrendParams;
use crate::volume::{DEFAULT_LABEL_SET, LABEL_BACKGROUND};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Region labels to extract, in reporting order (default [1, 2, 3])
    pub label_set: Vec<i32>,
    pub detrend: DetrendParams,
    pub metrics: MetricParams,
    /// Use the identity motion corrector (default false)
    pub skip_motion_correction: bool,
    /// Retain the work directory and its intermediate images (default false)
    pub keep_intermediates: bool,
    /// Parent directory for per-run work directories (system temp if unset)
    pub work_dir: Option<PathBuf>,
    /// Where the JSON reporter writes, if reporting is enabled
    pub report_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label_set: DEFAULT_LABEL_SET.to_vec(),
            detrend: DetrendParams::default(),
            metrics: MetricParams::default(),
            skip_motion_correction: false,
            keep_intermediates: false,
            work_dir: None,
            report_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Reject settings no run could use
    pub fn validate(&self) -> Result<(), QcError> {
        if self.label_set.is_empty() {
            return Err(QcError::Config("label_set is empty".to_string()));
        }
        if self.label_set.contains(&LABEL_BACKGROUND) {
            return Err(QcError::Config("label_set must not include background (0)".to_string()));
        }
        if !(self.detrend.huber_delta > 0.0) {
            return Err(QcError::Config(format!(
                "huber_delta must be positive, got {}",
                self.detrend.huber_delta
            )));
        }
        if !(self.detrend.initial_time_constant > 0.0) {
            return Err(QcError::Config(format!(
                "initial_time_constant must be positive, got {}",
                self.detrend.initial_time_constant
            )));
        }
        if self.detrend.max_iterations == 0 {
            return Err(QcError::Config("max_iterations must be at least 1".to_string()));
        }
        if !(self.metrics.spike_threshold_sigma > 0.0) || !(self.metrics.mad_scale > 0.0) {
            return Err(QcError::Config(
                "spike_threshold_sigma and mad_scale must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a JSON pipeline configuration
pub fn load_config(path: &Path) -> Result<PipelineConfig, QcError> {
    let contents = fs::read_to_string(path).map_err(|e| QcError::io(path, e))?;
    let config: PipelineConfig = serde_json::from_str(&contents)
        .map_err(|e| QcError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}
