//! Reporting handover
//!
//! The pipeline hands the reporting collaborator plain numeric data: the
//! region timeseries, trend fits, metrics, motion parameters and spectra.
//! Rendering (plots, PDF pages) lives outside this crate; the bundled
//! [`JsonReporter`] just serializes the handover.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::error::QcError;
use crate::fft::PowerSpectrum;
use crate::metrics::QcMetrics;
use crate::motion::MotionParameters;
use crate::timeseries::{RegionTimeseries, TrendFits};

/// Metrics tracked across sessions in the trend summary
pub const TREND_METRICS: [&str; 6] = ["SNR", "SFNR", "NoiseFloor", "Drift", "NyquistSpikes", "AirSpikes"];

/// Everything one QC run hands to the reporting collaborator
#[derive(Clone, Debug, Serialize)]
pub struct QcReport {
    pub subject: String,
    pub session: String,
    /// Sample times in seconds
    pub time_s: Vec<f64>,
    pub timeseries: RegionTimeseries,
    pub fits: TrendFits,
    pub metrics: QcMetrics,
    pub motion: MotionParameters,
    /// Residual power spectrum per region, `None` for undefined regions
    pub residual_spectra: Vec<(i32, Option<PowerSpectrum>)>,
    /// Dominant non-DC residual frequency per region (Hz)
    pub residual_peak_hz: Vec<(i32, Option<f64>)>,
    /// Power spectrum of each motion parameter column
    pub motion_spectra: Vec<Option<PowerSpectrum>>,
    /// Work directory holding intermediate images, when retained
    pub work_dir: Option<PathBuf>,
}

impl QcReport {
    /// Acquisition timestamp from the sidecar, if any
    pub fn acquisition_date_time(&self) -> Option<&str> {
        self.metrics.metadata.acquisition_date_time.as_deref()
    }
}

/// Largest non-DC component of each region's residual spectrum
pub fn peak_frequencies(spectra: &[(i32, Option<PowerSpectrum>)]) -> Vec<(i32, Option<f64>)> {
    spectra
        .iter()
        .map(|(label, ps)| (*label, ps.as_ref().and_then(|ps| ps.peak_frequency())))
        .collect()
}

/// Reporting collaborator
pub trait QcReporter {
    fn report(&self, report: &QcReport) -> Result<(), QcError>;
}

/// Writes `<subject>_<session>_qc.json` into a report directory
#[derive(Clone, Debug)]
pub struct JsonReporter {
    dir: PathBuf,
}

impl JsonReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn output_path(&self, report: &QcReport) -> PathBuf {
        self.dir
            .join(format!("{}_{}_qc.json", report.subject, report.session))
    }
}

impl QcReporter for JsonReporter {
    fn report(&self, report: &QcReport) -> Result<(), QcError> {
        let path = self.output_path(report);
        write_json_file(&path, report)?;
        info!("Wrote QC report {}", path.display());
        Ok(())
    }
}

/// Pretty-print a serializable value to disk, creating parent directories
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), QcError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| QcError::io(parent, e))?;
        }
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| QcError::Report(format!("failed to serialize {}: {}", path.display(), e)))?;
    fs::write(path, json).map_err(|e| QcError::io(path, e))
}

/// Metric values across sessions in acquisition order
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricTrends {
    /// Acquisition timestamps, ascending
    pub acquired: Vec<String>,
    pub sessions: Vec<String>,
    /// Metric name -> one value per session, `None` where undefined
    pub series: BTreeMap<String, Vec<Option<f64>>>,
}

/// Collect metric trends across sessions
///
/// Sessions are ordered by `AcquisitionDateTime` (ISO 8601 text, so
/// lexicographic order is chronological). Sessions without a timestamp are
/// skipped.
pub fn summarize_trends(reports: &[QcReport], metric_names: &[&str]) -> MetricTrends {
    let mut dated: Vec<(&str, &QcReport)> = Vec::with_capacity(reports.len());
    for r in reports {
        match r.acquisition_date_time() {
            Some(dt) => dated.push((dt, r)),
            None => warn!(
                "No acquisition time for subject {} session {}, omitted from trends",
                r.subject, r.session
            ),
        }
    }
    dated.sort_by(|a, b| a.0.cmp(b.0));

    let mut trends = MetricTrends::default();
    for name in metric_names {
        trends.series.insert(name.to_string(), Vec::with_capacity(dated.len()));
    }
    for (dt, r) in dated {
        trends.acquired.push(dt.to_string());
        trends.sessions.push(r.session.clone());
        let flat = r.metrics.flatten();
        for name in metric_names {
            let value = flat.get(*name).copied().flatten();
            if let Some(values) = trends.series.get_mut(*name) {
                values.push(value);
            }
        }
    }
    trends
}
