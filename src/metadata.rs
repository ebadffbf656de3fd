//! Acquisition metadata from JSON sidecars
//!
//! Missing or unreadable sidecars are not fatal: a documented default
//! parameter set is substituted and the substitution is flagged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::volume::VolumeSeries;

/// Repetition time assumed when no sidecar is available (seconds)
pub const DEFAULT_REPETITION_TIME: f64 = 3.0;
/// Echo time assumed when no sidecar is available (seconds)
pub const DEFAULT_ECHO_TIME: f64 = 0.030;

/// BIDS-style acquisition metadata
///
/// Known keys are typed; everything else in the sidecar is carried through
/// unchanged in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AcquisitionMetadata {
    #[serde(default = "default_repetition_time")]
    pub repetition_time: f64,
    #[serde(default)]
    pub echo_time: Option<f64>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub acquisition_date_time: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub voxel_size: Option<String>,
    #[serde(default)]
    pub matrix_size: Option<String>,
    /// True when the sidecar could not be read and defaults were used
    #[serde(default)]
    pub defaults_substituted: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_repetition_time() -> f64 {
    DEFAULT_REPETITION_TIME
}

impl Default for AcquisitionMetadata {
    fn default() -> Self {
        let mut extra = BTreeMap::new();
        extra.insert("Scanner".to_string(), Value::String("Unknown".to_string()));
        Self {
            repetition_time: DEFAULT_REPETITION_TIME,
            echo_time: Some(DEFAULT_ECHO_TIME),
            manufacturer: Some("Unknown".to_string()),
            acquisition_date_time: None,
            subject: None,
            session: None,
            voxel_size: None,
            matrix_size: None,
            defaults_substituted: true,
            extra,
        }
    }
}

impl AcquisitionMetadata {
    /// Parse sidecar JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Load a sidecar, substituting defaults if it is absent or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| Self::from_json(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(meta) => meta,
            Err(e) => {
                warn!(
                    "Could not read image metadata {} ({}), using default imaging parameters",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Add run identity and geometry derived from the image itself
    pub fn annotate(&mut self, subject: &str, session: &str, series: &VolumeSeries) {
        let (vx, vy, vz) = series.voxel_size;
        let (nx, ny, nz, nt) = series.dims();
        self.subject = Some(subject.to_string());
        self.session = Some(session.to_string());
        self.voxel_size = Some(format!("{} x {} x {}", vx, vy, vz));
        self.matrix_size = Some(format!("{} x {} x {} x {}", nx, ny, nz, nt));
    }

    /// Sample times in seconds for `nt` timepoints
    pub fn time_axis(&self, nt: usize) -> Vec<f64> {
        time_axis(nt, self.repetition_time)
    }
}

/// Sample times in seconds: `t * tr`
pub fn time_axis(nt: usize, tr: f64) -> Vec<f64> {
    (0..nt).map(|t| t as f64 * tr).collect()
}

/// Sidecar path for an image: `.nii.gz` / `.nii` replaced by `.json`
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    let name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name);
    image_path.with_file_name(format!("{}.json", stem))
}
