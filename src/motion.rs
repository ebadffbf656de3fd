//! Rigid-body motion parameters
//!
//! Motion correction itself is an external collaborator. This module holds
//! its output (an nt x 6 parameter matrix: three rotations then three
//! translations) and the summary statistics reported from it.

use serde::Serialize;

use crate::error::QcError;
use crate::volume::VolumeSeries;

/// Number of rigid-body parameters per timepoint
pub const N_MOTION_PARAMS: usize = 6;

/// Per-timepoint rigid-body parameters, row-major `[t][param]`
///
/// Columns 0..3 are rotations (radians), 3..6 translations (mm).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MotionParameters {
    rows: Vec<[f64; N_MOTION_PARAMS]>,
}

impl MotionParameters {
    pub fn new(rows: Vec<[f64; N_MOTION_PARAMS]>) -> Self {
        Self { rows }
    }

    /// All-zero parameters, as reported when motion correction is skipped
    pub fn zeros(nt: usize) -> Self {
        Self { rows: vec![[0.0; N_MOTION_PARAMS]; nt] }
    }

    pub fn nt(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[[f64; N_MOTION_PARAMS]] {
        &self.rows
    }

    /// Timeseries of a single parameter column
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[col]).collect()
    }

    /// Maximum absolute displacement along x, y, z in microns
    pub fn max_displacement_um(&self) -> MotionSummary {
        let max_abs = |col: usize| {
            self.rows.iter().fold(0.0_f64, |m, r| m.max(r[col].abs())) * 1000.0
        };
        MotionSummary {
            max_dx_um: max_abs(3),
            max_dy_um: max_abs(4),
            max_dz_um: max_abs(5),
        }
    }
}

/// Peak apparent displacement per translation axis (microns)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MotionSummary {
    #[serde(rename = "MaxAbsDx")]
    pub max_dx_um: f64,
    #[serde(rename = "MaxAbsDy")]
    pub max_dy_um: f64,
    #[serde(rename = "MaxAbsDz")]
    pub max_dz_um: f64,
}

/// Motion-correction collaborator
///
/// Returns the realigned series and an nt x 6 parameter matrix.
pub trait MotionCorrector {
    fn correct(&self, series: &VolumeSeries) -> Result<(VolumeSeries, MotionParameters), QcError>;
}

/// Skip mode: the input unchanged with all-zero parameters
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipMotionCorrection;

impl MotionCorrector for SkipMotionCorrection {
    fn correct(&self, series: &VolumeSeries) -> Result<(VolumeSeries, MotionParameters), QcError> {
        Ok((series.clone(), MotionParameters::zeros(series.nt())))
    }
}
