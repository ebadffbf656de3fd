//! In-memory volume types
//!
//! Volumes are flat `Vec<f64>` buffers in Fortran (column-major) order to
//! match the NIfTI convention: index = x + y*nx + z*nx*ny (+ t*nx*ny*nz).

use crate::error::QcError;

/// Background label, never extracted
pub const LABEL_BACKGROUND: i32 = 0;
/// Phantom signal region
pub const LABEL_SIGNAL: i32 = 1;
/// Nyquist ghost region
pub const LABEL_GHOST: i32 = 2;
/// Background air region
pub const LABEL_AIR: i32 = 3;

/// Canonical extraction order. Downstream consumers index by position.
pub const DEFAULT_LABEL_SET: [i32; 3] = [LABEL_SIGNAL, LABEL_GHOST, LABEL_AIR];

/// Human-readable region name for a label
pub fn label_name(label: i32) -> &'static str {
    match label {
        LABEL_BACKGROUND => "Background",
        LABEL_SIGNAL => "Signal",
        LABEL_GHOST => "Nyquist",
        LABEL_AIR => "Air",
        _ => "Other",
    }
}

/// Index into a 3D array stored in Fortran order
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// 4D scalar timeseries (three spatial axes + time) with voxel geometry
///
/// A series with zero timepoints can be represented so that consumers can
/// refuse it with a clear diagnostic; see [`VolumeSeries::ensure_timepoints`].
#[derive(Clone, Debug)]
pub struct VolumeSeries {
    data: Vec<f64>,
    dims: (usize, usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major), passed through untouched
    pub affine: [f64; 16],
}

impl VolumeSeries {
    /// Wrap a Fortran-ordered buffer of `nx*ny*nz*nt` values
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize, usize),
        voxel_size: (f64, f64, f64),
        affine: [f64; 16],
    ) -> Result<Self, QcError> {
        let (nx, ny, nz, nt) = dims;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(QcError::InvalidVolume(format!(
                "spatial dimensions must be positive, got {}x{}x{}",
                nx, ny, nz
            )));
        }
        let expected = nx * ny * nz * nt;
        if data.len() != expected {
            return Err(QcError::InvalidVolume(format!(
                "expected {} samples for {}x{}x{}x{}, got {}",
                expected, nx, ny, nz, nt, data.len()
            )));
        }
        Ok(Self { data, dims, voxel_size, affine })
    }

    /// Build a series from one flat 3D volume per timepoint
    pub fn from_volumes(
        volumes: &[Vec<f64>],
        spatial: (usize, usize, usize),
        voxel_size: (f64, f64, f64),
        affine: [f64; 16],
    ) -> Result<Self, QcError> {
        let n_vox = spatial.0 * spatial.1 * spatial.2;
        let mut data = Vec::with_capacity(n_vox * volumes.len());
        for vol in volumes {
            if vol.len() != n_vox {
                return Err(QcError::InvalidVolume(format!(
                    "volume has {} voxels, expected {}",
                    vol.len(),
                    n_vox
                )));
            }
            data.extend_from_slice(vol);
        }
        Self::new(
            data,
            (spatial.0, spatial.1, spatial.2, volumes.len()),
            voxel_size,
            affine,
        )
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        self.dims
    }

    pub fn spatial_dims(&self) -> (usize, usize, usize) {
        (self.dims.0, self.dims.1, self.dims.2)
    }

    /// Number of timepoints
    pub fn nt(&self) -> usize {
        self.dims.3
    }

    /// Number of voxels per volume
    pub fn n_voxels(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// 3D volume at timepoint `t`
    pub fn volume(&self, t: usize) -> &[f64] {
        let n = self.n_voxels();
        &self.data[t * n..(t + 1) * n]
    }

    /// Timeseries of a single voxel (flat spatial index)
    pub fn voxel_timeseries(&self, voxel: usize) -> Vec<f64> {
        let n = self.n_voxels();
        (0..self.nt()).map(|t| self.data[voxel + t * n]).collect()
    }

    /// Refuse series that have nothing to analyse
    pub fn ensure_timepoints(&self) -> Result<(), QcError> {
        if self.nt() == 0 {
            return Err(QcError::EmptySeries(
                "series has zero timepoints".to_string(),
            ));
        }
        Ok(())
    }
}

/// Integer region labels on the spatial grid of a [`VolumeSeries`]
#[derive(Clone, Debug, PartialEq)]
pub struct RegionLabelVolume {
    labels: Vec<i32>,
    dims: (usize, usize, usize),
}

impl RegionLabelVolume {
    pub fn new(labels: Vec<i32>, dims: (usize, usize, usize)) -> Result<Self, QcError> {
        let expected = dims.0 * dims.1 * dims.2;
        if labels.len() != expected {
            return Err(QcError::ShapeMismatch {
                expected: dims,
                actual: (labels.len(), 1, 1),
            });
        }
        Ok(Self { labels, dims })
    }

    /// Round a float label map (as decoded from NIfTI) to integer labels
    pub fn from_f64(values: &[f64], dims: (usize, usize, usize)) -> Result<Self, QcError> {
        Self::new(values.iter().map(|&v| v.round() as i32).collect(), dims)
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// Number of voxels carrying `label`
    pub fn voxel_count(&self, label: i32) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Check that this label map lies on the grid of `series`
    pub fn check_grid(&self, series: &VolumeSeries) -> Result<(), QcError> {
        let spatial = series.spatial_dims();
        if spatial != self.dims {
            return Err(QcError::ShapeMismatch {
                expected: spatial,
                actual: self.dims,
            });
        }
        Ok(())
    }

    pub fn to_f64(&self) -> Vec<f64> {
        self.labels.iter().map(|&l| l as f64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: [f64; 16] = [
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];

    #[test]
    fn test_series_layout() {
        // 2x1x1 voxels, 3 timepoints
        let data = vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let series = VolumeSeries::new(data, (2, 1, 1, 3), (1.0, 1.0, 1.0), IDENTITY).unwrap();
        assert_eq!(series.nt(), 3);
        assert_eq!(series.n_voxels(), 2);
        assert_eq!(series.volume(1), &[2.0, 20.0]);
        assert_eq!(series.voxel_timeseries(1), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_series_rejects_wrong_length() {
        let result = VolumeSeries::new(vec![0.0; 5], (2, 1, 1, 3), (1.0, 1.0, 1.0), IDENTITY);
        let err = result.unwrap_err();
        assert!(matches!(err, QcError::InvalidVolume(_)));
        assert!(!err.is_missing_input());

        let vols = vec![vec![1.0; 8], vec![2.0; 7]];
        let result = VolumeSeries::from_volumes(&vols, (2, 2, 2), (1.0, 1.0, 1.0), IDENTITY);
        assert!(matches!(result, Err(QcError::InvalidVolume(_))));
    }

    #[test]
    fn test_series_zero_timepoints_is_refused() {
        let series = VolumeSeries::new(Vec::new(), (2, 2, 2, 0), (1.0, 1.0, 1.0), IDENTITY).unwrap();
        assert!(series.ensure_timepoints().is_err());
    }

    #[test]
    fn test_from_volumes() {
        let vols = vec![vec![1.0; 8], vec![2.0; 8]];
        let series = VolumeSeries::from_volumes(&vols, (2, 2, 2), (1.0, 1.0, 1.0), IDENTITY).unwrap();
        assert_eq!(series.dims(), (2, 2, 2, 2));
        assert_eq!(series.volume(1)[7], 2.0);
    }

    #[test]
    fn test_label_grid_check() {
        let series = VolumeSeries::new(vec![0.0; 8], (2, 2, 2, 1), (1.0, 1.0, 1.0), IDENTITY).unwrap();
        let good = RegionLabelVolume::new(vec![0, 1, 1, 2, 2, 3, 3, 0], (2, 2, 2)).unwrap();
        assert!(good.check_grid(&series).is_ok());
        assert_eq!(good.voxel_count(LABEL_SIGNAL), 2);

        let bad = RegionLabelVolume::new(vec![0; 8], (4, 2, 1)).unwrap();
        assert!(matches!(bad.check_grid(&series), Err(QcError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_labels_from_float_map() {
        let labels = RegionLabelVolume::from_f64(&[0.0, 0.9999, 2.0001, 3.0], (4, 1, 1)).unwrap();
        assert_eq!(labels.labels(), &[0, 1, 2, 3]);
    }
}
