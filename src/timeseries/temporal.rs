//! Voxelwise temporal statistics
//!
//! Maps are flat 3D volumes on the series grid. Voxels where a ratio is
//! undefined (zero temporal SD) hold NaN, the standard NIfTI convention;
//! spatial summaries skip them.

use crate::error::QcError;
use crate::timeseries::detrend::TrendFits;
use crate::volume::{RegionLabelVolume, VolumeSeries};

/// Temporal mean, SD and mean/SD images
#[derive(Clone, Debug)]
pub struct TemporalStats {
    pub tmean: Vec<f64>,
    /// Population SD over time (ddof = 0)
    pub tsd: Vec<f64>,
    /// tmean / tsd of the raw (not detrended) series
    pub tsfnr: Vec<f64>,
    pub dims: (usize, usize, usize),
}

/// Temporal mean and SD of every voxel
pub fn temporal_mean_sd(series: &VolumeSeries) -> TemporalStats {
    let n_vox = series.n_voxels();
    let nt = series.nt();
    let mut tmean = vec![0.0; n_vox];
    let mut tsd = vec![0.0; n_vox];

    if nt > 0 {
        for t in 0..nt {
            for (m, &v) in tmean.iter_mut().zip(series.volume(t)) {
                *m += v;
            }
        }
        for m in tmean.iter_mut() {
            *m /= nt as f64;
        }
        for t in 0..nt {
            for ((s, &v), &m) in tsd.iter_mut().zip(series.volume(t)).zip(tmean.iter()) {
                *s += (v - m) * (v - m);
            }
        }
        for s in tsd.iter_mut() {
            *s = (*s / nt as f64).sqrt();
        }
    }

    let tsfnr = tmean
        .iter()
        .zip(tsd.iter())
        .map(|(&m, &s)| ratio_or_nan(m, s))
        .collect();

    TemporalStats { tmean, tsd, tsfnr, dims: series.spatial_dims() }
}

#[inline]
fn ratio_or_nan(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        f64::NAN
    }
}

/// Voxelwise SFNR after removing each voxel's region trend
///
/// For a voxel in a fitted region, a constant and the region's fitted trend
/// shape are projected out of its timeseries (two-regressor least squares,
/// voxel-specific trend scale); voxels outside fitted regions lose only
/// their mean, as do regions whose fitted curve has a different length.
/// The map holds tmean / SD(residual).
///
/// # Errors
/// `ShapeMismatch` if `labels` is not on the grid of `series`.
pub fn voxel_sfnr(
    series: &VolumeSeries,
    labels: &RegionLabelVolume,
    fits: &TrendFits,
) -> Result<Vec<f64>, QcError> {
    labels.check_grid(series)?;
    let n_vox = series.n_voxels();
    let nt = series.nt();
    let mut sfnr = vec![f64::NAN; n_vox];
    if nt == 0 {
        return Ok(sfnr);
    }

    for (voxel, &label) in labels.labels().iter().enumerate() {
        let ts = series.voxel_timeseries(voxel);
        let mean = ts.iter().sum::<f64>() / nt as f64;

        // Fitted curves are zero-mean, so the constant and trend regressors are orthogonal
        let shape = fits
            .get(label)
            .map(|f| f.fitted.as_slice())
            .filter(|g| g.len() == nt);
        let beta = shape.map_or(0.0, |g| {
            let gg: f64 = g.iter().map(|v| v * v).sum();
            if gg > 0.0 {
                ts.iter().zip(g).map(|(v, gi)| (v - mean) * gi).sum::<f64>() / gg
            } else {
                0.0
            }
        });

        let mut ss = 0.0;
        for (t, &v) in ts.iter().enumerate() {
            let trend = shape.map_or(0.0, |g| beta * g[t]);
            let e = v - mean - trend;
            ss += e * e;
        }
        sfnr[voxel] = ratio_or_nan(mean, (ss / nt as f64).sqrt());
    }

    Ok(sfnr)
}
