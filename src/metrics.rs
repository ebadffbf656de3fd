//! QC metric derivation from trend fits
//!
//! Every metric is an `Option<f64>`: `None` means the metric could not be
//! computed (undefined input or a zero denominator) and is never coerced to
//! zero. A computed zero stays `Some(0.0)`.

use std::collections::BTreeMap;
use std::f64::consts::FRAC_PI_2;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::metadata::AcquisitionMetadata;
use crate::motion::MotionSummary;
use crate::timeseries::detrend::{TrendFitResult, TrendFits};
use crate::utils::stats::{mad_sigma, mean_finite};
use crate::volume::{label_name, RegionLabelVolume, LABEL_AIR, LABEL_SIGNAL};

/// Metric thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricParams {
    /// Spike threshold in units of the robust noise sigma (default 5.0)
    pub spike_threshold_sigma: f64,
    /// MAD to Gaussian sigma scale (default 1.4826)
    pub mad_scale: f64,
}

impl Default for MetricParams {
    fn default() -> Self {
        Self {
            spike_threshold_sigma: 5.0,
            mad_scale: 1.4826,
        }
    }
}

/// Metrics for one region
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionMetrics {
    pub label: i32,
    pub name: String,
    /// Temporal mean of the region timeseries
    pub mean: Option<f64>,
    /// Robust residual sigma (scaled MAD)
    pub noise_sigma: Option<f64>,
    pub spike_count: Option<usize>,
    /// Percent change of the fitted trend from first to last timepoint
    pub drift_percent: Option<f64>,
    /// Set when the trend fit hit its iteration limit or diverged
    pub low_confidence: bool,
}

/// Scalar QC metrics for one run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QcMetrics {
    /// Per-region metrics in extraction order
    pub regions: Vec<RegionMetrics>,
    /// Signal mean over the half-normal corrected air noise
    pub snr: Option<f64>,
    /// Spatial mean of the voxelwise SFNR over the signal region
    pub sfnr: Option<f64>,
    /// Gaussian-equivalent noise sigma from the air region mean
    pub noise_floor: Option<f64>,
    pub motion: MotionSummary,
    pub metadata: AcquisitionMetadata,
}

impl QcMetrics {
    pub fn region(&self, label: i32) -> Option<&RegionMetrics> {
        self.regions.iter().find(|r| r.label == label)
    }

    /// Flat name -> value view used for reporting and trend summaries
    ///
    /// Global keys are `SNR`, `SFNR`, `NoiseFloor`, `Drift` (signal region)
    /// and the motion maxima; each region adds `<Name>Mean`, `<Name>Sigma`,
    /// `<Name>Spikes` and `<Name>Drift`.
    pub fn flatten(&self) -> BTreeMap<String, Option<f64>> {
        let mut flat = BTreeMap::new();
        flat.insert("SNR".to_string(), self.snr);
        flat.insert("SFNR".to_string(), self.sfnr);
        flat.insert("NoiseFloor".to_string(), self.noise_floor);
        flat.insert(
            "Drift".to_string(),
            self.region(LABEL_SIGNAL).and_then(|r| r.drift_percent),
        );
        flat.insert("MaxAbsDx".to_string(), Some(self.motion.max_dx_um));
        flat.insert("MaxAbsDy".to_string(), Some(self.motion.max_dy_um));
        flat.insert("MaxAbsDz".to_string(), Some(self.motion.max_dz_um));

        for r in &self.regions {
            flat.insert(format!("{}Mean", r.name), r.mean);
            flat.insert(format!("{}Sigma", r.name), r.noise_sigma);
            flat.insert(format!("{}Spikes", r.name), r.spike_count.map(|c| c as f64));
            flat.insert(format!("{}Drift", r.name), r.drift_percent);
        }
        flat
    }
}

/// Percent drift of a fitted trend: `(f[n-1] - f[0]) / f[0] * 100`
///
/// `None` for an empty curve or a zero/non-finite first value.
pub fn drift_percent(fitted: &[f64]) -> Option<f64> {
    let (&first, &last) = (fitted.first()?, fitted.last()?);
    if first == 0.0 || !first.is_finite() || !last.is_finite() {
        return None;
    }
    Some((last - first) / first * 100.0)
}

/// Number of residual samples with `|r| > threshold * sigma`
pub fn count_spikes(residuals: &[f64], sigma: f64, threshold: f64) -> usize {
    let limit = threshold * sigma;
    residuals.iter().filter(|r| r.abs() > limit).count()
}

fn region_metrics(label: i32, fit: Option<&TrendFitResult>, params: &MetricParams) -> RegionMetrics {
    let name = label_name(label).to_string();
    let Some(fit) = fit else {
        warn!("Region {} ({}) is undefined, all its metrics are undefined", label, name);
        return RegionMetrics {
            label,
            name,
            mean: None,
            noise_sigma: None,
            spike_count: None,
            drift_percent: None,
            low_confidence: true,
        };
    };

    let noise_sigma = mad_sigma(&fit.residuals, params.mad_scale);
    let spike_count = noise_sigma.map(|s| count_spikes(&fit.residuals, s, params.spike_threshold_sigma));

    // Drift needs a trend; a diverged fit has none
    let drift = if fit.params.is_some() {
        drift_percent(&fit.fitted_with_offset())
    } else {
        None
    };
    if drift.is_none() {
        warn!("Drift undefined for region {} ({})", label, name);
    }

    RegionMetrics {
        label,
        name,
        mean: Some(fit.offset).filter(|m| m.is_finite()),
        noise_sigma,
        spike_count,
        drift_percent: drift,
        low_confidence: fit.status.is_low_confidence(),
    }
}

/// Derive QC metrics from the trend fits and the voxelwise SFNR map
///
/// SNR uses the air region mean as a half-normal noise estimate:
/// `sigma = mean_air * sqrt(pi/2)`. SFNR averages the finite voxels of
/// `sfnr_map` inside the signal region; it is undefined if the map does not
/// hold one value per label voxel.
pub fn derive_metrics(
    fits: &TrendFits,
    sfnr_map: &[f64],
    labels: &RegionLabelVolume,
    params: &MetricParams,
    motion: MotionSummary,
    metadata: AcquisitionMetadata,
) -> QcMetrics {
    let regions: Vec<RegionMetrics> = fits
        .iter()
        .map(|(label, fit)| region_metrics(label, fit, params))
        .collect();

    let mean_of = |label: i32| {
        regions
            .iter()
            .find(|r| r.label == label)
            .and_then(|r| r.mean)
    };

    let noise_floor = mean_of(LABEL_AIR).map(|m| m * FRAC_PI_2.sqrt());
    let snr = match (mean_of(LABEL_SIGNAL), noise_floor) {
        (Some(signal), Some(noise)) if noise > 0.0 => Some(signal / noise),
        _ => {
            warn!("SNR undefined: signal or air region mean unavailable or zero");
            None
        }
    };

    let sfnr = if sfnr_map.len() == labels.labels().len() {
        mean_finite(
            labels
                .labels()
                .iter()
                .zip(sfnr_map.iter())
                .filter(|&(&l, _)| l == LABEL_SIGNAL)
                .map(|(_, &v)| v),
        )
    } else {
        warn!(
            "SFNR map has {} voxels but the label map has {}",
            sfnr_map.len(),
            labels.labels().len()
        );
        None
    };
    if sfnr.is_none() {
        warn!("SFNR undefined: no finite voxel SFNR in the signal region");
    }

    QcMetrics {
        regions,
        snr,
        sfnr,
        noise_floor,
        motion,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::detrend::FitStatus;
    use crate::timeseries::trend::TrendParams;
    use crate::volume::LABEL_GHOST;

    fn fit(label: i32, offset: f64, fitted: Vec<f64>, residuals: Vec<f64>) -> TrendFitResult {
        TrendFitResult {
            label,
            params: Some(TrendParams { amplitude: 0.0, time_constant: 3.0, slope: 0.0 }),
            offset,
            fitted,
            residuals,
            status: FitStatus::Converged,
        }
    }

    fn labels() -> RegionLabelVolume {
        RegionLabelVolume::new(vec![1, 1, 2, 3], (2, 2, 1)).unwrap()
    }

    #[test]
    fn test_drift_percent() {
        assert_eq!(drift_percent(&[100.0, 101.0, 102.0]), Some(2.0));
        assert_eq!(drift_percent(&[-50.0, -55.0]), Some(10.0));
        assert_eq!(drift_percent(&[]), None);
    }

    #[test]
    fn test_drift_undefined_when_first_fitted_value_is_zero() {
        let d = drift_percent(&[0.0, 1.0, 2.0]);
        assert!(d.is_none());
        assert_ne!(d, Some(0.0));
    }

    #[test]
    fn test_count_spikes() {
        let r = [0.0, 1.0, -6.0, 5.0, 7.0];
        assert_eq!(count_spikes(&r, 1.0, 5.0), 2);
        assert_eq!(count_spikes(&[0.0; 4], 0.0, 5.0), 0);
    }

    #[test]
    fn test_snr_uses_half_normal_correction() {
        let nt = 10;
        let fits = TrendFits::new(vec![
            (1, Some(fit(1, 1000.0, vec![0.0; nt], vec![0.0; nt]))),
            (2, Some(fit(2, 20.0, vec![0.0; nt], vec![0.0; nt]))),
            (3, Some(fit(3, 10.0, vec![0.0; nt], vec![0.0; nt]))),
        ]);
        let sfnr_map = vec![200.0, f64::NAN, 5.0, 1.0];
        let m = derive_metrics(
            &fits,
            &sfnr_map,
            &labels(),
            &MetricParams::default(),
            MotionSummary::default(),
            AcquisitionMetadata::default(),
        );

        let noise = 10.0 * (std::f64::consts::PI / 2.0).sqrt();
        assert!((m.noise_floor.unwrap() - noise).abs() < 1e-12);
        assert!((m.snr.unwrap() - 1000.0 / noise).abs() < 1e-9);
        // NaN voxel skipped, non-signal voxels ignored
        assert_eq!(m.sfnr, Some(200.0));
        assert_eq!(m.region(LABEL_GHOST).unwrap().mean, Some(20.0));
    }

    #[test]
    fn test_sfnr_undefined_for_map_of_other_size() {
        let nt = 10;
        let fits = TrendFits::new(vec![(1, Some(fit(1, 1000.0, vec![0.0; nt], vec![0.0; nt])))]);
        // Two voxels short: the signal voxels would still zip
        let m = derive_metrics(
            &fits,
            &[200.0, 200.0],
            &labels(),
            &MetricParams::default(),
            MotionSummary::default(),
            AcquisitionMetadata::default(),
        );
        assert!(m.sfnr.is_none());
        assert_eq!(m.region(LABEL_SIGNAL).unwrap().mean, Some(1000.0));
    }

    #[test]
    fn test_noise_sigma_and_spikes_from_residuals() {
        let mut residuals: Vec<f64> = (0..21).map(|i| i as f64 - 10.0).collect();
        residuals[0] = 1000.0;
        let n = residuals.len();
        let fits = TrendFits::new(vec![(1, Some(fit(1, 500.0, vec![0.0; n], residuals)))]);
        let m = derive_metrics(
            &fits,
            &[f64::NAN; 4],
            &labels(),
            &MetricParams::default(),
            MotionSummary::default(),
            AcquisitionMetadata::default(),
        );
        let signal = m.region(LABEL_SIGNAL).unwrap();
        let sigma = signal.noise_sigma.unwrap();
        assert!(sigma > 5.0 && sigma < 9.0, "sigma {}", sigma);
        assert_eq!(signal.spike_count, Some(1));
        // Flat fitted curve at the offset: zero drift is a computed value
        assert_eq!(signal.drift_percent, Some(0.0));
        assert!(m.sfnr.is_none());
        assert!(m.snr.is_none());
    }

    #[test]
    fn test_undefined_region_propagates() {
        let fits = TrendFits::new(vec![(1, None), (3, None)]);
        let m = derive_metrics(
            &fits,
            &[1.0; 4],
            &labels(),
            &MetricParams::default(),
            MotionSummary::default(),
            AcquisitionMetadata::default(),
        );
        let signal = m.region(LABEL_SIGNAL).unwrap();
        assert!(signal.mean.is_none());
        assert!(signal.spike_count.is_none());
        assert!(signal.drift_percent.is_none());
        assert!(signal.low_confidence);
        assert!(m.snr.is_none());
        assert!(m.noise_floor.is_none());
    }

    #[test]
    fn test_diverged_fit_is_low_confidence_without_drift() {
        let nt = 8;
        let mut f = fit(1, 100.0, vec![0.0; nt], vec![0.5; nt]);
        f.params = None;
        f.status = FitStatus::Diverged;
        let fits = TrendFits::new(vec![(1, Some(f))]);
        let m = derive_metrics(
            &fits,
            &[f64::NAN; 4],
            &labels(),
            &MetricParams::default(),
            MotionSummary::default(),
            AcquisitionMetadata::default(),
        );
        let signal = m.region(LABEL_SIGNAL).unwrap();
        assert!(signal.low_confidence);
        assert!(signal.drift_percent.is_none());
        assert_eq!(signal.mean, Some(100.0));
    }

    #[test]
    fn test_flatten_keys() {
        let nt = 4;
        let fits = TrendFits::new(vec![
            (1, Some(fit(1, 10.0, vec![0.0; nt], vec![0.0; nt]))),
            (2, None),
            (3, Some(fit(3, 1.0, vec![0.0; nt], vec![0.0; nt]))),
        ]);
        let m = derive_metrics(
            &fits,
            &[1.0; 4],
            &labels(),
            &MetricParams::default(),
            MotionSummary::default(),
            AcquisitionMetadata::default(),
        );
        let flat = m.flatten();
        assert_eq!(flat["NyquistSpikes"], None);
        assert_eq!(flat["AirSpikes"], Some(0.0));
        assert_eq!(flat["Drift"], Some(0.0));
        assert!(flat["SNR"].is_some());
        assert!(flat.contains_key("MaxAbsDz"));
    }
}
