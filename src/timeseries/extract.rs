//! Region mean timeseries extraction

use log::warn;
use serde::Serialize;

use crate::error::QcError;
use crate::volume::{label_name, RegionLabelVolume, VolumeSeries};

/// Mean intensity over time for one labelled region
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionSeries {
    pub label: i32,
    pub voxel_count: usize,
    /// `None` when the region has no member voxels
    pub values: Option<Vec<f64>>,
}

impl RegionSeries {
    pub fn name(&self) -> &'static str {
        label_name(self.label)
    }
}

/// Region label -> mean intensity timeseries, in extraction order
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionTimeseries {
    nt: usize,
    regions: Vec<RegionSeries>,
}

impl RegionTimeseries {
    pub fn new(nt: usize, regions: Vec<RegionSeries>) -> Self {
        Self { nt, regions }
    }

    pub fn nt(&self) -> usize {
        self.nt
    }

    pub fn regions(&self) -> &[RegionSeries] {
        &self.regions
    }

    pub fn get(&self, label: i32) -> Option<&RegionSeries> {
        self.regions.iter().find(|r| r.label == label)
    }
}

/// Mean of each region in `label_set` at every timepoint
///
/// Regions are reported in `label_set` order. A label with no voxels gives
/// an undefined series rather than an error.
///
/// # Errors
/// `EmptySeries` if the series has no timepoints, `ShapeMismatch` if the
/// label map is on a different grid.
pub fn extract_timeseries(
    series: &VolumeSeries,
    labels: &RegionLabelVolume,
    label_set: &[i32],
) -> Result<RegionTimeseries, QcError> {
    series.ensure_timepoints()?;
    labels.check_grid(series)?;

    let nt = series.nt();
    let mut regions = Vec::with_capacity(label_set.len());

    for &label in label_set {
        let members: Vec<usize> = labels
            .labels()
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect();

        if members.is_empty() {
            warn!("Region {} ({}) has no voxels, timeseries undefined", label, label_name(label));
            regions.push(RegionSeries { label, voxel_count: 0, values: None });
            continue;
        }

        let n = members.len() as f64;
        let values = (0..nt)
            .map(|t| {
                let vol = series.volume(t);
                members.iter().map(|&i| vol[i]).sum::<f64>() / n
            })
            .collect();

        regions.push(RegionSeries { label, voxel_count: members.len(), values: Some(values) });
    }

    Ok(RegionTimeseries { nt, regions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{DEFAULT_LABEL_SET, LABEL_AIR, LABEL_GHOST, LABEL_SIGNAL};

    const AFFINE: [f64; 16] = [0.0; 16];

    fn two_by_two_series() -> VolumeSeries {
        // 4 voxels, 3 timepoints; voxel v at time t = (v + 1) * (t + 1)
        let mut data = Vec::new();
        for t in 0..3 {
            for v in 0..4 {
                data.push(((v + 1) * (t + 1)) as f64);
            }
        }
        VolumeSeries::new(data, (2, 2, 1, 3), (1.0, 1.0, 1.0), AFFINE).unwrap()
    }

    #[test]
    fn test_region_means() {
        let series = two_by_two_series();
        let labels = RegionLabelVolume::new(vec![1, 1, 2, 0], (2, 2, 1)).unwrap();
        let ts = extract_timeseries(&series, &labels, &[LABEL_SIGNAL, LABEL_GHOST]).unwrap();

        assert_eq!(ts.nt(), 3);
        let signal = ts.get(LABEL_SIGNAL).unwrap();
        assert_eq!(signal.voxel_count, 2);
        assert_eq!(signal.values.as_deref(), Some(&[1.5, 3.0, 4.5][..]));
        let ghost = ts.get(LABEL_GHOST).unwrap();
        assert_eq!(ghost.values.as_deref(), Some(&[3.0, 6.0, 9.0][..]));
    }

    #[test]
    fn test_order_follows_label_set() {
        let series = two_by_two_series();
        let labels = RegionLabelVolume::new(vec![3, 2, 1, 0], (2, 2, 1)).unwrap();
        let ts = extract_timeseries(&series, &labels, &DEFAULT_LABEL_SET).unwrap();
        let order: Vec<i32> = ts.regions().iter().map(|r| r.label).collect();
        assert_eq!(order, vec![LABEL_SIGNAL, LABEL_GHOST, LABEL_AIR]);
    }

    #[test]
    fn test_absent_label_is_undefined_not_error() {
        let series = two_by_two_series();
        let labels = RegionLabelVolume::new(vec![1, 1, 0, 0], (2, 2, 1)).unwrap();
        let ts = extract_timeseries(&series, &labels, &DEFAULT_LABEL_SET).unwrap();
        let air = ts.get(LABEL_AIR).unwrap();
        assert_eq!(air.voxel_count, 0);
        assert!(air.values.is_none());
    }

    #[test]
    fn test_zero_timepoints_refused() {
        let series = VolumeSeries::new(Vec::new(), (2, 2, 1, 0), (1.0, 1.0, 1.0), AFFINE).unwrap();
        let labels = RegionLabelVolume::new(vec![1, 1, 2, 3], (2, 2, 1)).unwrap();
        let result = extract_timeseries(&series, &labels, &DEFAULT_LABEL_SET);
        assert!(matches!(result, Err(QcError::EmptySeries(_))));
    }

    #[test]
    fn test_grid_mismatch_refused() {
        let series = two_by_two_series();
        let labels = RegionLabelVolume::new(vec![1, 1, 2, 3], (4, 1, 1)).unwrap();
        assert!(extract_timeseries(&series, &labels, &DEFAULT_LABEL_SET).is_err());
    }
}
