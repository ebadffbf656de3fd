//! Common test utilities for QC-core integration tests
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use qc_core::volume::{idx3d, LABEL_AIR, LABEL_BACKGROUND, LABEL_GHOST, LABEL_SIGNAL};
use qc_core::{RegionLabelVolume, VolumeSeries};

pub const IDENTITY: [f64; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Exponential + linear trend with a constant baseline
#[derive(Clone, Copy, Debug)]
pub struct Trend {
    pub baseline: f64,
    pub amplitude: f64,
    pub time_constant: f64,
    pub slope: f64,
}

impl Trend {
    pub fn at(&self, t: usize) -> f64 {
        let t = t as f64;
        self.baseline + self.amplitude * (-t / self.time_constant).exp() + self.slope * t
    }
}

/// Synthetic phantom: an 8x8x4 grid with all four labels
///
/// Signal occupies x,y in 2..6, the Nyquist ghost the band y < 2 above it,
/// air the side bands x < 2 and x >= 6 for y >= 2; the rest is background.
pub struct Phantom {
    pub dims: (usize, usize, usize),
    pub nt: usize,
    pub signal: Trend,
    pub ghost: Trend,
    pub air: Trend,
    /// Per-voxel Gaussian noise SD
    pub voxel_sigma: f64,
    /// Timepoints where every signal voxel carries a spike
    pub spike_times: Vec<usize>,
    /// Spike height in units of the signal region's mean-timeseries noise SD
    pub spike_sigmas: f64,
    pub seed: u64,
}

impl Default for Phantom {
    fn default() -> Self {
        Self {
            dims: (8, 8, 4),
            nt: 100,
            signal: Trend { baseline: 1000.0, amplitude: 20.0, time_constant: 3.0, slope: 0.05 },
            ghost: Trend { baseline: 50.0, amplitude: 2.0, time_constant: 3.0, slope: 0.01 },
            air: Trend { baseline: 10.0, amplitude: 1.0, time_constant: 3.0, slope: 0.005 },
            voxel_sigma: 2.0,
            spike_times: Vec::new(),
            spike_sigmas: 8.0,
            seed: 42,
        }
    }
}

impl Phantom {
    pub fn labels(&self) -> RegionLabelVolume {
        let (nx, ny, nz) = self.dims;
        let mut labels = vec![LABEL_BACKGROUND; nx * ny * nz];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let inner_x = (2..6).contains(&i);
                    labels[idx3d(i, j, k, nx, ny)] = if inner_x && (2..6).contains(&j) {
                        LABEL_SIGNAL
                    } else if inner_x && j < 2 {
                        LABEL_GHOST
                    } else if !inner_x && j >= 2 {
                        LABEL_AIR
                    } else {
                        LABEL_BACKGROUND
                    };
                }
            }
        }
        RegionLabelVolume::new(labels, self.dims).unwrap()
    }

    /// Noise SD of the signal region's mean timeseries
    pub fn signal_mean_sigma(&self) -> f64 {
        let n = self.labels().voxel_count(LABEL_SIGNAL) as f64;
        self.voxel_sigma / n.sqrt()
    }

    /// Build the 4D series
    ///
    /// At a spike time every signal voxel sits exactly `spike_sigmas` region
    /// noise SDs above the trend, so the region mean carries a spike of that
    /// height.
    pub fn series(&self) -> VolumeSeries {
        let labels = self.labels();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = Normal::new(0.0, self.voxel_sigma).unwrap();
        let spike = self.spike_sigmas * self.signal_mean_sigma();

        let volumes: Vec<Vec<f64>> = (0..self.nt)
            .map(|t| {
                let spiked = self.spike_times.contains(&t);
                labels
                    .labels()
                    .iter()
                    .map(|&l| {
                        let n = noise.sample(&mut rng);
                        match l {
                            LABEL_SIGNAL if spiked => self.signal.at(t) + spike,
                            LABEL_SIGNAL => self.signal.at(t) + n,
                            LABEL_GHOST => self.ghost.at(t) + n,
                            LABEL_AIR => self.air.at(t) + n,
                            _ => 0.0,
                        }
                    })
                    .collect()
            })
            .collect();

        VolumeSeries::from_volumes(&volumes, self.dims, (3.0, 3.0, 5.0), IDENTITY).unwrap()
    }
}

/// Relative difference |a - b| / |b|
pub fn rel_diff(a: f64, b: f64) -> f64 {
    (a - b).abs() / b.abs()
}
