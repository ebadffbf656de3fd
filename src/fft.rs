//! Power spectra of QC timeseries using rustfft
//!
//! Residual and motion-parameter spectra are handed to reporting as plain
//! vectors. Frequencies follow numpy.fft.rfftfreq conventions.

use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use serde::Serialize;
use std::sync::Arc;

/// One-sided power spectrum
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PowerSpectrum {
    /// Frequencies in Hz, 0 ..= Nyquist
    pub freq: Vec<f64>,
    /// |X(f)|² / n
    pub power: Vec<f64>,
}

impl PowerSpectrum {
    /// Frequency of the largest non-DC component
    pub fn peak_frequency(&self) -> Option<f64> {
        self.power
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, p)| p.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.freq[i])
    }
}

/// FFT workspace that caches the plan and scratch buffer for one length
pub struct SpectrumWorkspace {
    n: usize,
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
    buffer: Vec<Complex64>,
}

impl SpectrumWorkspace {
    /// Create a workspace for series of length `n`
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft(n, FftDirection::Forward);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            n,
            fft,
            scratch,
            buffer: vec![Complex64::new(0.0, 0.0); n],
        }
    }

    /// Power spectrum of `x` (mean removed) sampled every `tr` seconds
    ///
    /// Returns `None` if `x` does not match the workspace length or holds
    /// non-finite values.
    pub fn power_spectrum(&mut self, x: &[f64], tr: f64) -> Option<PowerSpectrum> {
        if x.len() != self.n || self.n == 0 || x.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let mean = x.iter().sum::<f64>() / self.n as f64;
        for (c, &v) in self.buffer.iter_mut().zip(x.iter()) {
            *c = Complex64::new(v - mean, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let n_pos = self.n / 2 + 1;
        let power = self.buffer[..n_pos]
            .iter()
            .map(|c| c.norm_sqr() / self.n as f64)
            .collect();
        Some(PowerSpectrum { freq: rfftfreq(self.n, tr), power })
    }
}

/// Non-negative FFT frequencies for a real input of length `n`
/// Matches numpy.fft.rfftfreq(n, d)
pub fn rfftfreq(n: usize, d: f64) -> Vec<f64> {
    let val = 1.0 / (n as f64 * d);
    (0..n / 2 + 1).map(|i| i as f64 * val).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_rfftfreq() {
        let freq = rfftfreq(4, 1.0);
        assert_eq!(freq, vec![0.0, 0.25, 0.5]);

        let freq = rfftfreq(5, 2.0);
        assert_eq!(freq.len(), 3);
        assert!((freq[2] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_sinusoid_peak() {
        // 64 samples at TR = 2 s, 8 cycles -> 8 / 128 Hz
        let n = 64;
        let tr = 2.0;
        let x: Vec<f64> = (0..n).map(|i| 3.0 + (2.0 * PI * 8.0 * i as f64 / n as f64).sin()).collect();

        let mut ws = SpectrumWorkspace::new(n);
        let ps = ws.power_spectrum(&x, tr).unwrap();
        assert_eq!(ps.power.len(), n / 2 + 1);
        assert!((ps.peak_frequency().unwrap() - 8.0 / 128.0).abs() < 1e-12);
        // Mean removed before the transform
        assert!(ps.power[0] < 1e-20);
    }

    #[test]
    fn test_parseval() {
        let n = 32;
        let x: Vec<f64> = (0..n).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
        let mean = x.iter().sum::<f64>() / n as f64;
        let energy: f64 = x.iter().map(|v| (v - mean) * (v - mean)).sum();

        let ps = SpectrumWorkspace::new(n).power_spectrum(&x, 1.0).unwrap();
        // Two-sided sum: double every bin except DC and Nyquist
        let two_sided: f64 = ps
            .power
            .iter()
            .enumerate()
            .map(|(i, p)| if i == 0 || i == n / 2 { *p } else { 2.0 * p })
            .sum();
        assert!((two_sided - energy).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut ws = SpectrumWorkspace::new(8);
        assert!(ws.power_spectrum(&[0.0; 7], 1.0).is_none());
        assert!(ws.power_spectrum(&[f64::NAN; 8], 1.0).is_none());
    }
}
