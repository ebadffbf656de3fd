//! QC-Core: phantom fMRI quality-control signal extraction and robust detrending
//!
//! This crate turns a realigned 4D phantom timeseries and a region label map
//! into per-region timeseries, robustly detrended residuals and scalar QC
//! metrics (SNR, SFNR, drift, spike counts).
//!
//! # Modules
//! - `volume`: 4D series and 3D label volumes
//! - `nifti_io`: NIfTI loading and saving
//! - `metadata`: JSON sidecar metadata with default substitution
//! - `motion`: Motion parameters and the motion-correction collaborator
//! - `timeseries`: Temporal statistics, region extraction, trend model, detrending
//! - `solvers`: Huber-robust Levenberg-Marquardt
//! - `metrics`: QC metric derivation
//! - `fft`: Power spectra of residual and motion timeseries
//! - `report`: Reporting handover, JSON reporter, multi-session trends
//! - `pipeline`: Run orchestration and batch processing
//! - `config`: Pipeline configuration

// Core modules
pub mod error;
pub mod volume;
pub mod fft;

// Algorithm modules
pub mod timeseries;
pub mod solvers;
pub mod metrics;
pub mod utils;

// I/O modules
pub mod nifti_io;
pub mod metadata;
pub mod motion;
pub mod report;

// Orchestration
pub mod config;
pub mod pipeline;

pub use config::{load_config, PipelineConfig};
pub use error::QcError;
pub use metrics::{derive_metrics, MetricParams, QcMetrics, RegionMetrics};
pub use pipeline::{load_session, QcPipeline, QcSession, RegionSegmenter};
pub use report::{summarize_trends, JsonReporter, QcReport, QcReporter};
pub use volume::{RegionLabelVolume, VolumeSeries};
