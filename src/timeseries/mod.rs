//! Region timeseries: extraction, trend model, robust detrending and
//! voxelwise temporal statistics

pub mod detrend;
pub mod extract;
pub mod temporal;
pub mod trend;

pub use detrend::{detrend_timeseries, fit_trend, DetrendParams, FitStatus, TrendFitResult, TrendFits};
pub use extract::{extract_timeseries, RegionSeries, RegionTimeseries};
pub use temporal::{temporal_mean_sd, voxel_sfnr, TemporalStats};
pub use trend::TrendParams;
