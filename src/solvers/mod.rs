//! Iterative solvers

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{huber_levenberg_marquardt, LmParams, LmResult, LmStatus};
