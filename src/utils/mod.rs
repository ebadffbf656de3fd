//! Shared numeric helpers

pub mod stats;

pub use stats::{mad_sigma, mean, mean_finite, median};
