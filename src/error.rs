//! Error types for the QC pipeline
//!
//! Only conditions that abort a run are errors. Empty regions, fits that
//! fail to converge and metrics that cannot be computed travel through the
//! data model as `None` or status values instead.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal QC errors
#[derive(Debug, Error)]
pub enum QcError {
    /// No QC image found for the requested subject/session
    #[error("no QC image found for subject {subject} session {session}")]
    MissingInput { subject: String, session: String },

    /// The series has no timepoints to analyse
    #[error("QC series is empty: {0}")]
    EmptySeries(String),

    /// A volume buffer does not match its declared dimensions
    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    /// Two volumes that must share a grid do not
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("NIfTI error: {0}")]
    Nifti(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("report error: {0}")]
    Report(String),
}

impl QcError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QcError::Io { path: path.into(), source }
    }

    /// True for errors that mean the session has nothing to analyse
    pub fn is_missing_input(&self) -> bool {
        matches!(self, QcError::MissingInput { .. } | QcError::EmptySeries(_))
    }
}
