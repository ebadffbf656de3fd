//! QC pipeline orchestration
//!
//! Runs one subject/session through motion correction, temporal statistics,
//! segmentation, region extraction, robust detrending and metric derivation,
//! strictly in that order, then hands the result to the reporter.
//! Each run owns a scoped work directory that is removed on every exit path
//! unless `keep_intermediates` is set.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, error, info, warn};
use tempfile::TempDir;

use crate::config::PipelineConfig;
use crate::error::QcError;
use crate::fft::SpectrumWorkspace;
use crate::metadata::{sidecar_path, AcquisitionMetadata};
use crate::metrics::derive_metrics;
use crate::motion::{MotionCorrector, SkipMotionCorrection, N_MOTION_PARAMS};
use crate::nifti_io::{read_nifti_file, read_series_file, save_nifti_to_file};
use crate::report::{peak_frequencies, JsonReporter, QcReport, QcReporter};
use crate::timeseries::{detrend_timeseries, extract_timeseries, temporal_mean_sd, voxel_sfnr};
use crate::volume::{RegionLabelVolume, VolumeSeries};

/// Region-segmentation collaborator, called with the temporal mean image
pub trait RegionSegmenter {
    fn segment(&self, tmean: &[f64], dims: (usize, usize, usize)) -> Result<RegionLabelVolume, QcError>;
}

/// A precomputed label map is its own segmentation
impl RegionSegmenter for RegionLabelVolume {
    fn segment(&self, _tmean: &[f64], dims: (usize, usize, usize)) -> Result<RegionLabelVolume, QcError> {
        if self.dims() != dims {
            return Err(QcError::ShapeMismatch { expected: dims, actual: self.dims() });
        }
        Ok(self.clone())
    }
}

/// Reads region labels from a NIfTI label image on the series grid
#[derive(Clone, Debug)]
pub struct LabelMapSegmenter {
    pub path: PathBuf,
}

impl LabelMapSegmenter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RegionSegmenter for LabelMapSegmenter {
    fn segment(&self, _tmean: &[f64], dims: (usize, usize, usize)) -> Result<RegionLabelVolume, QcError> {
        let nii = read_nifti_file(&self.path)?;
        if nii.dims != dims {
            return Err(QcError::ShapeMismatch { expected: dims, actual: nii.dims });
        }
        RegionLabelVolume::from_f64(&nii.data, dims)
    }
}

/// One subject/session to process
#[derive(Clone, Debug)]
pub struct QcSession {
    pub subject: String,
    pub session: String,
    /// 4D QC image; `None` when no image was found for the session
    pub image_path: Option<PathBuf>,
}

impl QcSession {
    pub fn new(subject: impl Into<String>, session: impl Into<String>, image_path: Option<PathBuf>) -> Self {
        Self {
            subject: subject.into(),
            session: session.into(),
            image_path,
        }
    }
}

/// Image and metadata loaded for a session, ready for numeric processing
#[derive(Clone, Debug)]
pub struct LoadedSession {
    pub subject: String,
    pub session: String,
    pub series: VolumeSeries,
    pub metadata: AcquisitionMetadata,
}

/// Load a session's image and sidecar metadata
///
/// # Errors
/// `MissingInput` if no image path is known or the file does not exist,
/// `EmptySeries` if the image has no timepoints. A missing sidecar is not
/// an error; defaults are substituted and flagged.
pub fn load_session(session: &QcSession) -> Result<LoadedSession, QcError> {
    let missing = || QcError::MissingInput {
        subject: session.subject.clone(),
        session: session.session.clone(),
    };
    let path = session.image_path.as_deref().ok_or_else(missing)?;
    if !path.is_file() {
        return Err(missing());
    }

    info!("Loading QC image {}", path.display());
    let series = read_series_file(path)?;
    series.ensure_timepoints()?;
    let metadata = AcquisitionMetadata::load_or_default(&sidecar_path(path));

    Ok(LoadedSession {
        subject: session.subject.clone(),
        session: session.session.clone(),
        series,
        metadata,
    })
}

/// Per-run work directory, removed on drop unless retained
struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    fn create(parent: Option<&Path>, subject: &str, session: &str) -> Result<Self, QcError> {
        let prefix = format!("qc_{}_{}_", subject, session);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(p) => {
                std::fs::create_dir_all(p).map_err(|e| QcError::io(p, e))?;
                builder.tempdir_in(p).map_err(|e| QcError::io(p, e))?
            }
            None => builder.tempdir().map_err(|e| QcError::io(std::env::temp_dir(), e))?,
        };
        debug!("Created work directory {}", dir.path().display());
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Keep the directory past the end of the run
    fn retain(self) -> PathBuf {
        self.dir.keep()
    }
}

/// Outcome of one session in a batch
#[derive(Debug)]
pub struct SessionOutcome {
    pub subject: String,
    pub session: String,
    pub result: Result<QcReport, QcError>,
}

/// PipelineOrchestrator: sequences the QC stages for one or more runs
pub struct QcPipeline {
    config: PipelineConfig,
    segmenter: Box<dyn RegionSegmenter>,
    motion: Option<Box<dyn MotionCorrector>>,
    reporter: Option<Box<dyn QcReporter>>,
}

impl QcPipeline {
    /// Pipeline with the given segmentation collaborator
    ///
    /// If `config.report_dir` is set a [`JsonReporter`] writing there is
    /// installed.
    pub fn new(config: PipelineConfig, segmenter: Box<dyn RegionSegmenter>) -> Result<Self, QcError> {
        config.validate()?;
        let reporter = config
            .report_dir
            .as_ref()
            .map(|dir| Box::new(JsonReporter::new(dir.clone())) as Box<dyn QcReporter>);
        Ok(Self {
            config,
            segmenter,
            motion: None,
            reporter,
        })
    }

    pub fn with_motion_corrector(mut self, motion: Box<dyn MotionCorrector>) -> Self {
        self.motion = Some(motion);
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn QcReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn motion_corrector(&self) -> &dyn MotionCorrector {
        match (&self.motion, self.config.skip_motion_correction) {
            (Some(m), false) => m.as_ref(),
            (None, false) => {
                warn!("No motion corrector configured, skipping motion correction");
                &SkipMotionCorrection
            }
            (_, true) => &SkipMotionCorrection,
        }
    }

    /// Load and process one session
    pub fn run_session(&self, session: &QcSession) -> Result<QcReport, QcError> {
        let loaded = load_session(session)?;
        self.run_series(&loaded.subject, &loaded.session, &loaded.series, loaded.metadata)
    }

    /// Process an already-loaded series
    ///
    /// # Errors
    /// `EmptySeries` before any numeric work if the series has no
    /// timepoints; collaborator, grid and I/O errors otherwise.
    pub fn run_series(
        &self,
        subject: &str,
        session: &str,
        series: &VolumeSeries,
        mut metadata: AcquisitionMetadata,
    ) -> Result<QcReport, QcError> {
        series.ensure_timepoints()?;
        let t_run = Instant::now();
        info!("QC run for subject {} session {}", subject, session);

        metadata.annotate(subject, session, series);
        let work = WorkDir::create(self.config.work_dir.as_deref(), subject, session)?;

        // 1. Motion correction
        let t0 = Instant::now();
        let (realigned, motion) = self.motion_corrector().correct(series)?;
        realigned.ensure_timepoints()?;
        if motion.nt() != realigned.nt() {
            warn!(
                "Motion parameters cover {} timepoints, series has {}",
                motion.nt(),
                realigned.nt()
            );
        }
        info!("Motion correction done in {:.1} ms", t0.elapsed().as_secs_f64() * 1000.0);

        // 2. Temporal mean and SD images
        let stats = temporal_mean_sd(&realigned);

        // 3. Segmentation from the temporal mean
        let labels = self.segmenter.segment(&stats.tmean, stats.dims)?;
        labels.check_grid(&realigned)?;
        for &label in &self.config.label_set {
            debug!("Region {} has {} voxels", label, labels.voxel_count(label));
        }

        // 4. Region extraction
        let timeseries = extract_timeseries(&realigned, &labels, &self.config.label_set)?;

        // 5. Robust detrending
        let t0 = Instant::now();
        let fits = detrend_timeseries(&timeseries, &self.config.detrend);
        info!("Detrending done in {:.1} ms", t0.elapsed().as_secs_f64() * 1000.0);

        // 6. Metrics
        let sfnr_map = voxel_sfnr(&realigned, &labels, &fits)?;
        let tr = metadata.repetition_time;
        let time_s = metadata.time_axis(realigned.nt());
        let metrics = derive_metrics(
            &fits,
            &sfnr_map,
            &labels,
            &self.config.metrics,
            motion.max_displacement_um(),
            metadata,
        );

        let mut spectra = SpectrumWorkspace::new(realigned.nt());
        let residual_spectra: Vec<_> = fits
            .iter()
            .map(|(label, fit)| (label, fit.and_then(|f| spectra.power_spectrum(&f.residuals, tr))))
            .collect();
        let residual_peak_hz = peak_frequencies(&residual_spectra);
        let motion_spectra = if motion.nt() == realigned.nt() {
            (0..N_MOTION_PARAMS)
                .map(|col| spectra.power_spectrum(&motion.column(col), tr))
                .collect()
        } else {
            Vec::new()
        };

        // Intermediate images for the reporter
        let spatial = realigned.spatial_dims();
        let vsize = realigned.voxel_size;
        let affine = &realigned.affine;
        for (name, data) in [
            ("tmean", &stats.tmean),
            ("tsd", &stats.tsd),
            ("tsfnr", &stats.tsfnr),
            ("sfnr", &sfnr_map),
            ("labels", &labels.to_f64()),
        ] {
            let path = work.path().join(format!("{}.nii.gz", name));
            save_nifti_to_file(&path, data, spatial, vsize, affine)?;
        }

        let mut report = QcReport {
            subject: subject.to_string(),
            session: session.to_string(),
            time_s,
            timeseries,
            fits,
            metrics,
            motion,
            residual_spectra,
            residual_peak_hz,
            motion_spectra,
            work_dir: Some(work.path().to_path_buf()),
        };

        // 7. Hand over to reporting
        if let Some(reporter) = &self.reporter {
            reporter.report(&report)?;
        }

        if self.config.keep_intermediates {
            let kept = work.retain();
            info!("Intermediate images kept in {}", kept.display());
            report.work_dir = Some(kept);
        } else {
            report.work_dir = None;
        }

        info!(
            "QC run for subject {} session {} finished in {:.2} s",
            subject,
            session,
            t_run.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    /// Process several sessions independently
    ///
    /// A fatal error in one session is logged and recorded in its outcome;
    /// the remaining sessions still run.
    pub fn run_batch(&self, sessions: &[QcSession]) -> Vec<SessionOutcome> {
        self.run_batch_with_progress(sessions, |_, _| {})
    }

    /// Same as run_batch but calls progress_callback(completed, total) after each session
    pub fn run_batch_with_progress<F>(&self, sessions: &[QcSession], mut progress_callback: F) -> Vec<SessionOutcome>
    where
        F: FnMut(usize, usize),
    {
        let total = sessions.len();
        let mut outcomes = Vec::with_capacity(total);
        progress_callback(0, total);

        for (i, s) in sessions.iter().enumerate() {
            let result = self.run_session(s);
            if let Err(e) = &result {
                if e.is_missing_input() {
                    error!("Skipping subject {} session {}: {}", s.subject, s.session, e);
                } else {
                    error!("QC failed for subject {} session {}: {}", s.subject, s.session, e);
                }
            }
            outcomes.push(SessionOutcome {
                subject: s.subject.clone(),
                session: s.session.clone(),
                result,
            });
            progress_callback(i + 1, total);
        }

        outcomes
    }
}
