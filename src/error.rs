//! Error types for the catalog-media library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`PipelineError`]: **Fatal**: the job cannot proceed at all (input
//!   directory missing, nothing to process, summary could not be written).
//!   Returned from [`crate::executor::Pipeline::run`] and turns the job into
//!   the `error` terminal state.
//!
//! * [`ItemError`]: **Non-fatal**: a single work item failed in one stage
//!   (decode glitch, timeout, missing output) while every other item is fine.
//!   Stored inside [`crate::batch::StageResult`] and appended to the job's
//!   error trail; the item is dropped from later stages.
//!
//! * [`TransformError`]: the raw failure a leaf transform reports. The batch
//!   runner wraps it into [`ItemError::Transform`] together with the item and
//!   stage names, so transforms never need to know where they run.

use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

/// All fatal errors returned by a pipeline run.
///
/// Item-level failures use [`ItemError`] and are stored in
/// [`crate::batch::StageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The stage-0 input directory does not exist.
    #[error("Input directory not found: '{path}'")]
    InputMissing { path: PathBuf },

    /// The input directory exists but holds no file with an accepted extension.
    #[error("No processable files found in '{path}' (accepted: {accepted})")]
    NoInputFiles { path: PathBuf, accepted: String },

    /// A media spreadsheet is unreadable or lacks a required column.
    #[error("Cannot use spreadsheet '{path}': {detail}")]
    SheetInvalid { path: PathBuf, detail: String },

    /// An uploaded buffer could not be written into the input directory.
    #[error("Failed to store uploaded file '{name}': {source}")]
    UploadFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// A stage output directory could not be created.
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing the summary spreadsheet failed.
    #[error("Failed to write summary '{path}': {detail}")]
    SummaryFailed { path: PathBuf, detail: String },

    /// Writing the download bundle failed.
    #[error("Failed to write bundle '{path}': {detail}")]
    BundleFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Runtime dependency errors ─────────────────────────────────────────
    /// The PDFium shared library could not be loaded.
    #[error("Failed to bind pdfium library: {0}")]
    PdfiumBindingFailed(String),

    /// The HTTP client for media downloads could not be built.
    #[error("Failed to set up HTTP client: {0}")]
    HttpClient(String),

    // ── Job lifecycle errors ──────────────────────────────────────────────
    /// A job status change that would leave a terminal state or skip a step.
    #[error("Invalid job transition: {from} → {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The background thread for a job could not be spawned.
    #[error("Failed to start job '{job_id}': {source}")]
    SpawnFailed {
        job_id: String,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single work item in a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The transform returned an error.
    #[error("{item}: {stage} failed: {detail}")]
    Transform {
        item: String,
        stage: String,
        detail: String,
    },

    /// The transform did not finish within the per-item timeout.
    #[error("{item}: {stage} timed out after {limit_ms}ms")]
    Timeout {
        item: String,
        stage: String,
        limit_ms: u64,
    },

    /// The transform reported success but its output file is absent.
    #[error("{item}: {stage} produced no output at '{path}'")]
    OutputMissing {
        item: String,
        stage: String,
        path: PathBuf,
    },

    /// The worker running the transform panicked.
    #[error("{item}: {stage} panicked: {detail}")]
    Panicked {
        item: String,
        stage: String,
        detail: String,
    },

    /// The item was rejected before the first stage ran.
    #[error("{item}: skipped: {reason}")]
    Skipped { item: String, reason: String },
}

impl ItemError {
    /// Name of the work item this error belongs to.
    pub fn item(&self) -> &str {
        match self {
            ItemError::Transform { item, .. }
            | ItemError::Timeout { item, .. }
            | ItemError::OutputMissing { item, .. }
            | ItemError::Panicked { item, .. }
            | ItemError::Skipped { item, .. } => item,
        }
    }
}

/// Failure reported by a leaf transform.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf: {0}")]
    Pdf(String),

    #[error("archive: {0}")]
    Archive(String),

    /// PDFium failed to load or render a document.
    #[error("pdfium: {0}")]
    Pdfium(String),

    /// A media download failed (connection, HTTP status, body).
    #[error("download: {0}")]
    Download(String),

    /// Ghostscript is missing or exited with an error.
    #[error("ghostscript: {0}")]
    Ghostscript(String),

    /// The PDF template the overlay is merged onto does not exist.
    #[error("template not found: '{path}'")]
    TemplateMissing { path: PathBuf },

    #[error("{0}")]
    Unsupported(String),
}

impl From<lopdf::Error> for TransformError {
    fn from(e: lopdf::Error) -> Self {
        TransformError::Pdf(e.to_string())
    }
}

impl From<reqwest::Error> for TransformError {
    fn from(e: reqwest::Error) -> Self {
        TransformError::Download(e.to_string())
    }
}

impl From<zip::result::ZipError> for TransformError {
    fn from(e: zip::result::ZipError) -> Self {
        TransformError::Archive(e.to_string())
    }
}
