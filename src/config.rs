//! Configuration types for batch media conversion.
//!
//! Every pipeline reads its knobs from one [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The config is `Clone + Serialize` so a job can
//! log exactly what it ran with and two runs can be diffed.
//!
//! # Concurrency policy
//! The worker count of each batch is derived from the storage the project
//! lives on: network shares get at most two workers, local disks up to the
//! pipeline's ceiling. Both are capped by the number of logical CPUs.
//! An explicit [`PipelineConfigBuilder::concurrency`] overrides the policy.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker ceiling for image and drawing stages on local storage.
pub const LOCAL_WORKER_CEILING: usize = 8;
/// Worker ceiling for CAD archiving on local storage.
pub const ARCHIVE_WORKER_CEILING: usize = 4;
/// Worker ceiling for any stage on network storage.
pub const NETWORK_WORKER_CEILING: usize = 2;
/// Worker ceiling for PDF page rendering. PDFium renders are serialised.
pub const PDF_WORKER_CEILING: usize = 1;
/// Worker ceiling for media downloads.
pub const DOWNLOAD_WORKER_CEILING: usize = 4;

/// Per-item timeout for image and drawing transforms.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-item timeout for CAD archiving and multi-page PDF rendering.
pub const DEFAULT_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(60);
/// Per-item timeout for one media download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(90);

/// Allowed range of [`PipelineConfig::pdf_zoom`].
pub const PDF_ZOOM_RANGE: std::ops::RangeInclusive<f32> = 1.0..=5.0;

/// Configuration for one pipeline run.
///
/// # Example
/// ```rust
/// use catalog_media::{PipelineConfig, StorageKind};
///
/// let config = PipelineConfig::builder("/data/projects/spring-catalog")
///     .storage(StorageKind::Network)
///     .secondary_root("/mnt/media")
///     .build()
///     .unwrap();
/// assert!(config.worker_count(8) <= 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Project root holding the fixed stage directories (or, for CAD
    /// archiving, the source folder itself).
    pub project_root: PathBuf,

    /// Where the project lives. Default: [`StorageKind::Local`].
    pub storage: StorageKind,

    /// Explicit worker count. `None` applies the storage policy.
    pub concurrency: Option<usize>,

    /// Explicit per-item timeout in seconds. `None` uses the pipeline default.
    pub item_timeout_secs: Option<u64>,

    /// Freshness window of the directory-listing cache in seconds. Default: 300.
    pub listing_ttl_secs: u64,

    /// Root of the auxiliary copy destination. `None` disables the copy step.
    pub secondary_root: Option<PathBuf>,

    /// Page format technical drawings are composed for.
    pub drawing_format: DrawingFormat,

    /// PDF template technical drawings are merged onto.
    pub template_pdf: Option<PathBuf>,

    /// TrueType/OpenType font for the date stamp. `None` asks the system
    /// font database for Arial, then any sans-serif face.
    pub font_path: Option<PathBuf>,

    /// Ghostscript executable. `None` searches `PATH`.
    pub ghostscript: Option<PathBuf>,

    /// Resolution EPS sources are rasterised at. Range: 72–1200. Default: 600.
    pub eps_dpi: u32,

    /// Scale factor PDF pages are rendered at (1.0 = 72 dpi). Range: 1.0–5.0.
    /// Default: 3.0.
    pub pdf_zoom: f32,

    /// PDFium shared library. `None` looks next to the executable, then in
    /// the system library paths.
    pub pdfium_library: Option<PathBuf>,
}

impl PipelineConfig {
    /// Create a new builder rooted at `project_root`.
    pub fn builder(project_root: impl Into<PathBuf>) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: PipelineConfig {
                project_root: project_root.into(),
                storage: StorageKind::default(),
                concurrency: None,
                item_timeout_secs: None,
                listing_ttl_secs: 300,
                secondary_root: None,
                drawing_format: DrawingFormat::default(),
                template_pdf: None,
                font_path: None,
                ghostscript: None,
                eps_dpi: 600,
                pdf_zoom: 3.0,
                pdfium_library: None,
            },
        }
    }

    /// Worker count for a stage whose local-storage ceiling is `ceiling`.
    pub fn worker_count(&self, ceiling: usize) -> usize {
        match self.concurrency {
            Some(n) => n.max(1),
            None => worker_count(self.storage, ceiling),
        }
    }

    /// Per-item timeout, falling back to `default` when not overridden.
    pub fn item_timeout(&self, default: Duration) -> Duration {
        self.item_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn storage(mut self, storage: StorageKind) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = Some(n.max(1));
        self
    }

    pub fn item_timeout_secs(mut self, secs: u64) -> Self {
        self.config.item_timeout_secs = Some(secs);
        self
    }

    pub fn listing_ttl_secs(mut self, secs: u64) -> Self {
        self.config.listing_ttl_secs = secs;
        self
    }

    pub fn secondary_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.secondary_root = Some(root.into());
        self
    }

    pub fn drawing_format(mut self, format: DrawingFormat) -> Self {
        self.config.drawing_format = format;
        self
    }

    pub fn template_pdf(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.template_pdf = Some(path.into());
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    pub fn ghostscript(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ghostscript = Some(path.into());
        self
    }

    pub fn eps_dpi(mut self, dpi: u32) -> Self {
        self.config.eps_dpi = dpi.clamp(72, 1200);
        self
    }

    pub fn pdf_zoom(mut self, zoom: f32) -> Self {
        self.config.pdf_zoom = zoom;
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.project_root.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Project root must not be empty".into(),
            ));
        }
        if c.item_timeout_secs == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "Per-item timeout must be > 0 seconds".into(),
            ));
        }
        if c.concurrency == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if !PDF_ZOOM_RANGE.contains(&c.pdf_zoom) {
            return Err(PipelineError::InvalidConfig(format!(
                "PDF zoom must be between {} and {}, got {}",
                PDF_ZOOM_RANGE.start(),
                PDF_ZOOM_RANGE.end(),
                c.pdf_zoom
            )));
        }
        if let Some(font) = &c.font_path {
            if !font.is_file() {
                return Err(PipelineError::InvalidConfig(format!(
                    "Font file not found: {}",
                    font.display()
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Storage class of the project directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Local disk (default).
    #[default]
    Local,
    /// Network share: high latency, easily saturated.
    Network,
}

impl StorageKind {
    /// Best-effort classification of a path: UNC paths (`\\server\share`)
    /// and paths under common network mount points count as network storage.
    pub fn detect(path: &Path) -> Self {
        let text = path.to_string_lossy();
        if text.starts_with(r"\\") || text.starts_with("//") {
            return StorageKind::Network;
        }
        if ["/mnt/", "/net/", "/Volumes/"]
            .iter()
            .any(|prefix| text.starts_with(prefix))
        {
            return StorageKind::Network;
        }
        StorageKind::Local
    }
}

/// Worker count for `storage`: at most two on network storage, at most
/// `ceiling` on local storage, never more than the logical CPU count.
pub fn worker_count(storage: StorageKind, ceiling: usize) -> usize {
    let cpus = num_cpus::get().max(1);
    let bound = match storage {
        StorageKind::Network => NETWORK_WORKER_CEILING,
        StorageKind::Local => ceiling.max(1),
    };
    bound.min(cpus)
}

/// Page format of a composed technical drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawingFormat {
    /// 17.3 × 21.7 cm canvas (default).
    #[default]
    FullPage,
    /// 17.3 × 9.6 cm canvas.
    HalfPage,
}

impl DrawingFormat {
    /// Canvas size in centimetres (width, height).
    pub fn canvas_cm(self) -> (f32, f32) {
        match self {
            DrawingFormat::FullPage => (17.3, 21.7),
            DrawingFormat::HalfPage => (17.3, 9.6),
        }
    }
}
