//! # catalog-media
//!
//! Batch conversion of product-catalog media into the fixed folder layouts
//! and import spreadsheets a downstream business system expects.
//!
//! ## Why this crate?
//!
//! Catalog media arrive as hundreds of loose files: article photos with
//! white borders, technical drawings as EPS, CAD models in a dozen formats.
//! Each has to pass through the same few transformations and land in a
//! hard-coded directory with a spreadsheet listing it. This crate runs those
//! transformations as background jobs over bounded worker pools, keeps going
//! when single files fail, and reports progress to whoever is polling.
//!
//! ## Pipeline Overview
//!
//! ```text
//! JobBoard::launch(pipeline)
//!  │
//!  ├─ 1. Scan     list the input folder (cached) or store uploads
//!  ├─ 2. Stage 1  batch over every item (worker pool, per-item timeout)
//!  ├─ 3. Stage 2  batch over the stage-1 survivors
//!  ├─ 4. Mirror   best-effort copy to a secondary destination
//!  ├─ 5. Summary  one xlsx row per item that passed every stage
//!  └─ 6. Bundle   optional download zip
//! ```
//!
//! | Pipeline                   | Stage 1          | Stage 2          |
//! |----------------------------|------------------|------------------|
//! | [`CatalogImagesPipeline`]  | border crop      | catalog render   |
//! | [`DrawingsPipeline`]       | layout compose   | template merge   |
//! | [`CadArchivePipeline`]     | zip per file     | —                |
//! | [`PdfPagesPipeline`]       | JPEG per page    | —                |
//! | [`JpegConvertPipeline`]    | JPEG conversion  | —                |
//! | [`MediaDownloadPipeline`]  | URL download     | —                |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use catalog_media::{CatalogImagesPipeline, FileListCache, JobBoard, PipelineConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder("/data/projects/spring-catalog").build()?;
//!     let cache = Arc::new(FileListCache::new(config.listing_ttl()));
//!
//!     let mut board = JobBoard::new();
//!     let id = board.launch(Box::new(CatalogImagesPipeline::new(config, cache)))?;
//!     while board.polling_needed() {
//!         board.drain(&id);
//!         std::thread::sleep(Duration::from_millis(200));
//!     }
//!     let job = board.snapshot(&id).expect("launched job is tracked");
//!     eprintln!("{}: {} error(s)", job.status, job.errors.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `catalog-media` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! catalog-media = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod bundle;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod layout;
pub mod listing;
pub mod pipeline;
pub mod progress;
pub mod sheet;
pub mod summary;
pub mod transform;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchOptions, BatchReport, BatchRunner, PoolFactory, Stage, StageResult, TokioPool, WorkItem};
pub use config::{DrawingFormat, PipelineConfig, PipelineConfigBuilder, StorageKind};
pub use error::{ItemError, PipelineError, TransformError};
pub use executor::{start, JobBoard, JobContext, JobHandle, Pipeline};
pub use job::{JobId, JobRecord, JobResult, JobStatus, LogEntry, LogLevel, StatusMessage};
pub use listing::FileListCache;
pub use pipeline::{
    run_stages, CadArchivePipeline, CatalogImagesPipeline, DrawingsPipeline, JobInput,
    JpegConvertPipeline, MediaDownloadPipeline, PdfPagesPipeline, UploadedFile,
};
pub use progress::{BatchProgress, NoopProgress};
pub use sheet::{read_media_sheet, MediaRow};
pub use summary::{article_number, split_article_prefix, SummaryTable};
pub use transform::Transform;
