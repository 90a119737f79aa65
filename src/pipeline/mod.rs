//! Fixed multi-stage pipelines and the orchestration they share.
//!
//! Each submodule implements exactly one job type. They all follow the same
//! shape, driven on the job thread by [`crate::executor`]:
//!
//! ```text
//! scan ──▶ stage 1 ──▶ stage 2 ──▶ mirror ──▶ summary ──▶ bundle
//! (cache)  (batch)     (batch)     (optional)  (xlsx)     (optional)
//! ```
//!
//! 1. [`catalog`] : article images: border-crop, then grayscale catalog render
//! 2. [`drawings`]: technical drawings: layout-compose, then template-merge
//! 3. [`cad`]     : CAD files: one zip archive per file
//! 4. [`pdf`]     : PDFs: one JPEG per page
//! 5. [`jpeg`]    : TIFF, BMP and PNG to JPEG
//! 6. [`download`]: URLs of a media spreadsheet, fetched and renamed
//!
//! The last three are single-stage and write no summary.
//!
//! Stages communicate through files on disk. A stage is a full batch: stage
//! N+1 starts only after stage N has finished for every item, and an item
//! that failed anywhere is left out of every later stage.

pub mod cad;
pub mod catalog;
pub mod download;
pub mod drawings;
pub mod jpeg;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::{BatchOptions, BatchRunner, Stage, StageResult, WorkItem};
use crate::config::PipelineConfig;
use crate::error::{ItemError, PipelineError};
use crate::executor::JobContext;
use crate::layout::{ensure_dir, file_name_of, has_extension};
use crate::listing::FileListCache;
use crate::progress::BatchProgress;

pub use cad::CadArchivePipeline;
pub use catalog::CatalogImagesPipeline;
pub use download::MediaDownloadPipeline;
pub use drawings::DrawingsPipeline;
pub use jpeg::JpegConvertPipeline;
pub use pdf::PdfPagesPipeline;

// ── Input ────────────────────────────────────────────────────────────────

/// A file received in memory (e.g. from an upload form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Original file name; only its last path component is used.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Where a job takes its sources from.
#[derive(Debug, Clone, Default)]
pub enum JobInput {
    /// The pipeline's input directory below the project root.
    #[default]
    Directory,
    /// Buffers written into the input directory before scanning.
    Uploads(Vec<UploadedFile>),
}

/// Write `uploads` into `dir` and return the written paths.
pub(crate) fn materialize_uploads(
    uploads: &[UploadedFile],
    dir: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    ensure_dir(dir)?;
    let mut written = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let name = Path::new(&upload.name)
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| PipelineError::UploadFailed {
                name: upload.name.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "upload has no file name",
                ),
            })?;
        let path = dir.join(name);
        std::fs::write(&path, &upload.bytes).map_err(|source| PipelineError::UploadFailed {
            name: upload.name.clone(),
            source,
        })?;
        written.push(path);
    }
    written.sort();
    Ok(written)
}

/// Resolve the source files of a job: scan (through the cache) or
/// materialise uploads. Fails when the directory is missing or empty.
pub(crate) fn collect_sources(
    ctx: &mut JobContext,
    input: &JobInput,
    dir: &Path,
    extensions: &[&str],
    cache: &FileListCache,
) -> Result<Vec<PathBuf>, PipelineError> {
    let sources = match input {
        JobInput::Directory => {
            if !dir.is_dir() {
                return Err(PipelineError::InputMissing {
                    path: dir.to_path_buf(),
                });
            }
            cache.list_files(dir, extensions)
        }
        JobInput::Uploads(files) => {
            let written = materialize_uploads(files, dir)?;
            cache.invalidate(dir);
            written
                .into_iter()
                .filter(|p| has_extension(p, extensions))
                .collect()
        }
    };

    if sources.is_empty() {
        return Err(PipelineError::NoInputFiles {
            path: dir.to_path_buf(),
            accepted: extensions.join(", "),
        });
    }

    ctx.set_found(sources.iter().map(|p| file_name_of(p)).collect());
    ctx.info(format!(
        "Found {} file(s) in {}",
        sources.len(),
        dir.display()
    ));
    Ok(sources)
}

// ── Stage orchestration ──────────────────────────────────────────────────

/// Runner for a pipeline whose local-storage worker ceiling is `ceiling`,
/// unless the caller injected one.
pub(crate) fn runner_for(
    injected: Option<&BatchRunner>,
    config: &PipelineConfig,
    ceiling: usize,
    default_timeout: Duration,
) -> BatchRunner {
    injected.cloned().unwrap_or_else(|| {
        BatchRunner::new(BatchOptions::new(
            config.worker_count(ceiling),
            config.item_timeout(default_timeout),
        ))
    })
}

/// Items that made it through every stage, and the names of those that did not.
#[derive(Debug, Clone, Default)]
pub struct StagesOutcome {
    /// Sorted by submission index.
    pub survivors: Vec<WorkItem>,
    pub failed: Vec<String>,
    /// Every failed item with the error that removed it, in failure order.
    pub failures: Vec<(WorkItem, ItemError)>,
}

/// Run `stages` in order over `items`, one full batch per stage.
///
/// Progress accounting goes through `ctx`: a failed item counts as processed
/// the moment it fails, a successful one when it leaves the last stage.
pub fn run_stages(
    ctx: &mut JobContext,
    runner: &BatchRunner,
    items: Vec<WorkItem>,
    stages: &[Stage],
) -> StagesOutcome {
    let mut survivors = items;
    let mut failed = Vec::new();
    let mut failures = Vec::new();

    for (position, stage) in stages.iter().enumerate() {
        ctx.begin_stage(stage.name, position, stages.len(), survivors.len());
        let last_stage = position + 1 == stages.len();

        let report = {
            let mut observer = StageObserver {
                ctx: &mut *ctx,
                last_stage,
            };
            runner.run(stage, &survivors, &mut observer)
        };

        let mut passed = Vec::with_capacity(report.results.len());
        for result in report.results {
            match result.outcome {
                Ok(()) => passed.push(result.item),
                Err(e) => {
                    failed.push(result.item.name.clone());
                    failures.push((result.item, e));
                }
            }
        }
        passed.sort_by_key(|item| item.index);
        survivors = passed;
    }

    StagesOutcome {
        survivors,
        failed,
        failures,
    }
}

/// Forwards batch events into the job record.
struct StageObserver<'a> {
    ctx: &'a mut JobContext,
    last_stage: bool,
}

impl BatchProgress for StageObserver<'_> {
    fn on_item_complete(&mut self, _stage: &str, completed: usize, _total: usize, result: &StageResult) {
        self.ctx.item_finished(completed, result, self.last_stage);
    }

    fn on_fallback(&mut self, _stage: &str, reason: &str) {
        self.ctx.warn(reason);
    }
}

// ── Auxiliary copy ───────────────────────────────────────────────────────

/// Copy every `(file, destination_dir)` pair below the secondary `root`.
///
/// Best effort: an unreachable root or a failed copy is a warning and the
/// job carries on. Returns `true` only when every file was copied.
pub(crate) fn mirror_outputs(
    ctx: &mut JobContext,
    root: &Path,
    transfers: &[(PathBuf, PathBuf)],
) -> bool {
    let reachable = root.exists() || root.parent().map(Path::exists).unwrap_or(false);
    if !reachable {
        ctx.warn(format!(
            "Secondary destination {} is not reachable; copy skipped",
            root.display()
        ));
        return false;
    }

    let mut copied = 0usize;
    let mut ok = true;
    for (file, dest_dir) in transfers {
        if let Err(e) = std::fs::create_dir_all(dest_dir) {
            ctx.warn(format!("Cannot create {}: {e}", dest_dir.display()));
            ok = false;
            continue;
        }
        let dest = dest_dir.join(file_name_of(file));
        match std::fs::copy(file, &dest) {
            Ok(_) => copied += 1,
            Err(e) => {
                ctx.warn(format!(
                    "Copy of {} to {} failed: {e}",
                    file.display(),
                    dest_dir.display()
                ));
                ok = false;
            }
        }
    }

    ctx.info(format!(
        "Copied {copied}/{} file(s) to {}",
        transfers.len(),
        root.display()
    ));
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_keep_only_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = vec![
            UploadedFile::new("../../escape/b.png", vec![1, 2, 3]),
            UploadedFile::new("a.jpg", vec![4]),
        ];
        let written = materialize_uploads(&uploads, tmp.path()).unwrap();
        assert_eq!(written, vec![tmp.path().join("a.jpg"), tmp.path().join("b.png")]);
        assert_eq!(std::fs::read(tmp.path().join("b.png")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn upload_without_name_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = materialize_uploads(&[UploadedFile::new("..", vec![])], tmp.path()).unwrap_err();
        assert!(matches!(err, PipelineError::UploadFailed { .. }));
    }
}
