//! PDFs to JPEG pages: every PDF in the project root becomes a folder
//! `JPG_Output/<stem>/` with one JPEG per page.

use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::{BatchRunner, Stage, WorkItem};
use crate::bundle::bundle_files;
use crate::config::{PipelineConfig, DEFAULT_ARCHIVE_TIMEOUT, PDF_WORKER_CEILING};
use crate::error::PipelineError;
use crate::executor::{JobContext, Pipeline};
use crate::job::JobResult;
use crate::layout::{ensure_dir, stem_of, ProjectLayout, PDF_EXTENSIONS};
use crate::listing::{scan_dir, FileListCache};
use crate::transform::pdf::bind_pdfium;
use crate::transform::PdfPages;

use super::{collect_sources, run_stages, runner_for, JobInput};

pub struct PdfPagesPipeline {
    config: PipelineConfig,
    cache: Arc<FileListCache>,
    input: JobInput,
    bundle: Option<PathBuf>,
    runner: Option<BatchRunner>,
}

impl PdfPagesPipeline {
    pub fn new(config: PipelineConfig, cache: Arc<FileListCache>) -> Self {
        Self {
            config,
            cache,
            input: JobInput::Directory,
            bundle: None,
            runner: None,
        }
    }

    pub fn with_input(mut self, input: JobInput) -> Self {
        self.input = input;
        self
    }

    /// Also zip every rendered page, flat, into `path`.
    pub fn with_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle = Some(path.into());
        self
    }

    pub fn with_runner(mut self, runner: BatchRunner) -> Self {
        self.runner = Some(runner);
        self
    }
}

impl Pipeline for PdfPagesPipeline {
    fn name(&self) -> &'static str {
        "pdf-to-jpg"
    }

    fn run(&self, ctx: &mut JobContext) -> Result<JobResult, PipelineError> {
        let layout = ProjectLayout::new(&self.config.project_root);
        let source_dir = layout.root().to_path_buf();
        let output = layout.jpg_output();

        let sources = collect_sources(ctx, &self.input, &source_dir, PDF_EXTENSIONS, &self.cache)?;

        let library = self.config.pdfium_library.clone();
        bind_pdfium(library.as_deref())
            .map_err(|e| PipelineError::PdfiumBindingFailed(e.to_string()))?;
        ctx.info(format!("PDF pages rendered at zoom {}", self.config.pdf_zoom));
        ensure_dir(&output)?;

        let items: Vec<WorkItem> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let target = layout.pdf_pages(&stem_of(&source));
                WorkItem::new(index, source, vec![target])
            })
            .collect();
        ctx.set_total(items.len());

        let runner = runner_for(
            self.runner.as_ref(),
            &self.config,
            PDF_WORKER_CEILING,
            DEFAULT_ARCHIVE_TIMEOUT,
        );
        let stage = Stage::new(0, Arc::new(PdfPages::new(self.config.pdf_zoom, library)));
        let outcome = run_stages(ctx, &runner, items, &[stage]);

        let pages: Vec<PathBuf> = outcome
            .survivors
            .iter()
            .flat_map(|item| scan_dir(&item.targets[0], &["jpg"]))
            .collect();
        ctx.info(format!(
            "{} page(s) from {} PDF(s) written to {}",
            pages.len(),
            outcome.survivors.len(),
            output.display()
        ));

        let bundle = match &self.bundle {
            Some(zip_path) if !pages.is_empty() => {
                ctx.set_current("Writing bundle");
                let count = bundle_files(zip_path, &pages)?;
                ctx.info(format!("Bundle written: {} ({count} file(s))", zip_path.display()));
                Some(zip_path.clone())
            }
            _ => None,
        };

        Ok(JobResult {
            summary: None,
            rows: pages.len(),
            output_dirs: vec![output],
            bundle,
            failed_items: outcome.failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, JobRecord};
    use crate::transform::template::write_test_template;
    use tokio::sync::mpsc;

    fn context() -> JobContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut record = JobRecord::new(JobId::generate(), "pdf-to-jpg");
        record.begin().unwrap();
        JobContext::new(record, tx)
    }

    #[test]
    fn unloadable_pdfium_is_one_fatal_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_template(&tmp.path().join("a.pdf"));
        write_test_template(&tmp.path().join("b.pdf"));
        let config = PipelineConfig::builder(tmp.path())
            .pdfium_library("/no/such/libpdfium.so")
            .build()
            .unwrap();
        let mut ctx = context();

        let err = PdfPagesPipeline::new(config, Arc::new(FileListCache::default()))
            .run(&mut ctx)
            .unwrap_err();
        assert!(matches!(err, PipelineError::PdfiumBindingFailed(_)));
        assert_eq!(ctx.record().processed_files, 0);
        assert!(ctx.record().errors.is_empty());
    }

    #[test]
    fn each_pdf_gets_a_page_folder() {
        if bind_pdfium(None).is_err() {
            eprintln!("pdfium not available; skipping render test");
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        write_test_template(&tmp.path().join("sheet.pdf"));
        std::fs::write(tmp.path().join("torn.pdf"), b"%PDF-1.5 truncated").unwrap();
        let bundle = tmp.path().join("konvertierte_bilder.zip");
        let config = PipelineConfig::builder(tmp.path()).pdf_zoom(1.0).build().unwrap();
        let pipeline = PdfPagesPipeline::new(config, Arc::new(FileListCache::default()))
            .with_bundle(&bundle);

        let result = pipeline.run(&mut context()).unwrap();
        assert_eq!(result.rows, 1);
        assert_eq!(result.failed_items, vec!["torn.pdf"]);
        assert!(tmp.path().join("JPG_Output").join("sheet").join("sheet.jpg").is_file());
        let archive = zip::ZipArchive::new(std::fs::File::open(&bundle).unwrap()).unwrap();
        assert_eq!(archive.file_names().collect::<Vec<_>>(), vec!["sheet.jpg"]);
    }
}
