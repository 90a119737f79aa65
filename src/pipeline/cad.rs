//! CAD files: one zip per file, optional master bundle.

use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::{BatchRunner, Stage, WorkItem};
use crate::bundle::bundle_files;
use crate::config::{PipelineConfig, ARCHIVE_WORKER_CEILING, DEFAULT_ARCHIVE_TIMEOUT};
use crate::error::PipelineError;
use crate::executor::{JobContext, Pipeline};
use crate::job::JobResult;
use crate::layout::{ensure_dir, stem_of, ProjectLayout, CAD_EXTENSIONS};
use crate::listing::FileListCache;
use crate::transform::ZipSingle;

use super::{collect_sources, run_stages, runner_for, JobInput};

/// CAD job: every CAD file in the project root → `ZIP_Output/<stem>.zip`.
pub struct CadArchivePipeline {
    config: PipelineConfig,
    cache: Arc<FileListCache>,
    input: JobInput,
    bundle: Option<PathBuf>,
    runner: Option<BatchRunner>,
}

impl CadArchivePipeline {
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

    /// Also collect every archive into one master zip at `path`.
    pub fn with_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle = Some(path.into());
        self
    }

    pub fn with_runner(mut self, runner: BatchRunner) -> Self {
        self.runner = Some(runner);
        self
    }
}

impl Pipeline for CadArchivePipeline {
    fn name(&self) -> &'static str {
        "cad"
    }

    fn run(&self, ctx: &mut JobContext) -> Result<JobResult, PipelineError> {
        let layout = ProjectLayout::new(&self.config.project_root);
        let source_dir = layout.root().to_path_buf();
        let output = layout.cad_output();

        let sources = collect_sources(ctx, &self.input, &source_dir, CAD_EXTENSIONS, &self.cache)?;
        ensure_dir(&output)?;

        let items: Vec<WorkItem> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let target = output.join(format!("{}.zip", stem_of(&source)));
                WorkItem::new(index, source, vec![target])
            })
            .collect();
        ctx.set_total(items.len());

        let runner = runner_for(
            self.runner.as_ref(),
            &self.config,
            ARCHIVE_WORKER_CEILING,
            DEFAULT_ARCHIVE_TIMEOUT,
        );
        let outcome = run_stages(ctx, &runner, items, &[Stage::new(0, Arc::new(ZipSingle))]);
        let archives: Vec<PathBuf> = outcome
            .survivors
            .iter()
            .map(|item| item.targets[0].clone())
            .collect();
        ctx.info(format!(
            "{} archive(s) written to {}",
            archives.len(),
            output.display()
        ));

        let bundle = match &self.bundle {
            Some(zip_path) if !archives.is_empty() => {
                ctx.set_current("Writing master archive");
                let count = bundle_files(zip_path, &archives)?;
                ctx.info(format!(
                    "Master archive written: {} ({count} file(s))",
                    zip_path.display()
                ));
                Some(zip_path.clone())
            }
            _ => None,
        };

        Ok(JobResult {
            summary: None,
            rows: archives.len(),
            output_dirs: vec![output],
            bundle,
            failed_items: outcome.failed,
        })
    }
}
