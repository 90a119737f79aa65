//! Raster images to JPEG: TIFF, BMP and PNG in the project root become
//! `JPG_Output/<stem>.jpg`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::{BatchRunner, Stage, WorkItem};
use crate::bundle::bundle_files;
use crate::config::{PipelineConfig, DEFAULT_ITEM_TIMEOUT, LOCAL_WORKER_CEILING};
use crate::error::PipelineError;
use crate::executor::{JobContext, Pipeline};
use crate::job::JobResult;
use crate::layout::{ensure_dir, stem_of, ProjectLayout, JPEG_SOURCE_EXTENSIONS};
use crate::listing::FileListCache;
use crate::transform::JpegConvert;

use super::{collect_sources, run_stages, runner_for, JobInput};

/// Conversion job; the optional bundle holds the JPEGs flat.
pub struct JpegConvertPipeline {
    config: PipelineConfig,
    cache: Arc<FileListCache>,
    input: JobInput,
    bundle: Option<PathBuf>,
    runner: Option<BatchRunner>,
}

impl JpegConvertPipeline {
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

    pub fn with_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle = Some(path.into());
        self
    }

    pub fn with_runner(mut self, runner: BatchRunner) -> Self {
        self.runner = Some(runner);
        self
    }
}

impl Pipeline for JpegConvertPipeline {
    fn name(&self) -> &'static str {
        "to-jpg"
    }

    fn run(&self, ctx: &mut JobContext) -> Result<JobResult, PipelineError> {
        let layout = ProjectLayout::new(&self.config.project_root);
        let source_dir = layout.root().to_path_buf();
        let output = layout.jpg_output();

        let sources = collect_sources(
            ctx,
            &self.input,
            &source_dir,
            JPEG_SOURCE_EXTENSIONS,
            &self.cache,
        )?;
        ensure_dir(&output)?;

        let items: Vec<WorkItem> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let target = output.join(format!("{}.jpg", stem_of(&source)));
                WorkItem::new(index, source, vec![target])
            })
            .collect();
        ctx.set_total(items.len());

        let runner = runner_for(
            self.runner.as_ref(),
            &self.config,
            LOCAL_WORKER_CEILING,
            DEFAULT_ITEM_TIMEOUT,
        );
        let stage = Stage::new(0, Arc::new(JpegConvert::default()));
        let outcome = run_stages(ctx, &runner, items, &[stage]);
        let converted: Vec<PathBuf> = outcome
            .survivors
            .iter()
            .map(|item| item.targets[0].clone())
            .collect();
        ctx.info(format!(
            "{} JPEG(s) written to {}",
            converted.len(),
            output.display()
        ));

        let bundle = match &self.bundle {
            Some(zip_path) if !converted.is_empty() => {
                ctx.set_current("Writing bundle");
                let count = bundle_files(zip_path, &converted)?;
                ctx.info(format!("Bundle written: {} ({count} file(s))", zip_path.display()));
                Some(zip_path.clone())
            }
            _ => None,
        };

        Ok(JobResult {
            summary: None,
            rows: converted.len(),
            output_dirs: vec![output],
            bundle,
            failed_items: outcome.failed,
        })
    }
}
