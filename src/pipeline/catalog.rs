//! Article images: crop, catalog render, mirror, summary, bundle.

use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::{BatchRunner, Stage, WorkItem};
use crate::bundle::{bundle_outputs, BundleSection};
use crate::config::{PipelineConfig, DEFAULT_ITEM_TIMEOUT, LOCAL_WORKER_CEILING};
use crate::error::PipelineError;
use crate::executor::{JobContext, Pipeline};
use crate::job::JobResult;
use crate::layout::{ensure_dir, stem_of, ProjectLayout, SecondaryLayout, IMAGE_EXTENSIONS};
use crate::listing::FileListCache;
use crate::summary::{SummaryTable, CATALOG_SUMMARY_FILE};
use crate::transform::{BorderCrop, CatalogRender};

use super::{collect_sources, mirror_outputs, run_stages, runner_for, JobInput};

/// Image job: `1_Originale` → cropped TIFF → grayscale catalog JPEG.
pub struct CatalogImagesPipeline {
    config: PipelineConfig,
    cache: Arc<FileListCache>,
    input: JobInput,
    bundle: Option<PathBuf>,
    runner: Option<BatchRunner>,
}

impl CatalogImagesPipeline {
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

    /// Also write a download bundle to `path` once the summary exists.
    pub fn with_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle = Some(path.into());
        self
    }

    /// Run every stage on `runner` instead of one derived from the config.
    pub fn with_runner(mut self, runner: BatchRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    fn stages() -> [Stage; 2] {
        [
            Stage::new(0, Arc::new(BorderCrop)),
            Stage::new(1, Arc::new(CatalogRender::default())),
        ]
    }
}

impl Pipeline for CatalogImagesPipeline {
    fn name(&self) -> &'static str {
        "images"
    }

    fn run(&self, ctx: &mut JobContext) -> Result<JobResult, PipelineError> {
        let layout = ProjectLayout::new(&self.config.project_root);
        let originals = layout.image_originals();
        let cropped = layout.image_cropped();
        let catalog = layout.image_catalog();

        let sources = collect_sources(ctx, &self.input, &originals, IMAGE_EXTENSIONS, &self.cache)?;
        ensure_dir(&cropped)?;
        ensure_dir(&catalog)?;

        let items: Vec<WorkItem> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let stem = stem_of(&source);
                WorkItem::new(
                    index,
                    source,
                    vec![
                        cropped.join(format!("{stem}.tif")),
                        catalog.join(format!("{stem}.jpg")),
                    ],
                )
            })
            .collect();
        ctx.set_total(items.len());

        let runner = runner_for(
            self.runner.as_ref(),
            &self.config,
            LOCAL_WORKER_CEILING,
            DEFAULT_ITEM_TIMEOUT,
        );
        let outcome = run_stages(ctx, &runner, items, &Self::stages());

        if let Some(root) = &self.config.secondary_root {
            ctx.set_current("Copying to secondary destination");
            let secondary = SecondaryLayout::new(root);
            let transfers: Vec<(PathBuf, PathBuf)> = outcome
                .survivors
                .iter()
                .flat_map(|item| {
                    [
                        (item.source.clone(), secondary.originals()),
                        (item.targets[0].clone(), secondary.article_image_max()),
                        (item.targets[1].clone(), secondary.catalog()),
                    ]
                })
                .collect();
            let copied = mirror_outputs(ctx, root, &transfers);
            ctx.set_copied(copied);
        }

        ctx.set_current("Writing summary");
        let summary_path = layout.import_files().join(CATALOG_SUMMARY_FILE);
        let table = SummaryTable::catalog(&outcome.survivors);
        table.write_xlsx(&summary_path)?;
        ctx.info(format!(
            "Summary written: {} ({} row(s))",
            summary_path.display(),
            table.len()
        ));

        let bundle = match &self.bundle {
            Some(zip_path) => {
                let stage_files = |stage: usize| -> Vec<PathBuf> {
                    outcome
                        .survivors
                        .iter()
                        .map(|item| item.targets[stage].clone())
                        .collect()
                };
                let count = bundle_outputs(
                    zip_path,
                    &[
                        BundleSection::new("Artikelbild_max", stage_files(0)),
                        BundleSection::new("Katalog", stage_files(1)),
                    ],
                    std::slice::from_ref(&summary_path),
                )?;
                ctx.info(format!("Bundle written: {} ({count} file(s))", zip_path.display()));
                Some(zip_path.clone())
            }
            None => None,
        };

        Ok(JobResult {
            summary: Some(summary_path),
            rows: table.len(),
            output_dirs: vec![cropped, catalog],
            bundle,
            failed_items: outcome.failed,
        })
    }
}
