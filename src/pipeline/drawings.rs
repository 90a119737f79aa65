//! Technical drawings: compose onto the print canvas, merge into the PDF
//! template, mirror to the SAP folders, summary.
//!
//! A drawing usually exists as `<stem>.eps` and sometimes also as a JPG.
//! Before any stage runs, the job looks once for Ghostscript and picks one
//! source per stem:
//!
//! | EPS | JPG | Ghostscript | source              |
//! |-----|-----|-------------|---------------------|
//! | yes | any | found       | EPS                 |
//! | yes | yes | missing     | JPG                 |
//! | yes | no  | missing     | skipped, item error |
//! | no  | yes | any         | JPG                 |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::{BatchRunner, Stage, WorkItem};
use crate::config::{PipelineConfig, DEFAULT_ITEM_TIMEOUT, LOCAL_WORKER_CEILING};
use crate::error::{ItemError, PipelineError};
use crate::executor::{JobContext, Pipeline};
use crate::job::JobResult;
use crate::layout::{
    ensure_dir, file_name_of, has_extension, stem_of, ProjectLayout, SecondaryLayout,
    DRAWING_EXTENSIONS,
};
use crate::listing::FileListCache;
use crate::summary::{drawing_summary_file, SummaryTable};
use crate::transform::compose::load_font;
use crate::transform::source::is_eps;
use crate::transform::{
    DateStamp, DrawingSource, Ghostscript, LayoutCompose, LayoutGeometry, TemplateMerge,
};

use super::{collect_sources, mirror_outputs, run_stages, runner_for, JobInput};

/// Drawing job: `2_Masszeichnungen/1_Originale` → composed JPEG → merged PDF.
pub struct DrawingsPipeline {
    config: PipelineConfig,
    cache: Arc<FileListCache>,
    input: JobInput,
    runner: Option<BatchRunner>,
}

impl DrawingsPipeline {
    pub fn new(config: PipelineConfig, cache: Arc<FileListCache>) -> Self {
        Self {
            config,
            cache,
            input: JobInput::Directory,
            runner: None,
        }
    }

    pub fn with_input(mut self, input: JobInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_runner(mut self, runner: BatchRunner) -> Self {
        self.runner = Some(runner);
        self
    }
}

/// Source choice for one stem.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Choice {
    Use(PathBuf),
    Skip { eps: PathBuf },
}

fn choose_sources(sources: Vec<PathBuf>, eps_supported: bool) -> Vec<Choice> {
    let mut by_stem: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for path in sources {
        let slot = by_stem.entry(stem_of(&path)).or_default();
        if is_eps(&path) {
            slot.0.get_or_insert(path);
        } else if has_extension(&path, &["jpg", "jpeg"]) {
            slot.1.get_or_insert(path);
        }
    }

    by_stem
        .into_values()
        .filter_map(|(eps, jpg)| match (eps, jpg) {
            (Some(eps), _) if eps_supported => Some(Choice::Use(eps)),
            (_, Some(jpg)) => Some(Choice::Use(jpg)),
            (Some(eps), None) => Some(Choice::Skip { eps }),
            (None, None) => None,
        })
        .collect()
}

impl Pipeline for DrawingsPipeline {
    fn name(&self) -> &'static str {
        "drawings"
    }

    fn run(&self, ctx: &mut JobContext) -> Result<JobResult, PipelineError> {
        let template = self.config.template_pdf.clone().ok_or_else(|| {
            PipelineError::InvalidConfig("No PDF template configured for technical drawings".into())
        })?;
        if !template.is_file() {
            ctx.warn(format!(
                "PDF template {} not found; the PDF stage will fail for every drawing",
                template.display()
            ));
        }

        let layout = ProjectLayout::new(&self.config.project_root);
        let originals = layout.drawing_originals();
        let web = layout.drawing_web();
        let sources =
            collect_sources(ctx, &self.input, &originals, DRAWING_EXTENSIONS, &self.cache)?;
        ensure_dir(&web)?;

        let runner = runner_for(
            self.runner.as_ref(),
            &self.config,
            LOCAL_WORKER_CEILING,
            DEFAULT_ITEM_TIMEOUT,
        );
        // A rasterisation never outlives the item that asked for it.
        let ghostscript = Ghostscript::locate(self.config.ghostscript.as_deref())
            .map(|gs| gs.with_timeout(runner.options().per_item_timeout));
        match (&ghostscript, &self.config.ghostscript) {
            (Some(gs), _) => ctx.info(format!("Ghostscript: {}", gs.executable().display())),
            (None, Some(path)) => ctx.warn(format!(
                "Ghostscript not found at {}; EPS drawings fall back to JPG",
                path.display()
            )),
            (None, None) => ctx.info("Ghostscript not found; EPS drawings fall back to JPG"),
        }

        let font = load_font(self.config.font_path.as_deref());
        if font.is_none() {
            ctx.warn("No font available for the date stamp; drawings are composed without date");
        }
        let stamp = font.map(DateStamp::today);

        let choices = choose_sources(sources, ghostscript.is_some());
        ctx.set_total(choices.len());

        let mut items = Vec::with_capacity(choices.len());
        let mut failed = Vec::new();
        for choice in choices {
            match choice {
                Choice::Use(source) => {
                    let stem = stem_of(&source);
                    items.push(WorkItem::new(
                        items.len(),
                        source,
                        vec![web.join(format!("{stem}.jpg")), web.join(format!("{stem}.pdf"))],
                    ));
                }
                Choice::Skip { eps } => {
                    let name = file_name_of(&eps);
                    ctx.item_failed(&ItemError::Skipped {
                        item: name.clone(),
                        reason: "EPS needs Ghostscript and no JPG alternative exists".into(),
                    });
                    ctx.mark_processed(1);
                    failed.push(name);
                }
            }
        }

        let stages = [
            Stage::new(
                0,
                Arc::new(LayoutCompose::new(
                    LayoutGeometry::for_format(self.config.drawing_format),
                    DrawingSource::new(ghostscript, self.config.eps_dpi),
                    stamp,
                )),
            ),
            Stage::new(
                1,
                Arc::new(TemplateMerge::new(template, self.config.drawing_format)),
            ),
        ];
        let outcome = run_stages(ctx, &runner, items, &stages);
        failed.extend(outcome.failed);

        if let Some(root) = &self.config.secondary_root {
            ctx.set_current("Copying to SAP folders");
            let secondary = SecondaryLayout::new(root);
            let transfers: Vec<(PathBuf, PathBuf)> = outcome
                .survivors
                .iter()
                .flat_map(|item| {
                    [
                        (item.targets[0].clone(), secondary.drawing_jpg()),
                        (item.targets[1].clone(), secondary.drawing_pdf()),
                    ]
                })
                .collect();
            let copied = mirror_outputs(ctx, root, &transfers);
            ctx.set_copied(copied);
        }

        ctx.set_current("Writing summary");
        let summary_path = layout
            .import_files()
            .join(drawing_summary_file(ctx.id()));
        let table = SummaryTable::drawings(&outcome.survivors);
        table.write_xlsx(&summary_path)?;
        ctx.info(format!(
            "Summary written: {} ({} row(s))",
            summary_path.display(),
            table.len()
        ));

        Ok(JobResult {
            summary: Some(summary_path),
            rows: table.len(),
            output_dirs: vec![web],
            bundle: None,
            failed_items: failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, JobRecord, JobStatus};
    use crate::transform::template::write_test_template;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::Path;
    use tokio::sync::mpsc;

    fn context() -> JobContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut record = JobRecord::new(JobId::generate(), "drawings");
        record.begin().unwrap();
        JobContext::new(record, tx)
    }

    fn project(files: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let originals = ProjectLayout::new(tmp.path()).drawing_originals();
        std::fs::create_dir_all(&originals).unwrap();
        for name in files {
            let path = originals.join(name);
            if is_eps(&path) {
                std::fs::write(&path, b"%!PS-Adobe-3.0 EPSF-3.0\n%%BoundingBox: 0 0 10 10\n").unwrap();
            } else {
                DynamicImage::ImageRgb8(RgbImage::from_pixel(80, 40, Rgb([0, 0, 0])))
                    .save(&path)
                    .unwrap();
            }
        }
        let template = tmp.path().join("Vorlage.pdf");
        write_test_template(&template);
        (tmp, template)
    }

    fn config(root: &Path, template: &Path) -> PipelineConfig {
        PipelineConfig::builder(root)
            .template_pdf(template)
            .ghostscript("/no/such/gs")
            .build()
            .unwrap()
    }

    #[test]
    fn eps_preferred_only_with_ghostscript() {
        let files = vec![
            PathBuf::from("a.eps"),
            PathBuf::from("a.jpg"),
            PathBuf::from("b.eps"),
            PathBuf::from("c.JPEG"),
        ];
        assert_eq!(
            choose_sources(files.clone(), true),
            vec![
                Choice::Use("a.eps".into()),
                Choice::Use("b.eps".into()),
                Choice::Use("c.JPEG".into()),
            ]
        );
        assert_eq!(
            choose_sources(files, false),
            vec![
                Choice::Use("a.jpg".into()),
                Choice::Skip { eps: "b.eps".into() },
                Choice::Use("c.JPEG".into()),
            ]
        );
    }

    #[test]
    fn jpg_drawings_become_jpg_and_pdf() {
        let (tmp, template) = project(&["12345.jpg", "67890.jpg"]);
        let pipeline = DrawingsPipeline::new(
            config(tmp.path(), &template),
            Arc::new(FileListCache::default()),
        );
        let mut ctx = context();

        let result = pipeline.run(&mut ctx).unwrap();
        assert_eq!(result.rows, 2);
        let web = ProjectLayout::new(tmp.path()).drawing_web();
        for stem in ["12345", "67890"] {
            assert!(web.join(format!("{stem}.jpg")).is_file());
            assert!(web.join(format!("{stem}.pdf")).is_file());
        }
        let summary = result.summary.unwrap();
        assert!(file_name_of(&summary).starts_with("Import_MZ_"));
        assert_eq!(ctx.record().status, JobStatus::Processing);
    }

    #[test]
    fn eps_only_without_ghostscript_is_skipped() {
        let (tmp, template) = project(&["11111.eps", "22222.jpg"]);
        let pipeline = DrawingsPipeline::new(
            config(tmp.path(), &template),
            Arc::new(FileListCache::default()),
        );
        let mut ctx = context();

        let result = pipeline.run(&mut ctx).unwrap();
        assert_eq!(result.rows, 1);
        assert_eq!(result.failed_items, vec!["11111.eps"]);
        assert_eq!(ctx.record().total_files, 2);
        assert_eq!(ctx.record().processed_files, 2);
        assert!(ctx.record().errors.iter().any(|e| e.contains("11111.eps")));
    }

    #[test]
    fn missing_template_file_fails_items_not_job() {
        let (tmp, _) = project(&["12345.jpg"]);
        let pipeline = DrawingsPipeline::new(
            config(tmp.path(), &tmp.path().join("gone.pdf")),
            Arc::new(FileListCache::default()),
        );
        let mut ctx = context();

        let result = pipeline.run(&mut ctx).unwrap();
        assert_eq!(result.rows, 0);
        assert_eq!(result.failed_items, vec!["12345.jpg"]);
        assert!(ctx.record().errors[0].contains("gone.pdf"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timed_out_eps_leaves_no_ghostscript_behind() {
        use crate::batch::BatchOptions;
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, Instant};

        let (tmp, template) = project(&["33333.eps"]);
        let pid_file = tmp.path().join("gs.pid");
        let script = tmp.path().join("gs");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 20\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = PipelineConfig::builder(tmp.path())
            .template_pdf(&template)
            .ghostscript(&script)
            .build()
            .unwrap();
        let runner = BatchRunner::new(BatchOptions::new(1, Duration::from_millis(500)));
        let pipeline = DrawingsPipeline::new(config, Arc::new(FileListCache::default()))
            .with_runner(runner);
        let mut ctx = context();

        let result = pipeline.run(&mut ctx).unwrap();
        assert_eq!(result.failed_items, vec!["33333.eps"]);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_dir = PathBuf::from(format!("/proc/{}", pid.trim()));
        let deadline = Instant::now() + Duration::from_secs(3);
        while proc_dir.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!proc_dir.exists(), "ghostscript {} still running", pid.trim());
    }

    #[test]
    fn no_template_configured_is_fatal() {
        let (tmp, _) = project(&["12345.jpg"]);
        let config = PipelineConfig::builder(tmp.path()).build().unwrap();
        let pipeline = DrawingsPipeline::new(config, Arc::new(FileListCache::default()));
        let err = pipeline.run(&mut context()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
