//! Media download: every URL of a media spreadsheet is fetched into the
//! output folder under a name derived from the article number.
//!
//! A failed download never stops the job. When any fail, the job writes
//! `download_log.txt` next to the files, listing each failure by sheet row.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;

use crate::batch::{BatchRunner, Stage, WorkItem};
use crate::config::{PipelineConfig, DEFAULT_DOWNLOAD_TIMEOUT, DOWNLOAD_WORKER_CEILING};
use crate::error::{ItemError, PipelineError};
use crate::executor::{JobContext, Pipeline};
use crate::job::JobResult;
use crate::layout::ensure_dir;
use crate::sheet::{plan_row, read_media_sheet, PlannedDownload, REQUIRED_COLUMNS};
use crate::transform::fetch::REQUEST_TIMEOUT;
use crate::transform::HttpFetch;

use super::{run_stages, runner_for};

/// Written into the output folder when at least one download failed.
pub const DOWNLOAD_LOG_FILE: &str = "download_log.txt";

/// Download job over one media spreadsheet.
///
/// Files land directly in the configured project root.
pub struct MediaDownloadPipeline {
    config: PipelineConfig,
    sheet: PathBuf,
    runner: Option<BatchRunner>,
}

impl MediaDownloadPipeline {
    pub fn new(config: PipelineConfig, sheet: impl Into<PathBuf>) -> Self {
        Self {
            config,
            sheet: sheet.into(),
            runner: None,
        }
    }

    pub fn with_runner(mut self, runner: BatchRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Downloads of every usable row, first claim on a file name wins.
    fn plan(&self, ctx: &mut JobContext) -> Result<Vec<PlannedDownload>, PipelineError> {
        let rows = read_media_sheet(&self.sheet)?;
        ctx.info(format!(
            "{} row(s) read from {}",
            rows.len(),
            self.sheet.display()
        ));

        let mut claimed = HashSet::new();
        let mut plan = Vec::new();
        for row in &rows {
            if row.article.is_empty() {
                if row.has_urls() {
                    ctx.warn(format!("Row {}: no article number, URLs skipped", row.line));
                }
                continue;
            }
            for download in plan_row(row) {
                if claimed.insert(download.file_name.clone()) {
                    plan.push(download);
                } else {
                    ctx.warn(format!(
                        "Row {}: {} is already taken, {} skipped",
                        download.line, download.file_name, download.url
                    ));
                }
            }
        }
        Ok(plan)
    }
}

impl Pipeline for MediaDownloadPipeline {
    fn name(&self) -> &'static str {
        "download"
    }

    fn run(&self, ctx: &mut JobContext) -> Result<JobResult, PipelineError> {
        if !self.sheet.is_file() {
            return Err(PipelineError::InputMissing {
                path: self.sheet.clone(),
            });
        }
        let plan = self.plan(ctx)?;
        if plan.is_empty() {
            return Err(PipelineError::NoInputFiles {
                path: self.sheet.clone(),
                accepted: format!("URLs in {}", REQUIRED_COLUMNS[1..].join(", ")),
            });
        }
        ctx.set_found(plan.iter().map(|d| d.file_name.clone()).collect());

        let output = self.config.project_root.clone();
        ensure_dir(&output)?;

        let fetch =
            HttpFetch::new(REQUEST_TIMEOUT).map_err(|e| PipelineError::HttpClient(e.to_string()))?;
        let items: Vec<WorkItem> = plan
            .iter()
            .enumerate()
            .map(|(index, d)| {
                WorkItem::remote(index, d.url.clone(), self.sheet.clone(), output.join(&d.file_name))
            })
            .collect();
        ctx.set_total(items.len());

        let runner = runner_for(
            self.runner.as_ref(),
            &self.config,
            DOWNLOAD_WORKER_CEILING,
            DEFAULT_DOWNLOAD_TIMEOUT,
        );
        let stage = Stage::new(0, Arc::new(fetch));
        let outcome = run_stages(ctx, &runner, items, &[stage]);
        let downloaded = outcome.survivors.len();
        ctx.info(format!(
            "Downloaded {downloaded}/{} file(s) into {}",
            plan.len(),
            output.display()
        ));

        let summary = if outcome.failures.is_empty() {
            None
        } else {
            let mut failures: Vec<(&PlannedDownload, &ItemError)> = outcome
                .failures
                .iter()
                .map(|(item, error)| (&plan[item.index], error))
                .collect();
            failures.sort_by_key(|(download, _)| (download.line, download.file_name.clone()));

            let log_path = output.join(DOWNLOAD_LOG_FILE);
            ctx.set_current("Writing download log");
            write_download_log(&log_path, downloaded, plan.len(), &failures)?;
            ctx.warn(format!(
                "{} download(s) failed, see {}",
                failures.len(),
                log_path.display()
            ));
            Some(log_path)
        };

        Ok(JobResult {
            summary,
            rows: downloaded,
            output_dirs: vec![output],
            bundle: None,
            failed_items: outcome.failed,
        })
    }
}

/// Failure text without the item-name prefix the job log already carries.
fn failure_reason(error: &ItemError) -> String {
    match error {
        ItemError::Transform { detail, .. } => detail.clone(),
        other => other.to_string(),
    }
}

fn write_download_log(
    path: &Path,
    succeeded: usize,
    total: usize,
    failures: &[(&PlannedDownload, &ItemError)],
) -> Result<(), PipelineError> {
    let write = || -> std::io::Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        writeln!(file, "Download-Log vom {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file, "Erfolgreich: {succeeded}/{total}")?;
        writeln!(file, "Fehler: {}", failures.len())?;
        writeln!(file)?;
        for (download, error) in failures {
            writeln!(
                file,
                "Zeile {} - {}: {} - Fehler: {}",
                download.line,
                download.kind.label(),
                download.url,
                failure_reason(error)
            )?;
        }
        file.flush()
    };
    write().map_err(|e| PipelineError::SummaryFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchOptions;
    use crate::job::{JobId, JobRecord};
    use crate::transform::fetch::serve_routes;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn context() -> JobContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut record = JobRecord::new(JobId::generate(), "download");
        record.begin().unwrap();
        JobContext::new(record, tx)
    }

    fn write_sheet(dir: &Path, rows: &[String]) -> PathBuf {
        let path = dir.join("media.csv");
        let mut text = String::from("Artikel-Nr;Abbildungen;Ambientebilder ;Masszeichnungen\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn downloads_rename_and_log_failures() {
        let base = serve_routes(vec![
            ("/img/a.png", 200, b"product".to_vec()),
            ("/amb/1.jpg", 200, b"ambience".to_vec()),
            ("/dwg/m.jpg", 200, b"drawing".to_vec()),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let sheet = write_sheet(
            tmp.path(),
            &[
                format!(
                    "1313 414.105.000;{base}/img/a.png;\"{base}/amb/1.jpg;{base}/amb/missing.jpg\";{base}/dwg/m.jpg"
                ),
                "2000 111.000.000;;;".into(),
            ],
        );
        let out = tmp.path().join("media");
        let config = PipelineConfig::builder(&out).build().unwrap();
        let pipeline = MediaDownloadPipeline::new(config, &sheet)
            .with_runner(BatchRunner::new(BatchOptions::new(2, Duration::from_secs(20))));
        let mut ctx = context();

        let result = pipeline.run(&mut ctx).unwrap();
        assert_eq!(result.rows, 3);
        assert_eq!(result.failed_items, vec!["01313414_105_000_3.jpg"]);
        assert_eq!(std::fs::read(out.join("01313414_105_000.png")).unwrap(), b"product");
        assert_eq!(std::fs::read(out.join("01313414_105_000_2.jpg")).unwrap(), b"ambience");
        assert_eq!(std::fs::read(out.join("1313414.jpg")).unwrap(), b"drawing");
        assert!(!out.join("01313414_105_000_3.jpg").exists());

        let log_path = out.join(DOWNLOAD_LOG_FILE);
        assert_eq!(result.summary.as_deref(), Some(log_path.as_path()));
        let log = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert!(lines[0].starts_with("Download-Log vom "));
        assert_eq!(lines[1], "Erfolgreich: 3/4");
        assert_eq!(lines[2], "Fehler: 1");
        assert_eq!(lines[3], "");
        assert!(
            lines[4].starts_with(&format!("Zeile 1 - Ambiente 3: {base}/amb/missing.jpg - Fehler: ")),
            "{}",
            lines[4]
        );
        assert!(lines[4].contains("404"), "{}", lines[4]);
        assert_eq!(ctx.record().processed_files, 4);
    }

    #[test]
    fn clean_run_writes_no_log() {
        let base = serve_routes(vec![("/a.jpg", 200, b"x".to_vec())]);
        let tmp = tempfile::tempdir().unwrap();
        let sheet = write_sheet(tmp.path(), &[format!("4711;{base}/a.jpg;;")]);
        let config = PipelineConfig::builder(tmp.path()).build().unwrap();

        let result = MediaDownloadPipeline::new(config, &sheet)
            .run(&mut context())
            .unwrap();
        assert_eq!(result.rows, 1);
        assert!(result.summary.is_none());
        assert!(tmp.path().join("04711.jpg").is_file());
        assert!(!tmp.path().join(DOWNLOAD_LOG_FILE).exists());
    }

    #[test]
    fn duplicate_target_names_download_once() {
        let base = serve_routes(vec![
            ("/first.jpg", 200, b"first".to_vec()),
            ("/second.jpg", 200, b"second".to_vec()),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let sheet = write_sheet(
            tmp.path(),
            &[
                format!("4711;{base}/first.jpg;;"),
                format!("47 11;{base}/second.jpg;;"),
            ],
        );
        let config = PipelineConfig::builder(tmp.path()).build().unwrap();
        let mut ctx = context();

        let result = MediaDownloadPipeline::new(config, &sheet).run(&mut ctx).unwrap();
        assert_eq!(result.rows, 1);
        assert_eq!(std::fs::read(tmp.path().join("04711.jpg")).unwrap(), b"first");
        assert!(ctx.record().errors.iter().any(|w| w.contains("already taken")));
    }

    #[test]
    fn sheet_without_urls_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let sheet = write_sheet(tmp.path(), &["4711;;;".into(), ";http://h/a.png;;".into()]);
        let config = PipelineConfig::builder(tmp.path()).build().unwrap();

        let err = MediaDownloadPipeline::new(config, &sheet)
            .run(&mut context())
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoInputFiles { .. }), "{err}");
    }

    #[test]
    fn missing_sheet_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder(tmp.path()).build().unwrap();
        let err = MediaDownloadPipeline::new(config, tmp.path().join("nope.xlsx"))
            .run(&mut context())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputMissing { .. }));
    }
}
