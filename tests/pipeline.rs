//! End-to-end job tests through the public API.
//!
//! Every test builds a throwaway project folder, launches a job on a
//! [`JobBoard`] and polls it the way the CLI does.

use catalog_media::layout::ProjectLayout;
use catalog_media::{
    article_number, BatchOptions, BatchRunner, CatalogImagesPipeline, FileListCache, ItemError,
    JobBoard, JobId, JobRecord, JobStatus, LogLevel, NoopProgress, PipelineConfig, PoolFactory,
    Stage, StatusMessage, Transform, TransformError, WorkItem,
};
use calamine::{open_workbook_auto, Reader};
use image::{DynamicImage, Rgb, RgbImage};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Helpers ──────────────────────────────────────────────────────────────────

/// A white image with a dark bar, so the border crop has something to keep.
fn write_article_image(path: &Path) {
    let mut img = RgbImage::from_pixel(60, 40, Rgb([255, 255, 255]));
    for x in 10..50 {
        for y in 15..25 {
            img.put_pixel(x, y, Rgb([20, 20, 20]));
        }
    }
    DynamicImage::ImageRgb8(img).save(path).unwrap();
}

/// Project with `count` images named `item_01.png`…; `corrupt` lists the
/// 1-based numbers written as garbage instead.
fn image_project(count: usize, corrupt: &[usize]) -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let originals = ProjectLayout::new(tmp.path()).image_originals();
    std::fs::create_dir_all(&originals).unwrap();
    for n in 1..=count {
        let path = originals.join(format!("item_{n:02}.png"));
        if corrupt.contains(&n) {
            std::fs::write(&path, b"definitely not a png").unwrap();
        } else {
            write_article_image(&path);
        }
    }
    tmp
}

fn images_job(root: &Path) -> CatalogImagesPipeline {
    let config = PipelineConfig::builder(root).build().unwrap();
    CatalogImagesPipeline::new(config, Arc::new(FileListCache::default()))
}

/// Poll until the job is terminal; returns every message drained.
fn run_to_end(board: &mut JobBoard, id: &JobId) -> Vec<StatusMessage> {
    let deadline = Instant::now() + Duration::from_secs(60);
    let mut messages = Vec::new();
    while board.polling_needed() {
        messages.extend(board.drain(id));
        assert!(Instant::now() < deadline, "job {id} did not finish");
        std::thread::sleep(Duration::from_millis(10));
    }
    messages.extend(board.drain(id));
    messages
}

fn finished_record(board: &JobBoard, id: &JobId) -> JobRecord {
    board.snapshot(id).cloned().unwrap()
}

/// Data rows of a summary workbook, header skipped, every cell as text.
fn summary_rows(path: &Path) -> Vec<Vec<String>> {
    let mut workbook = open_workbook_auto(path).unwrap();
    let range = workbook.worksheet_range_at(0).unwrap().unwrap();
    range
        .rows()
        .skip(1)
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect()
}

// ── Item isolation ───────────────────────────────────────────────────────────

#[test]
fn one_corrupt_image_fails_alone() {
    let project = image_project(10, &[7]);
    let mut board = JobBoard::new();
    let id = board.launch(Box::new(images_job(project.path()))).unwrap();
    let messages = run_to_end(&mut board, &id);

    let stage_totals: Vec<(usize, usize)> = messages
        .iter()
        .filter_map(|m| match m {
            StatusMessage::StatusUpdate(r) => r.stage.as_ref().map(|s| (s.position, s.total)),
            _ => None,
        })
        .collect();
    assert!(stage_totals.contains(&(1, 10)), "{stage_totals:?}");
    assert!(stage_totals.contains(&(2, 9)), "{stage_totals:?}");
    assert!(!stage_totals.contains(&(2, 10)), "{stage_totals:?}");

    let record = finished_record(&board, &id);
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.total_files, 10);
    assert_eq!(record.processed_files, 10);
    assert_eq!(record.errors.len(), 1, "errors: {:?}", record.errors);
    assert!(record.errors[0].contains("item_07.png"));

    let stage = record.stage.as_ref().unwrap();
    assert_eq!(stage.position, 2);
    assert_eq!(stage.total, 9);
    assert_eq!(stage.completed, 9);

    let result = record.result.unwrap();
    assert_eq!(result.rows, 9);
    assert_eq!(result.failed_items, vec!["item_07.png"]);
    let rows = summary_rows(&result.summary.unwrap());
    assert_eq!(rows.len(), 9);
    assert!(rows.iter().all(|row| !row[2].contains("item_07")));
}

#[test]
fn every_summary_row_points_at_existing_files() {
    let project = image_project(4, &[2]);
    let mut board = JobBoard::new();
    let id = board.launch(Box::new(images_job(project.path()))).unwrap();
    run_to_end(&mut board, &id);

    let result = finished_record(&board, &id).result.unwrap();
    let layout = ProjectLayout::new(project.path());
    let rows = summary_rows(&result.summary.unwrap());
    assert_eq!(rows.len(), 3);
    for row in &rows {
        let last = |cell: &str| cell.rsplit('\\').next().unwrap().to_string();
        assert!(layout.image_originals().join(last(&row[2])).is_file(), "{row:?}");
        assert!(layout.image_cropped().join(last(&row[3])).is_file(), "{row:?}");
        assert!(layout.image_catalog().join(last(&row[4])).is_file(), "{row:?}");
        assert_eq!(&row[5], "allg. Mutation");
    }
}

// ── Fatal errors ─────────────────────────────────────────────────────────────

#[test]
fn missing_input_folder_is_a_single_fatal() {
    let project = tempfile::tempdir().unwrap();
    let mut board = JobBoard::new();
    let id = board.launch(Box::new(images_job(project.path()))).unwrap();
    let messages = run_to_end(&mut board, &id);

    let fatals: Vec<&String> = messages
        .iter()
        .filter_map(|m| match m {
            StatusMessage::Fatal(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("1_Originale"), "fatal: {}", fatals[0]);

    let record = finished_record(&board, &id);
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.processed_files, 0);
    assert!(record.result.is_none());
    assert!(board.log(&id).iter().any(|e| e.level == LogLevel::Fatal));
}

// ── Pool fallback ────────────────────────────────────────────────────────────

struct NoPool;

impl PoolFactory for NoPool {
    fn build(&self, _workers: usize) -> io::Result<tokio::runtime::Runtime> {
        Err(io::Error::other("thread limit reached"))
    }
}

#[test]
fn unavailable_pool_falls_back_to_sequential() {
    let project = image_project(3, &[]);
    let runner = BatchRunner::with_pool(
        BatchOptions::new(4, Duration::from_secs(30)),
        Arc::new(NoPool),
    );
    let mut board = JobBoard::new();
    let id = board
        .launch(Box::new(images_job(project.path()).with_runner(runner)))
        .unwrap();
    let messages = run_to_end(&mut board, &id);

    let record = finished_record(&board, &id);
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.processed_files, 3);
    assert_eq!(record.result.unwrap().rows, 3);
    assert!(messages
        .iter()
        .any(|m| matches!(m, StatusMessage::Warning(text) if text.contains("sequentially"))));
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

/// Writes its output only after `delay`.
struct Slow {
    delay: Duration,
}

impl Transform for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn apply(&self, _item: &WorkItem, _input: &Path, output: &Path) -> Result<(), TransformError> {
        std::thread::sleep(self.delay);
        std::fs::write(output, b"done")?;
        Ok(())
    }
}

#[test]
fn stuck_item_times_out_without_holding_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("stuck.bin");
    std::fs::write(&source, b"x").unwrap();
    let item = WorkItem::new(0, source, vec![tmp.path().join("stuck.out")]);

    let limit = Duration::from_millis(200);
    let runner = BatchRunner::new(BatchOptions::new(1, limit));
    let stage = Stage::new(
        0,
        Arc::new(Slow {
            delay: Duration::from_secs(5),
        }),
    );

    let started = Instant::now();
    let report = runner.run(&stage, &[item], &mut NoopProgress);
    let elapsed = started.elapsed();

    assert!(elapsed >= limit, "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned after {elapsed:?}");
    assert_eq!(report.results.len(), 1);
    assert!(matches!(
        report.results[0].error(),
        Some(ItemError::Timeout { limit_ms: 200, .. })
    ));
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[test]
fn progress_never_goes_backwards() {
    let project = image_project(6, &[3]);
    let mut board = JobBoard::new();
    let id = board.launch(Box::new(images_job(project.path()))).unwrap();
    let messages = run_to_end(&mut board, &id);

    let snapshots: Vec<&JobRecord> = messages
        .iter()
        .filter_map(|m| match m {
            StatusMessage::StatusUpdate(r) | StatusMessage::Complete(r) => Some(r.as_ref()),
            _ => None,
        })
        .collect();
    assert!(snapshots.len() > 2);
    for pair in snapshots.windows(2) {
        assert!(pair[1].progress >= pair[0].progress);
        assert!(pair[1].processed_files >= pair[0].processed_files);
    }
    for snapshot in &snapshots {
        if snapshot.total_files > 0 {
            assert!(snapshot.processed_files <= snapshot.total_files);
        }
        assert!((0.0..=1.0).contains(&snapshot.progress));
    }
    assert!(matches!(messages.last(), Some(StatusMessage::Complete(_))));
    assert_eq!(finished_record(&board, &id).progress, 1.0);
}

// ── Identifiers ──────────────────────────────────────────────────────────────

#[test]
fn article_numbers_depend_only_on_the_file_name() {
    let names = ["0012345_1.002.000.tif", "12345678.png", "0012.jpg", "abc"];
    let first: Vec<String> = names.iter().map(|n| article_number(n)).collect();
    let second: Vec<String> = names.iter().map(|n| article_number(n)).collect();
    assert_eq!(first, second);
    assert_eq!(first[0], "1234 5.1.002.000");
}
