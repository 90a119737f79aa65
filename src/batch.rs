//! Batch runner: one stage, every item, bounded parallelism.
//!
//! ## How a batch runs
//!
//! ```text
//! items ──► PoolFactory::build(workers) ──ok──► pooled
//!                  │                              │  permit per item (≤ workers)
//!                  │                              │  spawn_blocking per item
//!                  │                              │  timeout per item
//!                  │                              │  buffer_unordered(workers)
//!                  │                              ▼
//!                  └──err──► sequential ──► one StageResult per item
//!                           (submission order, no timeout)
//! ```
//!
//! Per-item failures never escape the runner: a transform error, a timeout,
//! a missing output file or a panic all become a failed [`StageResult`].
//! Only the pool itself failing changes how the batch runs, and even then
//! every item still gets exactly one result.
//!
//! ## Why a runtime per batch?
//!
//! A transform stuck in a decoder cannot be interrupted. The timeout lets the
//! batch move on without it, and `shutdown_background` drops the runtime
//! without joining the stuck thread.
//!
//! A timed-out transform keeps its permit until it really returns, so at no
//! point do more than `max_concurrency` transforms run at once. Items queued
//! behind stuck ones wait for a permit; their timeout starts once they hold
//! one.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ItemError;
use crate::layout::file_name_of;
use crate::progress::BatchProgress;
use crate::transform::Transform;

// ── Data model ───────────────────────────────────────────────────────────

/// One source file plus the file each stage writes for it.
///
/// Stage `k` reads `source` when `k == 0`, otherwise `targets[k - 1]`, and
/// writes `targets[k]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Submission position, 0-based.
    pub index: usize,
    /// Original file name of the source, used in messages.
    pub name: String,
    pub source: PathBuf,
    pub targets: Vec<PathBuf>,
    /// Remote location the first stage fetches, for download items.
    pub url: Option<String>,
}

impl WorkItem {
    pub fn new(index: usize, source: PathBuf, targets: Vec<PathBuf>) -> Self {
        Self {
            index,
            name: file_name_of(&source),
            source,
            targets,
            url: None,
        }
    }

    /// A download item: `url` is fetched into `target`. `listing` is the
    /// file the URL was read from; the item is named after its target.
    pub fn remote(index: usize, url: impl Into<String>, listing: PathBuf, target: PathBuf) -> Self {
        Self {
            index,
            name: file_name_of(&target),
            source: listing,
            targets: vec![target],
            url: Some(url.into()),
        }
    }

    /// Source file stem.
    pub fn stem(&self) -> String {
        crate::layout::stem_of(&self.source)
    }

    /// Input and output path of stage `stage`, if the item has that stage.
    pub fn stage_io(&self, stage: usize) -> Option<(&Path, &Path)> {
        let output = self.targets.get(stage)?;
        let input = if stage == 0 {
            &self.source
        } else {
            self.targets.get(stage - 1)?
        };
        Some((input.as_path(), output.as_path()))
    }
}

/// One pipeline stage: a named transform at a position in the chain.
#[derive(Clone)]
pub struct Stage {
    pub name: &'static str,
    /// Position in the chain; selects the item paths via [`WorkItem::stage_io`].
    pub index: usize,
    pub transform: Arc<dyn Transform>,
}

impl Stage {
    pub fn new(index: usize, transform: Arc<dyn Transform>) -> Self {
        Self {
            name: transform.name(),
            index,
            transform,
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("index", &self.index)
            .finish()
    }
}

/// Outcome of one item in one stage.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub item: WorkItem,
    pub stage: &'static str,
    pub outcome: Result<(), ItemError>,
    pub elapsed: Duration,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&ItemError> {
        self.outcome.as_ref().err()
    }
}

/// Everything a batch produced.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One entry per input item, in completion order.
    pub results: Vec<StageResult>,
    /// Why the batch ran sequentially, if it did.
    pub fallback: Option<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Runner limits.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Items in flight at once. Always ≥ 1.
    pub max_concurrency: usize,
    /// Upper bound on a single transform call in pooled mode.
    pub per_item_timeout: Duration,
}

impl BatchOptions {
    pub fn new(max_concurrency: usize, per_item_timeout: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            per_item_timeout: if per_item_timeout.is_zero() {
                Duration::from_millis(1)
            } else {
                per_item_timeout
            },
        }
    }
}

// ── Worker pool ──────────────────────────────────────────────────────────

/// Builds the worker pool a batch runs on.
///
/// The seam exists so tests (and constrained hosts) can refuse a pool and
/// exercise the sequential path.
pub trait PoolFactory: Send + Sync {
    fn build(&self, workers: usize) -> io::Result<Runtime>;
}

/// Default pool: a dedicated multi-thread tokio runtime per batch.
///
/// Refuses to build inside an existing async runtime, where blocking on a
/// nested runtime would panic; the runner then falls back to sequential mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPool;

impl PoolFactory for TokioPool {
    fn build(&self, workers: usize) -> io::Result<Runtime> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(io::Error::other(
                "batch pool cannot be created inside an async runtime",
            ));
        }
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.clamp(1, 2))
            .thread_name("batch-worker")
            .enable_time()
            .build()
    }
}

// ── Runner ───────────────────────────────────────────────────────────────

/// Runs one stage over a batch of items.
#[derive(Clone)]
pub struct BatchRunner {
    options: BatchOptions,
    pool: Arc<dyn PoolFactory>,
}

impl BatchRunner {
    pub fn new(options: BatchOptions) -> Self {
        Self::with_pool(options, Arc::new(TokioPool))
    }

    pub fn with_pool(options: BatchOptions, pool: Arc<dyn PoolFactory>) -> Self {
        Self { options, pool }
    }

    pub fn options(&self) -> BatchOptions {
        self.options
    }

    /// Apply `stage` to every item. Returns exactly one result per item.
    pub fn run(
        &self,
        stage: &Stage,
        items: &[WorkItem],
        progress: &mut dyn BatchProgress,
    ) -> BatchReport {
        progress.on_batch_start(stage.name, items.len());
        if items.is_empty() {
            return BatchReport::default();
        }

        match self.pool.build(self.options.max_concurrency) {
            Ok(runtime) => {
                debug!(
                    "Stage '{}': {} item(s), {} worker(s)",
                    stage.name,
                    items.len(),
                    self.options.max_concurrency
                );
                let results = self.run_pooled(&runtime, stage, items, progress);
                runtime.shutdown_background();
                BatchReport {
                    results,
                    fallback: None,
                }
            }
            Err(e) => {
                let reason = format!(
                    "Worker pool unavailable for stage '{}' ({e}); running sequentially",
                    stage.name
                );
                warn!("{reason}");
                progress.on_fallback(stage.name, &reason);
                let results = run_sequential(stage, items, progress);
                BatchReport {
                    results,
                    fallback: Some(reason),
                }
            }
        }
    }

    fn run_pooled(
        &self,
        runtime: &Runtime,
        stage: &Stage,
        items: &[WorkItem],
        progress: &mut dyn BatchProgress,
    ) -> Vec<StageResult> {
        let total = items.len();
        let timeout = self.options.per_item_timeout;
        let stage_name = stage.name;
        let stage_index = stage.index;

        let permits = Arc::new(Semaphore::new(self.options.max_concurrency));

        runtime.block_on(async {
            let mut pending = stream::iter(items.iter().map(|item| {
                let transform = Arc::clone(&stage.transform);
                let permits = Arc::clone(&permits);
                let item = item.clone();
                async move {
                    let Ok(permit) = permits.acquire_owned().await else {
                        return StageResult {
                            outcome: Err(ItemError::Transform {
                                item: item.name.clone(),
                                stage: stage_name.to_string(),
                                detail: "worker pool closed".to_string(),
                            }),
                            item,
                            stage: stage_name,
                            elapsed: Duration::ZERO,
                        };
                    };
                    let started = Instant::now();
                    let task_item = item.clone();
                    let task = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        apply_checked(transform.as_ref(), &task_item, stage_index, stage_name)
                    });
                    let outcome = match tokio::time::timeout(timeout, task).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(join_err)) => Err(ItemError::Panicked {
                            item: item.name.clone(),
                            stage: stage_name.to_string(),
                            detail: join_err.to_string(),
                        }),
                        Err(_) => Err(ItemError::Timeout {
                            item: item.name.clone(),
                            stage: stage_name.to_string(),
                            limit_ms: timeout.as_millis() as u64,
                        }),
                    };
                    StageResult {
                        item,
                        stage: stage_name,
                        outcome,
                        elapsed: started.elapsed(),
                    }
                }
            }))
            .buffer_unordered(self.options.max_concurrency);

            let mut results = Vec::with_capacity(total);
            while let Some(result) = pending.next().await {
                progress.on_item_complete(stage_name, results.len() + 1, total, &result);
                results.push(result);
            }
            results
        })
    }
}

fn run_sequential(
    stage: &Stage,
    items: &[WorkItem],
    progress: &mut dyn BatchProgress,
) -> Vec<StageResult> {
    let total = items.len();
    let mut results = Vec::with_capacity(total);

    for item in items {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            apply_checked(stage.transform.as_ref(), item, stage.index, stage.name)
        }))
        .unwrap_or_else(|payload| {
            Err(ItemError::Panicked {
                item: item.name.clone(),
                stage: stage.name.to_string(),
                detail: panic_message(payload.as_ref()),
            })
        });
        let result = StageResult {
            item: item.clone(),
            stage: stage.name,
            outcome,
            elapsed: started.elapsed(),
        };
        progress.on_item_complete(stage.name, results.len() + 1, total, &result);
        results.push(result);
    }

    results
}

/// Run the transform, then verify the output it promised exists.
fn apply_checked(
    transform: &dyn Transform,
    item: &WorkItem,
    stage_index: usize,
    stage_name: &str,
) -> Result<(), ItemError> {
    let Some((input, output)) = item.stage_io(stage_index) else {
        return Err(ItemError::Transform {
            item: item.name.clone(),
            stage: stage_name.to_string(),
            detail: format!("no target path for stage {stage_index}"),
        });
    };

    if !input.exists() {
        return Err(ItemError::OutputMissing {
            item: item.name.clone(),
            stage: stage_name.to_string(),
            path: input.to_path_buf(),
        });
    }

    transform
        .apply(item, input, output)
        .map_err(|e| ItemError::Transform {
            item: item.name.clone(),
            stage: stage_name.to_string(),
            detail: e.to_string(),
        })?;

    if !output.exists() {
        return Err(ItemError::OutputMissing {
            item: item.name.clone(),
            stage: stage_name.to_string(),
            path: output.to_path_buf(),
        });
    }
    Ok(())
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::progress::NoopProgress;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Copies input to output; fails for names containing "bad".
    struct CopyUnlessBad;

    impl Transform for CopyUnlessBad {
        fn name(&self) -> &'static str {
            "copy"
        }

        fn apply(&self, item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
            if item.name.contains("bad") {
                return Err(TransformError::Unsupported("bad input".into()));
            }
            fs::copy(input, output)?;
            Ok(())
        }
    }

    /// Claims success without writing anything.
    struct Liar;

    impl Transform for Liar {
        fn name(&self) -> &'static str {
            "liar"
        }

        fn apply(&self, _: &WorkItem, _: &Path, _: &Path) -> Result<(), TransformError> {
            Ok(())
        }
    }

    struct Panics;

    impl Transform for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn apply(&self, _: &WorkItem, _: &Path, _: &Path) -> Result<(), TransformError> {
            panic!("decoder exploded");
        }
    }

    /// Sleeps while tracking how many calls overlap.
    struct Tracked {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Transform for Tracked {
        fn name(&self) -> &'static str {
            "tracked"
        }

        fn apply(&self, _: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            fs::copy(input, output)?;
            Ok(())
        }
    }

    struct NoPool;

    impl PoolFactory for NoPool {
        fn build(&self, _workers: usize) -> io::Result<Runtime> {
            Err(io::Error::other("out of threads"))
        }
    }

    fn items(dir: &Path, names: &[&str]) -> Vec<WorkItem> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let src = dir.join(name);
                fs::write(&src, name.as_bytes()).unwrap();
                WorkItem::new(i, src, vec![dir.join(format!("{name}.out"))])
            })
            .collect()
    }

    fn runner() -> BatchRunner {
        BatchRunner::new(BatchOptions::new(3, Duration::from_secs(5)))
    }

    #[test]
    fn one_result_per_item() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = items(tmp.path(), &["a", "b", "bad", "c", "d"]);
        let stage = Stage::new(0, Arc::new(CopyUnlessBad));
        let report = runner().run(&stage, &batch, &mut NoopProgress);
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        assert!(report.fallback.is_none());
        let failed = report.results.iter().find(|r| !r.is_success()).unwrap();
        assert_eq!(failed.item.name, "bad");
    }

    #[test]
    fn empty_batch_is_empty_report() {
        let stage = Stage::new(0, Arc::new(CopyUnlessBad));
        let report = runner().run(&stage, &[], &mut NoopProgress);
        assert!(report.results.is_empty());
    }

    #[test]
    fn missing_output_is_item_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = items(tmp.path(), &["a"]);
        let stage = Stage::new(0, Arc::new(Liar));
        let report = runner().run(&stage, &batch, &mut NoopProgress);
        assert!(matches!(
            report.results[0].error(),
            Some(ItemError::OutputMissing { .. })
        ));
    }

    #[test]
    fn panic_in_pool_is_item_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = items(tmp.path(), &["a", "b"]);
        let stage = Stage::new(0, Arc::new(Panics));
        let report = runner().run(&stage, &batch, &mut NoopProgress);
        assert_eq!(report.results.len(), 2);
        assert!(report
            .results
            .iter()
            .all(|r| matches!(r.error(), Some(ItemError::Panicked { .. }))));
    }

    #[test]
    fn timed_out_items_still_count_against_the_worker_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = items(tmp.path(), &["a", "b", "c", "d", "e", "f"]);
        let tracked = Arc::new(Tracked {
            delay: Duration::from_millis(400),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let stage = Stage::new(0, Arc::clone(&tracked) as Arc<dyn Transform>);
        let runner = BatchRunner::new(BatchOptions::new(2, Duration::from_millis(100)));

        let report = runner.run(&stage, &batch, &mut NoopProgress);
        assert_eq!(report.results.len(), 6);
        assert!(report
            .results
            .iter()
            .all(|r| matches!(r.error(), Some(ItemError::Timeout { .. }))));

        // Let the last stragglers finish before reading the peak.
        std::thread::sleep(Duration::from_millis(600));
        let peak = tracked.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "{peak} transforms overlapped");
    }

    #[test]
    fn pool_failure_falls_back_in_submission_order() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = items(tmp.path(), &["a", "bad", "c"]);
        let stage = Stage::new(0, Arc::new(CopyUnlessBad));
        let runner = BatchRunner::with_pool(
            BatchOptions::new(4, Duration::from_secs(5)),
            Arc::new(NoPool),
        );
        let report = runner.run(&stage, &batch, &mut NoopProgress);
        assert!(report.fallback.as_deref().unwrap().contains("out of threads"));
        let order: Vec<_> = report.results.iter().map(|r| r.item.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(report.succeeded(), 2);
    }

    #[test]
    fn sequential_fallback_catches_panics() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = items(tmp.path(), &["a"]);
        let stage = Stage::new(0, Arc::new(Panics));
        let runner = BatchRunner::with_pool(
            BatchOptions::new(1, Duration::from_secs(5)),
            Arc::new(NoPool),
        );
        let report = runner.run(&stage, &batch, &mut NoopProgress);
        match report.results[0].error() {
            Some(ItemError::Panicked { detail, .. }) => assert!(detail.contains("decoder exploded")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn nested_runtime_refuses_pool() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = rt.enter();
        assert!(TokioPool.build(2).is_err());
    }

    #[test]
    fn stage_io_chains_targets() {
        let item = WorkItem::new(
            0,
            PathBuf::from("src/a.png"),
            vec![PathBuf::from("t1/a.tif"), PathBuf::from("t2/a.jpg")],
        );
        assert_eq!(
            item.stage_io(0),
            Some((Path::new("src/a.png"), Path::new("t1/a.tif")))
        );
        assert_eq!(
            item.stage_io(1),
            Some((Path::new("t1/a.tif"), Path::new("t2/a.jpg")))
        );
        assert_eq!(item.stage_io(2), None);
        assert_eq!(item.stem(), "a");
    }
}
