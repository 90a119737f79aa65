//! Background executor and the display-side job board.
//!
//! ## Threading model
//!
//! ```text
//!  display thread                     job thread ("job-<id>")
//!  ──────────────                     ───────────────────────
//!  JobBoard::launch ──spawn──────────► drive(record, pipeline)
//!        │                                 │ begin → processing
//!        │        unbounded queue          │ Pipeline::run(&mut JobContext)
//!  JobBoard::drain ◄──StatusMessage──── JobContext::publish / info / warn
//!        │  (try_recv, never blocks)       │ complete | fail
//!  JobBoard::snapshot                      ▼ thread exits, sender dropped
//! ```
//!
//! The job thread owns its [`JobRecord`] outright. The board never sees that
//! record; it rebuilds its own copy from the message stream, so the two sides
//! share nothing but the queue.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

use crate::batch::{panic_message, StageResult};
use crate::error::{ItemError, PipelineError};
use crate::job::{JobId, JobRecord, JobResult, JobStatus, LogEntry, StageProgress, StatusMessage};

// ── Pipeline contract ────────────────────────────────────────────────────

/// A fixed multi-stage job body, run on the job thread.
///
/// Returning `Err` routes the job to the `error` state; item failures are
/// reported through the context and do not make `run` fail.
pub trait Pipeline: Send {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &mut JobContext) -> Result<JobResult, PipelineError>;
}

// ── Job context ──────────────────────────────────────────────────────────

/// The job thread's handle on its record and its outgoing queue.
///
/// Every text message goes to `tracing` and to the queue with the same
/// wording, so the log file and the live trail never disagree.
pub struct JobContext {
    record: JobRecord,
    sender: UnboundedSender<StatusMessage>,
}

impl JobContext {
    pub fn new(record: JobRecord, sender: UnboundedSender<StatusMessage>) -> Self {
        Self { record, sender }
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    /// Publish a snapshot of the current record.
    pub fn publish(&self) {
        self.send(StatusMessage::StatusUpdate(Box::new(self.record.clone())));
    }

    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!(job = %self.record.id, "{text}");
        self.send(StatusMessage::Info(text));
    }

    /// Record a warning: logged, appended to the error trail, published.
    pub fn warn(&mut self, text: impl Into<String>) {
        let text = text.into();
        warn!(job = %self.record.id, "{text}");
        self.record.push_error(text.clone());
        self.send(StatusMessage::Warning(text));
        self.publish();
    }

    /// Record one item failure.
    pub fn item_failed(&mut self, err: &ItemError) {
        let text = err.to_string();
        error!(job = %self.record.id, "{text}");
        self.record.push_error(text.clone());
        self.send(StatusMessage::Error(text));
    }

    pub fn set_found(&mut self, files: Vec<String>) {
        self.record.found_files = files;
    }

    pub fn set_total(&mut self, total: usize) {
        self.record.set_total(total);
        self.publish();
    }

    /// Count `n` items as final and publish.
    pub fn mark_processed(&mut self, n: usize) {
        self.record.record_processed(n);
        self.publish();
    }

    pub fn set_current(&mut self, label: impl Into<String>) {
        self.record.current_file = Some(label.into());
    }

    pub fn set_copied(&mut self, copied: bool) {
        self.record.copied_to_secondary = Some(copied);
        self.publish();
    }

    /// Enter stage `position` (0-based) of `count` with `total` items.
    pub fn begin_stage(&mut self, name: &str, position: usize, count: usize, total: usize) {
        self.record.stage = Some(StageProgress {
            name: name.to_string(),
            position: position + 1,
            count,
            completed: 0,
            total,
        });
        self.info(format!(
            "Stage {}/{count} '{name}': {total} file(s)",
            position + 1
        ));
        self.publish();
    }

    /// Account for one finished item of the current stage.
    ///
    /// A failed item is final; a successful one only when `last_stage`.
    pub fn item_finished(&mut self, completed: usize, result: &StageResult, last_stage: bool) {
        if let Some(stage) = self.record.stage.as_mut() {
            stage.completed = completed;
        }
        self.record.current_file = Some(result.item.name.clone());
        match &result.outcome {
            Ok(()) if last_stage => self.record.record_processed(1),
            Ok(()) => {}
            Err(e) => {
                self.item_failed(e);
                self.record.record_processed(1);
            }
        }
        self.publish();
    }

    fn finish(mut self, result: JobResult) {
        let rows = result.rows;
        let failed = result.failed_items.len();
        match self.record.complete(result) {
            Ok(()) => {
                info!(
                    job = %self.record.id,
                    "Job completed: {rows} row(s), {failed} failed item(s) in {:.1}s",
                    self.record.duration().num_milliseconds() as f64 / 1000.0
                );
                self.send(StatusMessage::Complete(Box::new(self.record.clone())));
            }
            Err(e) => self.abort(e.to_string()),
        }
    }

    fn abort(mut self, message: String) {
        error!(job = %self.record.id, "Job failed: {message}");
        if self.record.fail(message.clone()).is_err() {
            // Already terminal; the first outcome stands.
            return;
        }
        self.send(StatusMessage::Fatal(message));
        self.publish();
    }

    fn send(&self, message: StatusMessage) {
        // The board may have dropped the job; the run still finishes.
        let _ = self.sender.send(message);
    }
}

// ── Executor ─────────────────────────────────────────────────────────────

/// A started job: its id, its message queue and its thread.
pub struct JobHandle {
    pub id: JobId,
    pub receiver: UnboundedReceiver<StatusMessage>,
    pub thread: JoinHandle<()>,
}

/// Run `pipeline` for `job` on a dedicated OS thread.
///
/// The queued snapshot is published before the thread starts, so the first
/// message of every job describes its `queued` state. The terminal snapshot
/// is always the last message.
pub fn start(job: JobRecord, pipeline: Box<dyn Pipeline>) -> Result<JobHandle, PipelineError> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let id = job.id.clone();
    let _ = sender.send(StatusMessage::StatusUpdate(Box::new(job.clone())));

    let thread = std::thread::Builder::new()
        .name(format!("job-{id}"))
        .spawn(move || drive(job, pipeline, sender))
        .map_err(|source| PipelineError::SpawnFailed {
            job_id: id.to_string(),
            source,
        })?;

    Ok(JobHandle {
        id,
        receiver,
        thread,
    })
}

fn drive(job: JobRecord, pipeline: Box<dyn Pipeline>, sender: UnboundedSender<StatusMessage>) {
    let mut ctx = JobContext::new(job, sender);
    if let Err(e) = ctx.record.begin() {
        ctx.abort(e.to_string());
        return;
    }
    ctx.info(format!("Job {} started: {}", ctx.id(), pipeline.name()));
    ctx.publish();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&mut ctx)));
    match outcome {
        Ok(Ok(result)) => ctx.finish(result),
        Ok(Err(e)) => ctx.abort(e.to_string()),
        Err(payload) => ctx.abort(format!(
            "Pipeline '{}' panicked: {}",
            pipeline.name(),
            panic_message(payload.as_ref())
        )),
    }
}

// ── Display side ─────────────────────────────────────────────────────────

struct TrackedJob {
    view: JobRecord,
    receiver: UnboundedReceiver<StatusMessage>,
    log: Vec<LogEntry>,
    thread: Option<JoinHandle<()>>,
}

/// The display layer's view of every job it launched.
///
/// Single-threaded by construction: the board is owned by the polling loop
/// and only ever reads from job queues.
#[derive(Default)]
pub struct JobBoard {
    jobs: BTreeMap<JobId, TrackedJob>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job record for `pipeline` and start it.
    pub fn launch(&mut self, pipeline: Box<dyn Pipeline>) -> Result<JobId, PipelineError> {
        let record = JobRecord::new(JobId::generate(), pipeline.name());
        let view = record.clone();
        let handle = start(record, pipeline)?;
        let id = handle.id.clone();
        self.jobs.insert(
            id.clone(),
            TrackedJob {
                view,
                receiver: handle.receiver,
                log: Vec::new(),
                thread: Some(handle.thread),
            },
        );
        Ok(id)
    }

    /// Take every message currently queued for `id` without blocking, and
    /// fold it into the local view. Unknown ids drain as empty.
    pub fn drain(&mut self, id: &JobId) -> Vec<StatusMessage> {
        let Some(job) = self.jobs.get_mut(id) else {
            return Vec::new();
        };

        let mut drained = Vec::new();
        loop {
            match job.receiver.try_recv() {
                Ok(message) => {
                    job.view.apply(&message);
                    if let Some(entry) = message.log_entry() {
                        job.log.push(entry);
                    }
                    drained.push(message);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if let Some(thread) = job.thread.take() {
                        let _ = thread.join();
                    }
                    if !job.view.is_terminal() {
                        let text = format!("Job {id} exited without a final status");
                        warn!("{text}");
                        let _ = job.view.fail(text.clone());
                        let message = StatusMessage::Fatal(text);
                        if let Some(entry) = message.log_entry() {
                            job.log.push(entry);
                        }
                        drained.push(message);
                    }
                    break;
                }
            }
        }
        drained
    }

    /// Drain every job; returns how many messages were applied.
    pub fn drain_all(&mut self) -> usize {
        let ids: Vec<JobId> = self.jobs.keys().cloned().collect();
        ids.iter().map(|id| self.drain(id).len()).sum()
    }

    /// Latest locally applied view of `id`.
    pub fn snapshot(&self, id: &JobId) -> Option<&JobRecord> {
        self.jobs.get(id).map(|job| &job.view)
    }

    /// Info, warning, error and fatal lines received for `id`.
    pub fn log(&self, id: &JobId) -> &[LogEntry] {
        self.jobs.get(id).map(|job| job.log.as_slice()).unwrap_or(&[])
    }

    /// `true` while any job is still queued or processing.
    pub fn polling_needed(&self) -> bool {
        self.jobs.values().any(|job| !job.view.is_terminal())
    }

    /// All views: running jobs first, then newest first.
    pub fn jobs(&self) -> Vec<&JobRecord> {
        let mut views: Vec<&JobRecord> = self.jobs.values().map(|job| &job.view).collect();
        views.sort_by(|a, b| {
            let a_running = a.status == JobStatus::Processing;
            let b_running = b.status == JobStatus::Processing;
            b_running
                .cmp(&a_running)
                .then_with(|| b.started_at.cmp(&a.started_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        views
    }

    /// Forget a job. A still-running job keeps running; its messages are
    /// discarded.
    pub fn remove(&mut self, id: &JobId) -> Option<JobRecord> {
        self.jobs.remove(id).map(|job| job.view)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
