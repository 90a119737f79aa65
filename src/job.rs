//! Job tracker: the state of one background run and the messages that
//! carry it to the display layer.
//!
//! ```text
//! queued ──begin──► processing ──complete──► completed
//!    │                  │
//!    └──────fail────────┴────────fail──────► error
//! ```
//!
//! A [`JobRecord`] is owned by exactly one party at a time. While the job
//! runs, the executor thread owns it and publishes snapshots as
//! [`StatusMessage`]s; the display layer keeps its own copy and folds every
//! message into it with [`JobRecord::apply`]. Nothing is shared, so nothing
//! is locked.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ── Identity ─────────────────────────────────────────────────────────────

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Time-derived job identifier: `YYYYmmdd_HHMMSS-NNNN`.
///
/// The suffix is a process-wide sequence number, so two jobs launched within
/// the same second still get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let seq = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        JobId(format!("{}-{seq:04}", Local::now().format("%Y%m%d_%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── State ────────────────────────────────────────────────────────────────

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        })
    }
}

/// Position inside the current stage, for sub-progress while a stage
/// barrier is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub name: String,
    /// 1-based position of the stage in the chain.
    pub position: usize,
    pub count: usize,
    pub completed: usize,
    pub total: usize,
}

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Summary spreadsheet, if the pipeline writes one.
    pub summary: Option<PathBuf>,
    /// Rows in the summary (= items that passed every stage).
    pub rows: usize,
    /// Directories holding the stage outputs.
    pub output_dirs: Vec<PathBuf>,
    /// Download bundle, if one was requested.
    pub bundle: Option<PathBuf>,
    /// Names of items that failed or were skipped.
    pub failed_items: Vec<String>,
}

/// The mutable state of one background run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Name of the pipeline this job runs.
    pub pipeline: String,
    pub status: JobStatus,
    /// `processed_files / total_files`, in `[0, 1]`.
    pub progress: f64,
    pub current_file: Option<String>,
    pub total_files: usize,
    /// Items whose outcome is final: failed in any stage, skipped, or
    /// through the last stage.
    pub processed_files: usize,
    /// Item errors and warnings, in the order they were raised.
    pub errors: Vec<String>,
    pub stage: Option<StageProgress>,
    /// Source files found by the scan.
    pub found_files: Vec<String>,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub result: Option<JobResult>,
    /// Whether the auxiliary copy succeeded; `None` when it was not attempted.
    pub copied_to_secondary: Option<bool>,
}

impl JobRecord {
    pub fn new(id: JobId, pipeline: impl Into<String>) -> Self {
        Self {
            id,
            pipeline: pipeline.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            current_file: None,
            total_files: 0,
            processed_files: 0,
            errors: Vec::new(),
            stage: None,
            found_files: Vec::new(),
            started_at: Local::now(),
            ended_at: None,
            result: None,
            copied_to_secondary: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `queued → processing`.
    pub fn begin(&mut self) -> Result<(), PipelineError> {
        self.transition(JobStatus::Processing)
    }

    /// `processing → completed`. Marks every item processed.
    pub fn complete(&mut self, result: JobResult) -> Result<(), PipelineError> {
        self.transition(JobStatus::Completed)?;
        self.processed_files = self.total_files;
        self.progress = 1.0;
        self.current_file = None;
        self.result = Some(result);
        Ok(())
    }

    /// `queued | processing → error`, recording `message` as the last error.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), PipelineError> {
        self.transition(JobStatus::Error)?;
        self.current_file = None;
        self.errors.push(message.into());
        Ok(())
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), PipelineError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Queued, JobStatus::Error)
                | (JobStatus::Processing, JobStatus::Error)
        );
        if !allowed {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.ended_at = Some(Local::now());
        }
        Ok(())
    }

    /// Set the number of items the run will account for.
    pub fn set_total(&mut self, total: usize) {
        self.total_files = total.max(self.processed_files);
        self.refresh_progress();
    }

    /// Count `n` more items as final. Never exceeds `total_files`.
    pub fn record_processed(&mut self, n: usize) {
        self.processed_files = (self.processed_files + n).min(self.total_files);
        self.refresh_progress();
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn refresh_progress(&mut self) {
        if self.total_files > 0 {
            self.progress = self.processed_files as f64 / self.total_files as f64;
        }
    }

    /// Wall-clock duration so far, or of the whole run once terminal.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Local::now) - self.started_at
    }

    /// Fold one message into a display-side copy.
    ///
    /// Snapshots replace the copy wholesale, except that a terminal copy is
    /// never replaced by a non-terminal snapshot.
    pub fn apply(&mut self, message: &StatusMessage) {
        match message {
            StatusMessage::StatusUpdate(snapshot) | StatusMessage::Complete(snapshot) => {
                if self.is_terminal() && !snapshot.is_terminal() {
                    return;
                }
                *self = (**snapshot).clone();
            }
            StatusMessage::Info(_)
            | StatusMessage::Warning(_)
            | StatusMessage::Error(_)
            | StatusMessage::Fatal(_) => {}
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────────────

/// One event published by a running job, delivered FIFO per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum StatusMessage {
    StatusUpdate(Box<JobRecord>),
    Info(String),
    Warning(String),
    Error(String),
    Complete(Box<JobRecord>),
    Fatal(String),
}

impl StatusMessage {
    /// The log line this message contributes to the live trail, if any.
    pub fn log_entry(&self) -> Option<LogEntry> {
        let (level, text) = match self {
            StatusMessage::Info(t) => (LogLevel::Info, t),
            StatusMessage::Warning(t) => (LogLevel::Warning, t),
            StatusMessage::Error(t) => (LogLevel::Error, t),
            StatusMessage::Fatal(t) => (LogLevel::Fatal, t),
            StatusMessage::StatusUpdate(_) | StatusMessage::Complete(_) => return None,
        };
        Some(LogEntry {
            level,
            text: text.clone(),
            at: Local::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Fatal,
}

/// One line of a job's live message trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub text: String,
    pub at: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(JobId::generate(), "catalog-images")
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(a.as_str().len(), "20240101_120000-0000".len());
    }

    #[test]
    fn happy_path_transitions() {
        let mut r = record();
        assert_eq!(r.status, JobStatus::Queued);
        r.begin().unwrap();
        r.set_total(4);
        r.record_processed(1);
        assert!((r.progress - 0.25).abs() < f64::EPSILON);
        r.complete(JobResult::default()).unwrap();
        assert_eq!(r.status, JobStatus::Completed);
        assert_eq!(r.progress, 1.0);
        assert_eq!(r.processed_files, 4);
        assert!(r.ended_at.is_some());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut r = record();
        r.begin().unwrap();
        r.fail("boom").unwrap();
        let ended = r.ended_at;
        assert!(r.begin().is_err());
        assert!(r.complete(JobResult::default()).is_err());
        assert!(r.fail("again").is_err());
        assert_eq!(r.ended_at, ended);
        assert_eq!(r.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn cannot_complete_without_processing() {
        let mut r = record();
        let err = r.complete(JobResult::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        r.fail("input missing").unwrap();
        assert_eq!(r.status, JobStatus::Error);
    }

    #[test]
    fn processed_never_exceeds_total() {
        let mut r = record();
        r.begin().unwrap();
        r.set_total(2);
        r.record_processed(5);
        assert_eq!(r.processed_files, 2);
        assert_eq!(r.progress, 1.0);
    }

    #[test]
    fn progress_tracks_processed_ratio() {
        let mut r = record();
        r.begin().unwrap();
        r.set_total(8);
        let mut last = r.progress;
        for _ in 0..8 {
            r.record_processed(1);
            assert!(r.progress >= last);
            assert_eq!(r.progress, r.processed_files as f64 / 8.0);
            last = r.progress;
        }
        assert_eq!(r.progress, 1.0);
    }

    #[test]
    fn apply_keeps_terminal_view() {
        let mut view = record();
        let mut done = view.clone();
        done.begin().unwrap();
        let processing = done.clone();
        done.complete(JobResult::default()).unwrap();

        view.apply(&StatusMessage::Complete(Box::new(done.clone())));
        view.apply(&StatusMessage::StatusUpdate(Box::new(processing)));
        assert_eq!(view.status, JobStatus::Completed);
        view.apply(&StatusMessage::Info("ignored".into()));
        assert_eq!(view, done);
    }

    #[test]
    fn message_serialises_with_kind_tag() {
        let json = serde_json::to_string(&StatusMessage::Warning("copy failed".into())).unwrap();
        assert_eq!(json, r#"{"kind":"warning","payload":"copy failed"}"#);
    }

    #[test]
    fn log_entries_only_for_text_messages() {
        assert!(StatusMessage::StatusUpdate(Box::new(record()))
            .log_entry()
            .is_none());
        let entry = StatusMessage::Fatal("x".into()).log_entry().unwrap();
        assert_eq!(entry.level, LogLevel::Fatal);
    }
}
