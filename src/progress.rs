//! Progress observer for batch events.
//!
//! Pass a `&mut dyn BatchProgress` to [`crate::batch::BatchRunner::run`] to
//! receive events as a stage works through its items.
//!
//! # Why `&mut self`?
//!
//! Workers never call the observer. The runner collects finished items on the
//! thread that invoked [`run`](crate::batch::BatchRunner::run) and calls the
//! observer from there, one event at a time, so observers can update plain
//! fields (a job record, a counter) without locks.
//!
//! # Example
//!
//! ```rust
//! use catalog_media::{BatchProgress, StageResult};
//!
//! #[derive(Default)]
//! struct Tally {
//!     ok: usize,
//!     failed: usize,
//! }
//!
//! impl BatchProgress for Tally {
//!     fn on_item_complete(&mut self, _stage: &str, _done: usize, _total: usize, r: &StageResult) {
//!         if r.is_success() { self.ok += 1 } else { self.failed += 1 }
//!     }
//! }
//! ```

use crate::batch::StageResult;

/// Receives batch events. All methods default to no-ops.
pub trait BatchProgress {
    /// Called once before any item of the stage is dispatched.
    ///
    /// # Arguments
    /// * `stage`: stage name, e.g. `"border-crop"`
    /// * `total`: number of items in this batch
    fn on_batch_start(&mut self, stage: &str, total: usize) {
        let _ = (stage, total);
    }

    /// Called once per item, in completion order.
    ///
    /// # Arguments
    /// * `completed`: items finished so far in this batch, including this one
    /// * `total`:     number of items in this batch
    /// * `result`:    outcome of the item that just finished
    fn on_item_complete(
        &mut self,
        stage: &str,
        completed: usize,
        total: usize,
        result: &StageResult,
    ) {
        let _ = (stage, completed, total, result);
    }

    /// Called when the worker pool could not be built and the batch is about
    /// to run sequentially.
    fn on_fallback(&mut self, stage: &str, reason: &str) {
        let _ = (stage, reason);
    }
}

/// An observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl BatchProgress for NoopProgress {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::WorkItem;
    use std::path::PathBuf;
    use std::time::Duration;

    #[derive(Default)]
    struct Tracking {
        started: Option<usize>,
        completions: Vec<usize>,
        fallbacks: usize,
    }

    impl BatchProgress for Tracking {
        fn on_batch_start(&mut self, _stage: &str, total: usize) {
            self.started = Some(total);
        }

        fn on_item_complete(&mut self, _: &str, completed: usize, _: usize, _: &StageResult) {
            self.completions.push(completed);
        }

        fn on_fallback(&mut self, _stage: &str, _reason: &str) {
            self.fallbacks += 1;
        }
    }

    fn result() -> StageResult {
        StageResult {
            item: WorkItem::new(0, PathBuf::from("a.png"), vec![PathBuf::from("a.tif")]),
            stage: "border-crop",
            outcome: Ok(()),
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn noop_accepts_all_events() {
        let mut p = NoopProgress;
        p.on_batch_start("s", 3);
        p.on_item_complete("s", 1, 3, &result());
        p.on_fallback("s", "no pool");
    }

    #[test]
    fn tracking_records_events() {
        let mut t = Tracking::default();
        t.on_batch_start("s", 2);
        t.on_item_complete("s", 1, 2, &result());
        t.on_item_complete("s", 2, 2, &result());
        t.on_fallback("s", "x");
        assert_eq!(t.started, Some(2));
        assert_eq!(t.completions, vec![1, 2]);
        assert_eq!(t.fallbacks, 1);
    }
}
