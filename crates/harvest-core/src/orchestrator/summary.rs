use chrono::{DateTime, Local};
use std::time::Duration;

use crate::pipeline::{FileReport, TransferState};

/// Tally of terminal file states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub deleted: usize,
    pub backed_up: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Everything a run produced. The exit code is derived from this alone.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub files: Vec<FileReport>,
    /// Every Error-level message logged during the run, in order.
    pub errors: Vec<String>,
    pub warnings: usize,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// `0` when no error was logged, `1` otherwise.
    pub fn exit_code(&self) -> u8 {
        exit_code(self)
    }

    pub fn counts(&self) -> RunCounts {
        tally(&self.files)
    }
}

pub fn exit_code(report: &RunReport) -> u8 {
    if report.succeeded() {
        0
    } else {
        1
    }
}

pub(crate) fn tally(files: &[FileReport]) -> RunCounts {
    let mut counts = RunCounts::default();
    for file in files {
        match file.state {
            TransferState::Deleted => counts.deleted += 1,
            TransferState::BackedUp => counts.backed_up += 1,
            TransferState::Skipped(_) => counts.skipped += 1,
            TransferState::Failed { .. } => counts.failed += 1,
            TransferState::Downloaded => {}
        }
    }
    counts
}

pub(crate) fn summary_line(counts: &RunCounts, total: usize, duration: Duration) -> String {
    format!(
        "run finished in {:.1?}: {} file(s) processed, {} deleted remotely, {} kept remotely, {} skipped, {} failed",
        duration, total, counts.deleted, counts.backed_up, counts.skipped, counts.failed
    )
}
