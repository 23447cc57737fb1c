//! Activity log for a single run.
//!
//! Every event is appended to `<log_directory>/<base_name>` and mirrored to the
//! `log` facade so interactive runs show the same trail on the console. Error
//! events are retained; they are the only thing that turns a run into a
//! failed one (see [`crate::orchestrator::RunReport`]).

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const RULE_WIDTH: usize = 80;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Visual weight of a separator line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Thin,
    Thick,
}

impl Separator {
    fn rule(self) -> String {
        let ch = match self {
            Separator::Thin => "-",
            Separator::Thick => "=",
        };
        ch.repeat(RULE_WIDTH)
    }
}

/// One entry in the activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Info(String),
    Warning(String),
    Error(String),
    Separator(Separator),
}

impl LogEvent {
    /// Render the line written to the log file for this event.
    pub fn render(&self, at: DateTime<Local>) -> String {
        let (label, text) = match self {
            LogEvent::Info(text) => ("INFO", text),
            LogEvent::Warning(text) => ("WARN", text),
            LogEvent::Error(text) => ("ERROR", text),
            LogEvent::Separator(sep) => return sep.rule(),
        };
        format!("{} [{}] {}", at.format(TIMESTAMP_FORMAT), label, text)
    }

    fn mirror(&self) {
        match self {
            LogEvent::Info(text) => log::info!("{text}"),
            LogEvent::Warning(text) => log::warn!("{text}"),
            LogEvent::Error(text) => log::error!("{text}"),
            LogEvent::Separator(_) => {}
        }
    }
}

/// Append-only sink for run events.
///
/// The file is opened in append mode for every line, so once rotation has
/// renamed the previous day's file away the next event creates a fresh one.
#[derive(Debug)]
pub struct ActivityLog {
    path: Option<PathBuf>,
    errors: Vec<String>,
    warnings: usize,
    write_failure_reported: bool,
}

impl ActivityLog {
    pub fn new(directory: &Path, base_name: &str) -> Self {
        Self {
            path: Some(directory.join(base_name)),
            errors: Vec::new(),
            warnings: 0,
            write_failure_reported: false,
        }
    }

    /// A log that only mirrors to the console. Used by commands that run
    /// before a log directory is known.
    pub fn console_only() -> Self {
        Self {
            path: None,
            errors: Vec::new(),
            warnings: 0,
            write_failure_reported: false,
        }
    }

    /// Record an event. Never fails the caller.
    pub fn record(&mut self, event: LogEvent) {
        match &event {
            LogEvent::Error(text) => self.errors.push(text.clone()),
            LogEvent::Warning(_) => self.warnings += 1,
            _ => {}
        }
        event.mirror();

        let Some(path) = self.path.as_deref() else {
            return;
        };
        let line = event.render(Local::now());
        if let Err(err) = append_line(path, &line) {
            if !self.write_failure_reported {
                log::error!("cannot write activity log {}: {err}", path.display());
                self.write_failure_reported = true;
            }
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(LogEvent::Info(message.into()));
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(LogEvent::Warning(message.into()));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(LogEvent::Error(message.into()));
    }

    pub fn separator(&mut self, kind: Separator) {
        self.record(LogEvent::Separator(kind));
    }

    /// Create the current log file if it does not exist yet.
    pub fn ensure_exists(&self) -> io::Result<()> {
        match self.path.as_deref() {
            Some(path) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    /// Hand the accumulated error messages to the run report.
    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// Read a log file back as lines.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::to_owned)
        .collect())
}
