//! Plain-text audit trail of sync runs, one timestamped line per event

use crate::client::SyncReport;
use crate::error::{Result, SyncError};
use crate::transfer::Outcome;
use chrono::{SecondsFormat, Utc};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Audit sink for sync runs
pub trait Logger: Send + Sync {
    fn start(&self, _run_id: &str, _src: &Path, _dest: &str) {}
    fn sent(&self, _dest: &str, _bytes: u64) {}
    fn deleted(&self, _path: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn done(&self, _sent: u64, _deleted: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Appends to a log file, creating it and its parent directories on open
pub struct TextLogger {
    out: Mutex<LineWriter<File>>,
}

impl TextLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SyncError::io(path, e))?;
        Ok(Self {
            out: Mutex::new(LineWriter::new(file)),
        })
    }

    // Audit output is best effort; a failed write never fails the run
    fn record(&self, event: std::fmt::Arguments<'_>) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "[{}] {}", stamp, event);
        }
    }
}

impl Logger for TextLogger {
    fn start(&self, run_id: &str, src: &Path, dest: &str) {
        self.record(format_args!("START run={} src={} dst={}", run_id, src.display(), dest));
    }
    fn sent(&self, dest: &str, bytes: u64) {
        self.record(format_args!("SEND dst={} bytes={}", dest, bytes));
    }
    fn deleted(&self, path: &str) {
        self.record(format_args!("DELETE path={}", path));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.record(format_args!("ERROR ctx={} path={} msg={}", context, path, msg));
    }
    fn done(&self, sent: u64, deleted: u64, bytes: u64, seconds: f64) {
        self.record(format_args!(
            "DONE sent={sent} deleted={deleted} bytes={bytes} seconds={seconds:.3}"
        ));
    }
}

/// Replay a finished run into a logger
pub fn log_report(logger: &dyn Logger, src: &Path, dest: &str, report: &SyncReport) {
    logger.start(&report.run_id.to_string(), src, dest);
    for outcome in &report.outcomes {
        match outcome {
            Outcome::Sent { path, bytes } => logger.sent(path, *bytes),
            Outcome::Deleted { path } => logger.deleted(path),
            Outcome::SendFailed { path, error } => logger.error("send", path, &error.to_string()),
            Outcome::DeleteFailed { path, error } => logger.error("delete", path, &error.to_string()),
        }
    }
    logger.done(
        report.files_sent() as u64,
        report.files_deleted() as u64,
        report.bytes_sent(),
        report.elapsed.as_secs_f64(),
    );
}
