use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::telemetry::error::TelemetryError;
use crate::telemetry::record::Record;

/// Appends one JSON object per line to a file.
///
/// Each record is serialized in full before the writer lock is taken, and the
/// whole line goes out in a single `write_all`, so concurrent callers never
/// interleave and an abrupt exit leaves earlier lines intact.
pub struct JsonlExporter {
    path: PathBuf,
    writer: Mutex<Option<LineWriter<File>>>,
    failure_reported: AtomicBool,
}

impl JsonlExporter {
    /// Open (creating parent directories and the file if needed) in append mode
    pub fn open(path: &Path) -> Result<Self, TelemetryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(LineWriter::new(file))),
            failure_reported: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn emit(&self, record: &Record) {
        let line = match record.to_json_line() {
            Ok(line) => line,
            Err(e) => return self.report_failure(&e),
        };

        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.write_all(&line) {
                drop(guard);
                self.report_failure(&e);
            }
        }
    }

    pub fn flush(&self) {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = guard.as_mut() {
            let _ = writer.flush();
        }
    }

    /// Flush, sync and close the file. Later calls find nothing to release.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match writer {
            Some(mut writer) => {
                writer.flush()?;
                writer.get_ref().sync_all()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn report_failure(&self, err: &dyn std::fmt::Display) {
        if !self.failure_reported.swap(true, Ordering::SeqCst) {
            eprintln!(
                "telemetry: failed to write to {}: {}; further failures are not reported",
                self.path.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::record::tests::sample_log;
    use serde_json::Value;

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/app.jsonl");

        let exporter = JsonlExporter::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(exporter.path(), path.as_path());
    }

    #[test]
    fn concurrent_writers_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jsonl");
        let exporter = JsonlExporter::open(&path).unwrap();

        std::thread::scope(|scope| {
            for caller in 0..3 {
                let exporter = &exporter;
                scope.spawn(move || exporter.emit(&sample_log(&format!("caller {}", caller))));
            }
        });
        exporter.shutdown().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        let mut messages: Vec<&str> = lines.iter().map(|v| v["message"].as_str().unwrap()).collect();
        messages.sort_unstable();
        assert_eq!(messages, ["caller 0", "caller 1", "caller 2"]);
    }

    #[test]
    fn many_concurrent_writers_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burst.jsonl");
        let exporter = JsonlExporter::open(&path).unwrap();

        std::thread::scope(|scope| {
            for caller in 0..8 {
                let exporter = &exporter;
                scope.spawn(move || {
                    for i in 0..50 {
                        exporter.emit(&sample_log(&format!("{}-{}", caller, i)));
                    }
                });
            }
        });
        exporter.shutdown().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 400);
        assert!(contents
            .lines()
            .all(|line| serde_json::from_str::<Value>(line).is_ok()));
    }

    #[test]
    fn reopen_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jsonl");

        let first = JsonlExporter::open(&path).unwrap();
        first.emit(&sample_log("first run"));
        first.shutdown().unwrap();

        let second = JsonlExporter::open(&path).unwrap();
        second.emit(&sample_log("second run"));
        second.shutdown().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn shutdown_twice_releases_once() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = JsonlExporter::open(&dir.path().join("app.jsonl")).unwrap();

        exporter.shutdown().unwrap();
        exporter.shutdown().unwrap();

        assert!(!exporter.is_open());
    }

    #[test]
    fn emit_after_shutdown_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jsonl");
        let exporter = JsonlExporter::open(&path).unwrap();

        exporter.shutdown().unwrap();
        exporter.emit(&sample_log("late"));

        assert!(fs::read_to_string(&path).unwrap().is_empty());
    }
}
