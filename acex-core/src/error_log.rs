//! Append-only error log
//!
//! One line per failure under `<output_root>/logs/extraction_errors.log`:
//! `[YYYY-MM-DD HH:MM:SS] <source path>: <message>`. A failure to log is
//! itself swallowed; the log must never take a worker down.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ERROR_LOG_NAME: &str = "extraction_errors.log";

/// Shared append-only log for per-item failures
pub struct ErrorLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ErrorLog {
    /// Create a log writing to `<logs_dir>/extraction_errors.log`
    ///
    /// The file is opened lazily on first append.
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            path: logs_dir.join(ERROR_LOG_NAME),
            file: Mutex::new(None),
        }
    }

    /// Append one error line; never fails
    pub fn log(&self, source: &str, message: &str) {
        let line = format!(
            "[{}] {}: {}\n",
            acex_common::time::log_timestamp(),
            source,
            message
        );

        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Cannot open error log");
                    return;
                }
            }
        }

        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(line.as_bytes()) {
                tracing::warn!(error = %e, "Error log append failed");
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
