//! Run statistics and final report
//!
//! Counters are plain atomics updated from the worker pool; snapshot reads
//! are consistent per counter, which is all progress rendering needs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use acex_common::RunPhase;

/// Thread-safe counters for one extraction run
#[derive(Debug)]
pub struct RunStats {
    /// Payloads emitted to the output tree
    pub processed: AtomicU64,
    /// Payloads dropped because an identical payload was already emitted
    /// this run
    pub duplicates_content: AtomicU64,
    /// Sources skipped because a previous run already handled them
    pub already_processed_source: AtomicU64,
    /// Items we attempted and failed on
    pub errors: AtomicU64,
    /// Transcode pass: successful conversions
    pub converted: AtomicU64,
    /// Transcode pass: encoder failures
    pub failed: AtomicU64,
    /// Transcode pass: mirror file already existed
    pub skipped_conversion: AtomicU64,
    /// Millis since `started` of the most recent counter update
    last_update_ms: AtomicU64,
    started: Instant,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            duplicates_content: AtomicU64::new(0),
            already_processed_source: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            converted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped_conversion: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Monotonic start of the run
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Seconds elapsed since the run started
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn touch(&self) {
        let ms = self.started.elapsed().as_millis() as u64;
        self.last_update_ms.store(ms, Ordering::Relaxed);
    }

    pub fn bump_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn bump_duplicates_content(&self) {
        self.duplicates_content.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn bump_already_processed(&self) {
        self.already_processed_source.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn bump_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn bump_converted(&self) {
        self.converted.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn bump_conversion_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn bump_conversion_skipped(&self) {
        self.skipped_conversion.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Total items a worker has finished with, in any outcome
    pub fn items_done(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
            + self.duplicates_content.load(Ordering::Relaxed)
            + self.already_processed_source.load(Ordering::Relaxed)
            + self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates_content: self.duplicates_content.load(Ordering::Relaxed),
            already_processed_source: self.already_processed_source.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            converted: self.converted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_conversion: self.skipped_conversion.load(Ordering::Relaxed),
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub duplicates_content: u64,
    pub already_processed_source: u64,
    pub errors: u64,
    pub converted: u64,
    pub failed: u64,
    pub skipped_conversion: u64,
}

/// Result of the transcode pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeReport {
    pub converted: u64,
    pub failed: u64,
    pub skipped_conversion: u64,
    /// Mirror tree root (`<output_root>/Audio_<CODEC>`)
    pub output_dir: std::path::PathBuf,
    pub duration_seconds: f64,
}

/// Final report of one extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Terminal phase: Done, Cancelled, or Failed
    pub phase: RunPhase,
    pub processed: u64,
    pub duplicates_content: u64,
    pub already_processed_source: u64,
    pub errors: u64,
    pub output_dir: std::path::PathBuf,
    pub duration_seconds: f64,
    pub files_per_second: f64,
    pub transcode: Option<TranscodeReport>,
}

impl RunReport {
    pub fn from_stats(
        phase: RunPhase,
        stats: &RunStats,
        output_dir: std::path::PathBuf,
        duration_seconds: f64,
        transcode: Option<TranscodeReport>,
    ) -> Self {
        let snap = stats.snapshot();
        let files_per_second = if duration_seconds > 0.0 {
            snap.processed as f64 / duration_seconds
        } else {
            0.0
        };
        Self {
            phase,
            processed: snap.processed,
            duplicates_content: snap.duplicates_content,
            already_processed_source: snap.already_processed_source,
            errors: snap.errors,
            output_dir,
            duration_seconds,
            files_per_second,
            transcode,
        }
    }
}
