//! Output bucket classification
//!
//! Routes each payload into one of two closed bucket sets: by decoded
//! duration (probed with an external tool, never decoded in-process) or by
//! raw byte length. Probe failures are not data errors; they fall back to
//! the first duration bucket.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::Classification;

/// Probe subprocess budget; a wedged probe must not stall a worker
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Duration buckets, half-open ranges in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationBucket {
    UltraShort,
    Short,
    Medium,
    Long,
    UltraLong,
}

impl DurationBucket {
    /// Bucket for a duration in seconds; unknown (0.0) lands in the first
    /// bucket
    pub fn for_seconds(seconds: f64) -> Self {
        if seconds < 5.0 {
            DurationBucket::UltraShort
        } else if seconds < 15.0 {
            DurationBucket::Short
        } else if seconds < 60.0 {
            DurationBucket::Medium
        } else if seconds < 300.0 {
            DurationBucket::Long
        } else {
            DurationBucket::UltraLong
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            DurationBucket::UltraShort => "ultra_short_0-5s",
            DurationBucket::Short => "short_5-15s",
            DurationBucket::Medium => "medium_15-60s",
            DurationBucket::Long => "long_60-300s",
            DurationBucket::UltraLong => "ultra_long_300s+",
        }
    }

    pub const ALL: [DurationBucket; 5] = [
        DurationBucket::UltraShort,
        DurationBucket::Short,
        DurationBucket::Medium,
        DurationBucket::Long,
        DurationBucket::UltraLong,
    ];
}

/// Size buckets, half-open ranges in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBucket {
    UltraSmall,
    Small,
    Medium,
    Large,
    UltraLarge,
}

impl SizeBucket {
    pub fn for_len(len: u64) -> Self {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * 1024;
        if len < 50 * KB {
            SizeBucket::UltraSmall
        } else if len < 200 * KB {
            SizeBucket::Small
        } else if len < MB {
            SizeBucket::Medium
        } else if len < 5 * MB {
            SizeBucket::Large
        } else {
            SizeBucket::UltraLarge
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            SizeBucket::UltraSmall => "ultra_small_0-50KB",
            SizeBucket::Small => "small_50-200KB",
            SizeBucket::Medium => "medium_200KB-1MB",
            SizeBucket::Large => "large_1MB-5MB",
            SizeBucket::UltraLarge => "ultra_large_5MB+",
        }
    }

    pub const ALL: [SizeBucket; 5] = [
        SizeBucket::UltraSmall,
        SizeBucket::Small,
        SizeBucket::Medium,
        SizeBucket::Large,
        SizeBucket::UltraLarge,
    ];
}

/// A routing decision from either bucket set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Duration(DurationBucket),
    Size(SizeBucket),
}

impl Bucket {
    /// Output subdirectory name under `Audio/`
    pub fn dir_name(&self) -> &'static str {
        match self {
            Bucket::Duration(b) => b.dir_name(),
            Bucket::Size(b) => b.dir_name(),
        }
    }

    /// The directory names for whichever set the run classifies by
    pub fn dir_names_for(method: Classification) -> Vec<&'static str> {
        match method {
            Classification::ByDuration => {
                DurationBucket::ALL.iter().map(|b| b.dir_name()).collect()
            }
            Classification::BySize => SizeBucket::ALL.iter().map(|b| b.dir_name()).collect(),
        }
    }
}

/// External duration probe (`ffprobe` by default)
pub struct DurationProbe {
    program: PathBuf,
}

impl DurationProbe {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Probe the container duration of `path` in seconds
    ///
    /// Invokes `<probe> -v quiet -show_entries format=duration -of csv=p=0
    /// <path>` with a 5-second budget. Any failure (spawn error, non-zero
    /// exit, empty or unparseable stdout, timeout) yields 0.0, which the
    /// caller maps to the first duration bucket.
    pub async fn duration_seconds(&self, path: &Path) -> f64 {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("csv=p=0")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let result = tokio::time::timeout(PROBE_TIMEOUT, command.output()).await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match stdout.trim().parse::<f64>() {
                    Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => seconds,
                    _ => {
                        tracing::debug!(path = %path.display(), "Probe output unparseable, assuming zero duration");
                        0.0
                    }
                }
            }
            Ok(Ok(output)) => {
                tracing::debug!(
                    path = %path.display(),
                    code = ?output.status.code(),
                    "Probe exited non-zero, assuming zero duration"
                );
                0.0
            }
            Ok(Err(e)) => {
                tracing::debug!(path = %path.display(), error = %e, "Probe spawn failed, assuming zero duration");
                0.0
            }
            Err(_) => {
                tracing::debug!(path = %path.display(), "Probe timed out, assuming zero duration");
                0.0
            }
        }
    }
}

/// Maps payloads to output buckets
pub struct Classifier {
    method: Classification,
    probe: DurationProbe,
}

impl Classifier {
    pub fn new(method: Classification, probe_program: PathBuf) -> Self {
        Self {
            method,
            probe: DurationProbe::new(probe_program),
        }
    }

    /// Decide the bucket for a payload
    ///
    /// `temp_path` is the already-written temp file, handed to the probe in
    /// duration mode. Deterministic given the probe's answer.
    pub async fn bucket_for(&self, payload_len: u64, temp_path: &Path) -> Bucket {
        match self.method {
            Classification::BySize => Bucket::Size(SizeBucket::for_len(payload_len)),
            Classification::ByDuration => {
                let seconds = self.probe.duration_seconds(temp_path).await;
                Bucket::Duration(DurationBucket::for_seconds(seconds))
            }
        }
    }

    pub fn method(&self) -> Classification {
        self.method
    }
}
