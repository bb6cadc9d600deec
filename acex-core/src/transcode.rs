//! Post-extraction transcode pass
//!
//! Walks the emitted `Audio/` tree and mirrors it into `Audio_<CODEC>/`,
//! invoking the external encoder once per file with its own worker pool.
//! Originals are never touched; a mirror file that already exists is skipped
//! so the pass is re-runnable.

use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::{AudioCodec, RunConfig, TranscodeConfig};
use crate::error_log::ErrorLog;
use crate::progress::ProgressEmitter;
use crate::stats::{RunStats, TranscodeReport};

use acex_common::RunPhase;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Transcode stage errors
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Encoder binary is not runnable; the stage fails fast
    #[error("Encoder not available: {0}")]
    EncoderMissing(String),
}

#[derive(Debug)]
enum ConvertOutcome {
    Converted,
    Skipped,
    Failed(String),
}

/// Fans encoder invocations out over the emitted tree
pub struct Transcoder {
    program: PathBuf,
    codec: AudioCodec,
    workers: usize,
    audio_dir: PathBuf,
    converted_dir: PathBuf,
    stats: Arc<RunStats>,
    error_log: Arc<ErrorLog>,
    progress: Option<Arc<ProgressEmitter>>,
    cancel: CancellationToken,
}

impl Transcoder {
    pub fn new(
        cfg: &RunConfig,
        transcode: &TranscodeConfig,
        stats: Arc<RunStats>,
        error_log: Arc<ErrorLog>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            program: cfg.ffmpeg_program(),
            codec: transcode.codec,
            workers: transcode.workers.max(1),
            audio_dir: cfg.audio_dir(),
            converted_dir: cfg
                .output_root
                .join(format!("Audio_{}", transcode.codec.dir_suffix())),
            stats,
            error_log,
            progress: None,
            cancel,
        }
    }

    /// Report throttled progress on the given emitter during the pass
    pub fn with_progress(mut self, progress: Arc<ProgressEmitter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Is the encoder runnable?
    pub async fn is_available(&self) -> bool {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        matches!(command.status().await, Ok(status) if status.success())
    }

    /// Run the pass over every `.ogg` under `Audio/`
    pub async fn run(&self) -> Result<TranscodeReport, TranscodeError> {
        let started = Instant::now();
        let sources = self.collect_sources();

        tracing::info!(
            count = sources.len(),
            codec = %self.codec,
            workers = self.workers,
            "Starting transcode pass"
        );

        if !sources.is_empty() {
            if !self.is_available().await {
                return Err(TranscodeError::EncoderMissing(
                    self.program.display().to_string(),
                ));
            }
            let total = sources.len() as u64;
            self.convert_all(sources, total).await;
        }

        let snap = self.stats.snapshot();
        Ok(TranscodeReport {
            converted: snap.converted,
            failed: snap.failed,
            skipped_conversion: snap.skipped_conversion,
            output_dir: self.converted_dir.clone(),
            duration_seconds: started.elapsed().as_secs_f64(),
        })
    }

    fn collect_sources(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.audio_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("ogg"))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Bounded fan-out: keep `workers` encoder processes in flight
    async fn convert_all(&self, sources: Vec<PathBuf>, total: u64) {
        let mut tasks = FuturesUnordered::new();
        let mut source_iter = sources.into_iter();
        let mut done = 0u64;

        for _ in 0..self.workers {
            if let Some(source) = source_iter.next() {
                tasks.push(self.convert_one(source));
            }
        }

        while let Some((source, outcome)) = tasks.next().await {
            match outcome {
                ConvertOutcome::Converted => self.stats.bump_converted(),
                ConvertOutcome::Skipped => self.stats.bump_conversion_skipped(),
                ConvertOutcome::Failed(message) => {
                    self.stats.bump_conversion_failed();
                    self.error_log.log(&source.display().to_string(), &message);
                }
            }
            done += 1;
            if let Some(progress) = &self.progress {
                progress.maybe_emit_counts(RunPhase::Transcoding, done, total);
            }

            if self.cancel.is_cancelled() {
                continue; // drain in-flight encoders, spawn no more
            }
            if let Some(source) = source_iter.next() {
                tasks.push(self.convert_one(source));
            }
        }
    }

    async fn convert_one(&self, source: PathBuf) -> (PathBuf, ConvertOutcome) {
        let target = match self.mirror_path(&source) {
            Ok(target) => target,
            Err(message) => return (source, ConvertOutcome::Failed(message)),
        };

        if target.exists() {
            tracing::debug!(target = %target.display(), "Mirror file exists, skipping");
            return (source, ConvertOutcome::Skipped);
        }
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return (
                    source,
                    ConvertOutcome::Failed(format!("Cannot create mirror directory: {}", e)),
                );
            }
        }

        let mut command = tokio::process::Command::new(&self.program);
        command
            .arg("-i")
            .arg(&source)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .args(self.codec.encoder_args())
            .arg(&target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        match command.output().await {
            Ok(output) if output.status.success() => (source, ConvertOutcome::Converted),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                (
                    source,
                    ConvertOutcome::Failed(format!(
                        "Encoder exited {:?}: {}",
                        output.status.code(),
                        stderr
                    )),
                )
            }
            Err(e) => (
                source,
                ConvertOutcome::Failed(format!("Encoder spawn failed: {}", e)),
            ),
        }
    }

    /// `Audio/<bucket>/x.ogg` -> `Audio_<CODEC>/<bucket>/x.<ext>`
    fn mirror_path(&self, source: &Path) -> Result<PathBuf, String> {
        let relative = source
            .strip_prefix(&self.audio_dir)
            .map_err(|_| format!("Source outside audio tree: {}", source.display()))?;
        let mut target = self.converted_dir.join(relative);
        target.set_extension(self.codec.extension());
        Ok(target)
    }

    pub fn converted_dir(&self) -> &Path {
        &self.converted_dir
    }
}
