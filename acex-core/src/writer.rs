//! Atomic payload emission
//!
//! Two-phase write: the payload first lands in a uniquely-named temp file at
//! the output root, gets classified there, then moves into its bucket with a
//! rename. A reader of the target path either sees the complete file or no
//! file; a failed emission leaves no temp file behind.

use rand::Rng;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::classifier::{Bucket, Classifier};
use crate::extract::{is_valid_header, AudioPayload};

/// Writer errors
#[derive(Debug, Error)]
pub enum WriteError {
    /// Payload does not begin with a recognized audio header
    #[error("Payload has no valid audio header")]
    InvalidHeader,

    /// Temp-phase write failed
    #[error("Temp write failed: {0}")]
    TempWrite(std::io::Error),

    /// Final rename (and its copy fallback) failed
    #[error("Rename to {target} failed: {source}")]
    Rename {
        target: PathBuf,
        source: std::io::Error,
    },
}

/// Writes classified payloads into the output tree
pub struct AudioWriter {
    output_root: PathBuf,
    audio_dir: PathBuf,
    run_ts: String,
    classifier: Classifier,
}

impl AudioWriter {
    pub fn new(output_root: PathBuf, run_ts: String, classifier: Classifier) -> Self {
        Self {
            audio_dir: output_root.join("Audio"),
            output_root,
            run_ts,
            classifier,
        }
    }

    /// Create the `Audio/<bucket>/` layout for the run's bucket set
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for name in Bucket::dir_names_for(self.classifier.method()) {
            std::fs::create_dir_all(self.audio_dir.join(name))?;
        }
        Ok(())
    }

    /// Emit one payload under `Audio/<bucket>/<source_basename>.ogg`
    ///
    /// Returns the final absolute path. Name collisions are disambiguated
    /// with the run timestamp, then with a random 4-char suffix.
    pub async fn emit(
        &self,
        source_basename: &str,
        payload: &AudioPayload,
    ) -> Result<PathBuf, WriteError> {
        if !is_valid_header(&payload.bytes) {
            return Err(WriteError::InvalidHeader);
        }

        let temp_path = self.output_root.join(format!(
            "temp_{}_{}_{}.ogg",
            source_basename,
            self.run_ts,
            rand4()
        ));

        if let Err(e) = write_flushed(&temp_path, &payload.bytes) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(WriteError::TempWrite(e));
        }

        let bucket = self
            .classifier
            .bucket_for(payload.len() as u64, &temp_path)
            .await;
        let bucket_dir = self.audio_dir.join(bucket.dir_name());

        let target = self.unique_target(&bucket_dir, source_basename);

        match move_into_place(&temp_path, &target) {
            Ok(()) => {
                tracing::debug!(
                    target = %target.display(),
                    bucket = bucket.dir_name(),
                    bytes = payload.len(),
                    "Payload emitted"
                );
                Ok(target)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(WriteError::Rename { target, source: e })
            }
        }
    }

    fn unique_target(&self, bucket_dir: &Path, basename: &str) -> PathBuf {
        let plain = bucket_dir.join(format!("{}.ogg", basename));
        if !plain.exists() {
            return plain;
        }
        let stamped = bucket_dir.join(format!("{}_{}.ogg", basename, self.run_ts));
        if !stamped.exists() {
            return stamped;
        }
        bucket_dir.join(format!("{}_{}_{}.ogg", basename, self.run_ts, rand4()))
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    pub fn run_ts(&self) -> &str {
        &self.run_ts
    }
}

fn write_flushed(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

/// Rename, falling back to copy+unlink when the rename crosses filesystems.
/// The copy lands in a `.part` file first so the target path itself still
/// appears all-or-nothing.
fn move_into_place(temp: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(temp, target) {
        Ok(()) => Ok(()),
        Err(_) => {
            let part = target.with_extension("ogg.part");
            std::fs::copy(temp, &part)?;
            std::fs::rename(&part, target).inspect_err(|_| {
                let _ = std::fs::remove_file(&part);
            })?;
            std::fs::remove_file(temp)?;
            Ok(())
        }
    }
}

/// Four random lowercase-alphanumeric characters
fn rand4() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
