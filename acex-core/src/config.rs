//! Run configuration for the extractor core
//!
//! A `RunConfig` is built once by the host, validated, and then referenced
//! read-only by every component for the duration of one run.

use acex_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How extracted payloads are routed into output buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Probe the decoded duration with an external tool and bucket by seconds
    ByDuration,
    /// Bucket by raw payload length in bytes
    BySize,
}

impl std::str::FromStr for Classification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "duration" | "by_duration" => Ok(Classification::ByDuration),
            "size" | "by_size" => Ok(Classification::BySize),
            other => Err(Error::InvalidInput(format!(
                "Unknown classification method: {}",
                other
            ))),
        }
    }
}

/// Target codec for the optional transcode pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    Wav,
    Flac,
    Aac,
    M4a,
}

impl AudioCodec {
    /// Directory suffix for the mirror tree: `Audio_<CODEC>`
    pub fn dir_suffix(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "MP3",
            AudioCodec::Wav => "WAV",
            AudioCodec::Flac => "FLAC",
            AudioCodec::Aac => "AAC",
            AudioCodec::M4a => "M4A",
        }
    }

    /// Output file extension
    pub fn extension(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Wav => "wav",
            AudioCodec::Flac => "flac",
            AudioCodec::Aac => "aac",
            AudioCodec::M4a => "m4a",
        }
    }

    /// Encoder arguments appended after `-i <in> -y -loglevel error`
    pub fn encoder_args(&self) -> &'static [&'static str] {
        match self {
            AudioCodec::Mp3 => &["-codec:a", "libmp3lame", "-b:a", "192k"],
            AudioCodec::Wav => &["-codec:a", "pcm_s16le"],
            AudioCodec::Flac => &["-codec:a", "flac"],
            AudioCodec::Aac => &["-codec:a", "aac", "-b:a", "128k"],
            AudioCodec::M4a => &["-codec:a", "aac", "-b:a", "128k"],
        }
    }
}

impl std::str::FromStr for AudioCodec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioCodec::Mp3),
            "wav" => Ok(AudioCodec::Wav),
            "flac" => Ok(AudioCodec::Flac),
            "aac" => Ok(AudioCodec::Aac),
            "m4a" => Ok(AudioCodec::M4a),
            other => Err(Error::InvalidInput(format!("Unknown codec: {}", other))),
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Settings for the optional transcode pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Output codec for the mirror tree
    pub codec: AudioCodec,
    /// Free-form hint recorded in the report (e.g. "192k"); the encoder args
    /// themselves come from the fixed per-codec table
    pub quality_hint: String,
    /// Encoder pool size
    pub workers: usize,
}

impl TranscodeConfig {
    pub fn new(codec: AudioCodec) -> Self {
        Self {
            codec,
            quality_hint: String::new(),
            workers: default_transcode_workers(),
        }
    }
}

/// Immutable configuration for one extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Absolute path to the cache root being scanned
    pub input_root: PathBuf,
    /// Absolute path to the output root; `<output_root>/Audio/<bucket>/` is
    /// the emission tree
    pub output_root: PathBuf,
    /// Worker pool size
    pub workers: usize,
    /// Bucket routing method
    pub classification: Classification,
    /// Include the client's SQLite index in enumeration
    pub scan_index_db: bool,
    /// Optional transcode pass over the emitted tree
    pub transcode: Option<TranscodeConfig>,
    /// Persisted processed-source set location
    pub processed_set_path: PathBuf,
    /// Explicit index database location; defaults to the conventional sibling
    /// of `input_root`
    pub index_db_path: Option<PathBuf>,
    /// Duration probe binary; defaults to `ffprobe` on PATH
    pub ffprobe_path: Option<PathBuf>,
    /// Encoder binary; defaults to `ffmpeg` on PATH
    pub ffmpeg_path: Option<PathBuf>,
}

impl RunConfig {
    /// Build a config with defaults for everything but the two roots
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        let input_root = input_root.into();
        let output_root = output_root.into();
        Self {
            processed_set_path: output_root.join("extract_history.json"),
            input_root,
            output_root,
            workers: default_workers(),
            classification: Classification::ByDuration,
            scan_index_db: true,
            transcode: None,
            index_db_path: None,
            ffprobe_path: None,
            ffmpeg_path: None,
        }
    }

    /// Resolved index database path
    pub fn index_db_path(&self) -> PathBuf {
        self.index_db_path
            .clone()
            .unwrap_or_else(|| acex_common::config::default_index_db_path(&self.input_root))
    }

    /// Resolved duration probe program
    pub fn ffprobe_program(&self) -> PathBuf {
        self.ffprobe_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffprobe"))
    }

    /// Resolved encoder program
    pub fn ffmpeg_program(&self) -> PathBuf {
        self.ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }

    /// `<output_root>/Audio`
    pub fn audio_dir(&self) -> PathBuf {
        self.output_root.join("Audio")
    }

    /// `<output_root>/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.output_root.join("logs")
    }

    /// `<output_root>/db_temp`
    pub fn db_temp_dir(&self) -> PathBuf {
        self.output_root.join("db_temp")
    }

    /// Validate that the config describes a runnable extraction
    pub fn validate(&self) -> Result<()> {
        if !self.input_root.is_dir() {
            return Err(Error::NotFound(format!(
                "Input root is not a directory: {}",
                self.input_root.display()
            )));
        }
        if self.workers == 0 {
            return Err(Error::InvalidInput("Worker count must be positive".into()));
        }
        if let Some(transcode) = &self.transcode {
            if transcode.workers == 0 {
                return Err(Error::InvalidInput(
                    "Transcode worker count must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Default extraction worker count: `min(32, 2 x hardware_concurrency)`
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 2).min(32)
}

/// Default transcode worker count: `hardware_concurrency`
pub fn default_transcode_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Paths are compared component-wise so that `a/b/../b` style differences do
/// not defeat the output-tree exclusion check.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
