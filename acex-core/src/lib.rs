//! # ACEX Core
//!
//! Extraction core for the ACEX audio cache extractor. Recovers embedded
//! Ogg Vorbis and MP3 payloads from a game client's opaque local cache,
//! de-duplicates them by content, classifies each recovered asset by
//! duration or size into a structured output tree, and optionally mirrors
//! the tree through an external transcoder.
//!
//! The core surface is deliberately small: build a [`RunConfig`], hand it to
//! a [`CacheExtractor`], call [`CacheExtractor::run`], and read the
//! [`RunReport`]. Progress arrives on the extractor's
//! [`EventBus`](acex_common::EventBus); [`CacheExtractor::cancel`] stops a
//! run cooperatively.

pub mod classifier;
pub mod config;
pub mod content_cache;
pub mod error_log;
pub mod extract;
pub mod history;
pub mod index_db;
pub mod pipeline;
pub mod progress;
pub mod scanner;
pub mod stats;
pub mod transcode;
pub mod writer;

pub use config::{AudioCodec, Classification, RunConfig, TranscodeConfig};
pub use pipeline::CacheExtractor;
pub use stats::{RunReport, TranscodeReport};
