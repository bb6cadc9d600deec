//! # ACEX Common Library
//!
//! Shared code for the ACEX audio cache extractor:
//! - Error types
//! - Event types (ExtractorEvent enum) and the EventBus
//! - Configuration loading (TOML + compiled defaults)
//! - Time formatting utilities

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, ExtractorEvent, RunPhase};
