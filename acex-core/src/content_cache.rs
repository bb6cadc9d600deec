//! In-run content hash cache
//!
//! Detects byte-identical payloads arriving from distinct sources within a
//! single run. The check-and-insert is one critical section; a separate
//! contains-then-insert would let two workers emit the same audio.

use std::collections::HashSet;
use std::sync::Mutex;

/// Outcome of a content-hash insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    /// First sighting of this content; the caller owns the emission
    Inserted,
    /// Someone already emitted this content in this run
    Duplicate,
}

/// Set of payload MD5s seen this run
#[derive(Default)]
pub struct ContentHashCache {
    seen: Mutex<HashSet<String>>,
}

impl ContentHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert; first caller for a given hash wins
    pub fn insert(&self, content_md5: &str) -> ContentCheck {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.insert(content_md5.to_string()) {
            ContentCheck::Inserted
        } else {
            ContentCheck::Duplicate
        }
    }

    /// Number of distinct payloads seen
    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
