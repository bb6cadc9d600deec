//! Persistent processed-source set
//!
//! Keeps a cheap fingerprint for every source the extractor has already
//! handled, so repeat runs against a growing cache skip old entries without
//! re-reading them. Persisted as a JSON array of hex strings; load failures
//! degrade to an empty set, persist failures never roll back memory.

use md5::{Digest, Md5};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::UNIX_EPOCH;

/// Cheap identity of a cache entry on disk
///
/// Path, size and mtime identify a source without reading its content;
/// content identity is the job of [`crate::content_cache`]. If the file
/// cannot be stat'ed the fingerprint degrades to the path alone.
pub fn disk_fingerprint(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            md5_hex(format!("{}_{}_{}", path.display(), meta.len(), mtime).as_bytes())
        }
        Err(_) => md5_hex(path.display().to_string().as_bytes()),
    }
}

/// Identity of an index-database row, stable across materializations
pub fn index_row_fingerprint(id_hex: &str) -> String {
    md5_hex(id_hex.as_bytes())
}

fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

/// Thread-safe persistent set of source fingerprints
pub struct ExtractHistory {
    path: PathBuf,
    set: RwLock<HashSet<String>>,
}

impl ExtractHistory {
    /// Load the history from disk
    ///
    /// A missing or malformed file yields an empty history with a warning;
    /// it is never fatal.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let set = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(entries) => entries.into_iter().collect(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Malformed history file, starting empty");
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read history file, starting empty");
                HashSet::new()
            }
        };

        tracing::debug!(path = %path.display(), entries = set.len(), "History loaded");
        Self {
            path,
            set: RwLock::new(set),
        }
    }

    /// Has this source been handled by a previous (or the current) run?
    pub fn is_processed(&self, fingerprint: &str) -> bool {
        self.read_set().contains(fingerprint)
    }

    /// Record a source as handled; idempotent
    pub fn mark_processed(&self, fingerprint: &str) {
        self.write_set().insert(fingerprint.to_string());
    }

    /// Number of recorded fingerprints
    pub fn len(&self) -> usize {
        self.read_set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_set().is_empty()
    }

    /// Drop every recorded fingerprint (in memory only; call `persist` to
    /// make it stick)
    pub fn clear(&self) {
        self.write_set().clear();
    }

    /// Write the set to disk atomically (write-temp + rename)
    ///
    /// Failures are logged at warn level; in-memory state is untouched.
    pub fn persist(&self) {
        let snapshot: Vec<String> = {
            let guard = self.read_set();
            let mut entries: Vec<String> = guard.iter().cloned().collect();
            entries.sort();
            entries
        };

        if let Err(e) = self.write_snapshot(&snapshot) {
            tracing::warn!(path = %self.path.display(), error = %e, "History persist failed");
        } else {
            tracing::debug!(path = %self.path.display(), entries = snapshot.len(), "History persisted");
        }
    }

    fn write_snapshot(&self, snapshot: &[String]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(snapshot)?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_set(&self) -> std::sync::RwLockReadGuard<'_, HashSet<String>> {
        match self.set.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_set(&self) -> std::sync::RwLockWriteGuard<'_, HashSet<String>> {
        match self.set.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
