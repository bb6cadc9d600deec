//! Cache enumeration
//!
//! Produces the stream of candidate blob locators for one run: a filesystem
//! walk of the cache root plus (optionally) the client's SQLite index. The
//! stream feeds the bounded work queue directly, so enumeration blocks when
//! the workers fall behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::{normalize_path, RunConfig};
use crate::error_log::ErrorLog;
use crate::history;
use crate::index_db;
use crate::stats::RunStats;

/// Smallest blob worth looking at
const MIN_BLOB_LEN: u64 = 10;

/// Address of one candidate cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// A loose file found by the filesystem walk
    DiskPath(PathBuf),
    /// An index-database row, resolved to a readable file (either a
    /// materialized `db_temp` copy or the blob store entry)
    IndexRow { id_hex: String, path: PathBuf },
}

impl SourceLocator {
    /// Readable file holding the blob bytes
    pub fn path(&self) -> &Path {
        match self {
            SourceLocator::DiskPath(path) => path,
            SourceLocator::IndexRow { path, .. } => path,
        }
    }

    /// Cheap identity for the processed-source set
    ///
    /// Disk files key on path+size+mtime; index rows key on their id so a
    /// re-materialized temp copy is still recognized across runs.
    pub fn fingerprint(&self) -> String {
        match self {
            SourceLocator::DiskPath(path) => history::disk_fingerprint(path),
            SourceLocator::IndexRow { id_hex, .. } => history::index_row_fingerprint(id_hex),
        }
    }

    /// Basename used for the emitted output file
    pub fn basename(&self) -> String {
        match self {
            SourceLocator::DiskPath(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "blob".to_string()),
            SourceLocator::IndexRow { id_hex, .. } => id_hex.clone(),
        }
    }

    /// Human-readable source name for log lines
    pub fn describe(&self) -> String {
        self.path().display().to_string()
    }
}

/// Enumerates cache entries into the work queue
pub struct CacheScanner {
    input_root: PathBuf,
    output_root_normalized: PathBuf,
    scan_index_db: bool,
    index_db_path: PathBuf,
    db_temp_dir: PathBuf,
}

impl CacheScanner {
    pub fn new(cfg: &RunConfig) -> Self {
        Self {
            input_root: cfg.input_root.clone(),
            output_root_normalized: normalize_path(&cfg.output_root),
            scan_index_db: cfg.scan_index_db,
            index_db_path: cfg.index_db_path(),
            db_temp_dir: cfg.db_temp_dir(),
        }
    }

    /// Run the full enumeration, sending locators into `tx`
    ///
    /// Returns the number of candidates yielded. Consume once per run.
    pub async fn enumerate(
        self: Arc<Self>,
        tx: mpsc::Sender<SourceLocator>,
        cancel: CancellationToken,
        total: Arc<AtomicU64>,
        stats: Arc<RunStats>,
        error_log: Arc<ErrorLog>,
    ) -> u64 {
        let walk_count = {
            let scanner = self.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let total = total.clone();
            let handle = tokio::task::spawn_blocking(move || {
                scanner.walk_filesystem(&tx, &cancel, &total)
            });
            match handle.await {
                Ok(count) => count,
                Err(e) => {
                    tracing::error!(error = %e, "Filesystem walk task failed");
                    0
                }
            }
        };

        let db_count = if self.scan_index_db {
            index_db::scan_index_db(
                &self.index_db_path,
                &self.input_root,
                &self.db_temp_dir,
                &tx,
                &cancel,
                &total,
                &stats,
                &error_log,
            )
            .await
        } else {
            0
        };

        tracing::info!(
            filesystem = walk_count,
            index_db = db_count,
            "Enumeration complete"
        );
        walk_count + db_count
    }

    /// Depth-first walk of the cache root
    ///
    /// Skips the output tree, already-extracted `.ogg` artifacts, and blobs
    /// too small to carry a header. Unreadable entries are logged and
    /// skipped; the walk never aborts.
    fn walk_filesystem(
        &self,
        tx: &mpsc::Sender<SourceLocator>,
        cancel: &CancellationToken,
        total: &AtomicU64,
    ) -> u64 {
        let mut yielded = 0u64;

        let walker = WalkDir::new(&self.input_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_output_tree(entry.path()));

        for entry in walker {
            if cancel.is_cancelled() {
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Error accessing entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if name.ends_with(".ogg") {
                continue;
            }

            match entry.metadata() {
                Ok(meta) if meta.len() >= MIN_BLOB_LEN => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Cannot stat entry");
                    continue;
                }
            }

            total.fetch_add(1, Ordering::Relaxed);
            if tx
                .blocking_send(SourceLocator::DiskPath(entry.into_path()))
                .is_err()
            {
                break;
            }
            yielded += 1;
        }

        yielded
    }

    /// Is this path inside the output tree (which must never be re-ingested)?
    fn is_output_tree(&self, path: &Path) -> bool {
        normalize_path(path).starts_with(&self.output_root_normalized)
    }
}
