//! Read-only pass over the client's SQLite index
//!
//! The index is a `files(id BLOB, content BLOB)` table. Rows with inline
//! content are materialized into `<output_root>/db_temp/<id_hex>`; rows
//! without are resolved against the on-disk blob store at
//! `<cache_root>/<first-two-hex-chars>/<id_hex>`. The database is never
//! written or locked for write.

use futures::TryStreamExt;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Row};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error_log::ErrorLog;
use crate::scanner::SourceLocator;
use crate::stats::RunStats;

/// Stream index-database rows into the work queue
///
/// Returns the number of locators yielded. Per-row failures are logged and
/// counted; they never abort the pass. A missing or unopenable database is
/// a soft skip.
#[allow(clippy::too_many_arguments)]
pub async fn scan_index_db(
    db_path: &Path,
    storage_root: &Path,
    db_temp_dir: &Path,
    tx: &mpsc::Sender<SourceLocator>,
    cancel: &CancellationToken,
    total: &Arc<AtomicU64>,
    stats: &RunStats,
    error_log: &ErrorLog,
) -> u64 {
    if !db_path.exists() {
        tracing::debug!(path = %db_path.display(), "No index database, skipping");
        return 0;
    }

    let mut conn = match SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .connect()
        .await
    {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(path = %db_path.display(), error = %e, "Cannot open index database");
            error_log.log("db_scan", &format!("Cannot open index database: {}", e));
            return 0;
        }
    };

    let mut yielded = 0u64;
    let mut rows = sqlx::query("SELECT id, content FROM files").fetch(&mut conn);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let row = match rows.try_next().await {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Index row read failed, stopping database pass");
                error_log.log("db_scan", &format!("Row read failed: {}", e));
                break;
            }
        };

        let id: Vec<u8> = match row.try_get(0) {
            Ok(id) => id,
            Err(e) => {
                error_log.log("db_scan", &format!("Bad id column: {}", e));
                continue;
            }
        };
        if id.is_empty() {
            continue;
        }
        let id_hex = hex_string(&id);

        let content: Option<Vec<u8>> = match row.try_get(1) {
            Ok(content) => content,
            Err(e) => {
                error_log.log("db_scan", &format!("Bad content column for {}: {}", id_hex, e));
                continue;
            }
        };

        let locator = match content {
            Some(bytes) => {
                match materialize(db_temp_dir, &id_hex, &bytes).await {
                    Ok(path) => SourceLocator::IndexRow { id_hex, path },
                    Err(e) => {
                        stats.bump_errors();
                        error_log.log(
                            "db_scan",
                            &format!("Materialize {} failed: {}", id_hex, e),
                        );
                        continue;
                    }
                }
            }
            None => {
                let resolved = resolve_storage_path(storage_root, &id_hex);
                if !resolved.exists() {
                    continue;
                }
                SourceLocator::IndexRow {
                    id_hex,
                    path: resolved,
                }
            }
        };

        total.fetch_add(1, Ordering::Relaxed);
        if tx.send(locator).await.is_err() {
            // Receivers are gone; the run is over
            break;
        }
        yielded += 1;
    }

    tracing::info!(count = yielded, "Index database pass complete");
    yielded
}

/// `<cache_root>/<first-two-hex-chars>/<id_hex>`
pub fn resolve_storage_path(storage_root: &Path, id_hex: &str) -> PathBuf {
    let subdir = &id_hex[..2.min(id_hex.len())];
    storage_root.join(subdir).join(id_hex)
}

async fn materialize(db_temp_dir: &Path, id_hex: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(db_temp_dir).await?;
    let path = db_temp_dir.join(id_hex);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encoding() {
        assert_eq!(hex_string(&[0x00, 0xff, 0x12]), "00ff12");
        assert_eq!(hex_string(&[]), "");
    }

    #[test]
    fn storage_path_uses_two_char_subdir() {
        let path = resolve_storage_path(Path::new("/cache"), "abcd1234");
        assert_eq!(path, PathBuf::from("/cache/ab/abcd1234"));
    }

    #[tokio::test]
    async fn missing_database_is_soft_skip() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let total = Arc::new(AtomicU64::new(0));
        let stats = RunStats::new();
        let error_log = ErrorLog::new(dir.path());

        let yielded = scan_index_db(
            &dir.path().join("missing.db"),
            dir.path(),
            &dir.path().join("db_temp"),
            &tx,
            &CancellationToken::new(),
            &total,
            &stats,
            &error_log,
        )
        .await;

        assert_eq!(yielded, 0);
        assert_eq!(stats.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn inline_rows_materialize_and_bare_rows_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");

        // Build a small index: one inline row, one storage-resolved row,
        // one dangling row
        {
            let mut conn = SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .connect()
                .await
                .unwrap();
            sqlx::query("CREATE TABLE files (id BLOB, content BLOB)")
                .execute(&mut conn)
                .await
                .unwrap();
            sqlx::query("INSERT INTO files (id, content) VALUES (?, ?)")
                .bind(vec![0xaau8, 0x01])
                .bind(Some(b"OggS-inline-bytes".to_vec()))
                .execute(&mut conn)
                .await
                .unwrap();
            sqlx::query("INSERT INTO files (id, content) VALUES (?, NULL)")
                .bind(vec![0xbbu8, 0x02])
                .execute(&mut conn)
                .await
                .unwrap();
            sqlx::query("INSERT INTO files (id, content) VALUES (?, NULL)")
                .bind(vec![0xccu8, 0x03])
                .execute(&mut conn)
                .await
                .unwrap();
        }

        // Storage blob for the bb02 row only
        let storage_root = dir.path().join("storage");
        std::fs::create_dir_all(storage_root.join("bb")).unwrap();
        std::fs::write(storage_root.join("bb").join("bb02"), b"blob").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let total = Arc::new(AtomicU64::new(0));
        let stats = RunStats::new();
        let error_log = ErrorLog::new(dir.path());

        let yielded = scan_index_db(
            &db_path,
            &storage_root,
            &dir.path().join("db_temp"),
            &tx,
            &CancellationToken::new(),
            &total,
            &stats,
            &error_log,
        )
        .await;
        drop(tx);

        assert_eq!(yielded, 2);
        assert_eq!(total.load(Ordering::Relaxed), 2);

        let mut seen = Vec::new();
        while let Some(locator) = rx.recv().await {
            match locator {
                SourceLocator::IndexRow { id_hex, path } => {
                    assert!(path.exists());
                    seen.push(id_hex);
                }
                other => panic!("Unexpected locator: {:?}", other),
            }
        }
        seen.sort();
        assert_eq!(seen, vec!["aa01", "bb02"]);

        // Inline row landed in db_temp with the payload bytes
        let temp = dir.path().join("db_temp").join("aa01");
        assert_eq!(std::fs::read(temp).unwrap(), b"OggS-inline-bytes");
    }
}
