//! End-to-end extraction runs against synthetic caches

use std::path::{Path, PathBuf};

use acex_common::RunPhase;
use acex_core::{AudioCodec, CacheExtractor, Classification, RunConfig, TranscodeConfig};

fn base_config(root: &Path) -> RunConfig {
    let input = root.join("cache");
    let output = root.join("extracted");
    std::fs::create_dir_all(&input).unwrap();

    let mut cfg = RunConfig::new(input, output);
    cfg.workers = 2;
    cfg.classification = Classification::BySize;
    cfg.scan_index_db = false;
    cfg.processed_set_path = root.join("history.json");
    cfg
}

fn write_blob(cfg: &RunConfig, name: &str, bytes: &[u8]) -> PathBuf {
    let path = cfg.input_root.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn ogg_blob(prefix_len: usize, body_len: usize) -> Vec<u8> {
    let mut blob = vec![0xA5u8; prefix_len];
    blob.extend_from_slice(b"OggS");
    blob.extend_from_slice(&vec![0x42u8; body_len]);
    blob
}

fn emitted_files(cfg: &RunConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let audio = cfg.output_root.join("Audio");
    if !audio.is_dir() {
        return files;
    }
    for bucket in std::fs::read_dir(&audio).unwrap() {
        let bucket = bucket.unwrap();
        if !bucket.file_type().unwrap().is_dir() {
            continue;
        }
        for file in std::fs::read_dir(bucket.path()).unwrap() {
            files.push(file.unwrap().path());
        }
    }
    files.sort();
    files
}

#[cfg(unix)]
fn stub_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn ogg_behind_garbage_prefix_is_extracted_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());

    let blob = ogg_blob(100, 1944);
    assert_eq!(blob.len(), 2048);
    write_blob(&cfg, "blob_a", &blob);

    let report = CacheExtractor::new(cfg.clone()).run().await;

    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.processed, 1);
    assert_eq!(report.errors, 0);

    let files = emitted_files(&cfg);
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), &blob[100..]);
}

#[tokio::test]
async fn ogg_behind_id3_tag_wins_over_mp3() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());

    let mut blob = Vec::new();
    blob.extend_from_slice(b"ID3\x04\x00\x00\x00\x00\x00\x00");
    blob.extend_from_slice(&vec![0u8; 500]);
    blob.extend_from_slice(b"OggS");
    blob.extend_from_slice(&vec![0x22u8; 1000]);
    write_blob(&cfg, "blob_b", &blob);

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.processed, 1);

    let files = emitted_files(&cfg);
    let emitted = std::fs::read(&files[0]).unwrap();
    assert_eq!(emitted.len(), 1004);
    assert!(emitted.starts_with(b"OggS"));
}

#[tokio::test]
async fn gzip_wrapped_ogg_is_extracted() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());

    let mut inner = vec![0u8; 3];
    inner.extend_from_slice(b"OggS");
    inner.extend_from_slice(&vec![0x33u8; 3000]);

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&inner).unwrap();
    write_blob(&cfg, "blob_c", &encoder.finish().unwrap());

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.processed, 1);

    let files = emitted_files(&cfg);
    assert_eq!(std::fs::read(&files[0]).unwrap(), &inner[3..]);
}

#[tokio::test]
async fn duplicate_content_across_sources_emits_once() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());

    let blob = ogg_blob(0, 512);
    write_blob(&cfg, "first", &blob);
    write_blob(&cfg, "second", &blob);

    let report = CacheExtractor::new(cfg.clone()).run().await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.duplicates_content, 1);
    assert_eq!(emitted_files(&cfg).len(), 1);
}

#[tokio::test]
async fn second_run_skips_processed_sources() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());
    write_blob(&cfg, "blob_e", &ogg_blob(10, 256));

    let first = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(first.processed, 1);
    assert_eq!(first.already_processed_source, 0);
    let after_first = emitted_files(&cfg);

    let second = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(second.processed, 0);
    assert_eq!(second.already_processed_source, 1);
    assert_eq!(emitted_files(&cfg), after_first);
}

#[tokio::test]
async fn output_tree_inside_input_is_never_reingested() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cache");
    std::fs::create_dir_all(&input).unwrap();

    let mut cfg = RunConfig::new(&input, input.join("extracted"));
    cfg.workers = 2;
    cfg.classification = Classification::BySize;
    cfg.scan_index_db = false;
    cfg.processed_set_path = dir.path().join("history.json");

    write_blob(&cfg, "blob", &ogg_blob(5, 400));

    let first = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(first.processed, 1);

    // Fresh history: the source is seen again, but nothing emitted by the
    // first run is picked up as a source
    cfg.processed_set_path = dir.path().join("history2.json");
    let second = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(second.processed, 1);
    assert_eq!(second.duplicates_content, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn probe_failure_falls_back_to_first_duration_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.classification = Classification::ByDuration;
    cfg.ffprobe_path = Some(stub_tool(dir.path(), "ffprobe.sh", "exit 2"));

    write_blob(&cfg, "blob_f1", &ogg_blob(0, 600));
    write_blob(&cfg, "blob_f2", &ogg_blob(7, 900));

    let report = CacheExtractor::new(cfg.clone()).run().await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.errors, 0);

    let fallback = cfg.output_root.join("Audio").join("ultra_short_0-5s");
    let count = std::fs::read_dir(&fallback).unwrap().count();
    assert_eq!(count, 2);
}

#[cfg(unix)]
#[tokio::test]
async fn probe_duration_routes_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.classification = Classification::ByDuration;
    cfg.ffprobe_path = Some(stub_tool(dir.path(), "ffprobe.sh", "echo 42.0"));

    write_blob(&cfg, "blob", &ogg_blob(0, 300));

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.processed, 1);

    let bucket = cfg.output_root.join("Audio").join("medium_15-60s");
    assert_eq!(std::fs::read_dir(&bucket).unwrap().count(), 1);
}

#[tokio::test]
async fn every_emission_starts_with_an_audio_header() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());

    write_blob(&cfg, "ogg", &ogg_blob(50, 200));
    let mut mp3 = b"ID3".to_vec();
    mp3.extend_from_slice(&vec![0x01u8; 300]);
    write_blob(&cfg, "mp3", &mp3);
    write_blob(&cfg, "noise", &vec![0x07u8; 128]);

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.processed, 2);

    for file in emitted_files(&cfg) {
        let bytes = std::fs::read(&file).unwrap();
        let valid = bytes.starts_with(b"OggS")
            || bytes.starts_with(b"ID3")
            || (bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0);
        assert!(valid, "Emission without audio header: {}", file.display());
    }
}

#[tokio::test]
async fn cancelled_run_persists_history_and_reports_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());
    write_blob(&cfg, "blob", &ogg_blob(0, 100));

    let extractor = CacheExtractor::new(cfg.clone());
    extractor.cancel();
    let report = extractor.run().await;

    assert_eq!(report.phase, RunPhase::Cancelled);
    assert!(cfg.processed_set_path.exists());
}

#[tokio::test]
async fn unwritable_output_root_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"file, not dir").unwrap();

    let mut cfg = base_config(dir.path());
    cfg.output_root = blocker.join("out");

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.phase, RunPhase::Failed);
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn index_db_rows_are_extracted_and_remembered() {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::ConnectOptions;

    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.scan_index_db = true;
    let db_path = dir.path().join("index.db");
    cfg.index_db_path = Some(db_path.clone());

    // One inline audio row, one dangling row whose blob is gone
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
            .bind(vec![0x0au8, 0x01])
            .bind(Some(ogg_blob(0, 128)))
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query("INSERT INTO files (id, content) VALUES (?, NULL)")
            .bind(vec![0x0bu8, 0x02])
            .execute(&mut conn)
            .await
            .unwrap();
    }

    let first = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(first.processed, 1);
    assert_eq!(first.errors, 0);
    assert!(!cfg.output_root.join("db_temp").exists());

    // Index-row identity survives re-materialization across runs
    let second = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(second.processed, 0);
    assert_eq!(second.already_processed_source, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn transcode_mirrors_the_bucket_layout() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.transcode = Some(TranscodeConfig {
        codec: AudioCodec::Mp3,
        quality_hint: "192k".to_string(),
        workers: 2,
    });
    cfg.ffmpeg_path = Some(stub_tool(
        dir.path(),
        "ffmpeg.sh",
        "if [ \"$1\" = \"-version\" ]; then exit 0; fi\nfor out in \"$@\"; do :; done\necho data > \"$out\"",
    ));

    write_blob(&cfg, "blob", &ogg_blob(0, 700));

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.processed, 1);

    let transcode = report.transcode.expect("transcode report");
    assert_eq!(transcode.converted, 1);
    assert_eq!(transcode.failed, 0);

    let mirror = cfg
        .output_root
        .join("Audio_MP3")
        .join("ultra_small_0-50KB")
        .join("blob.mp3");
    assert!(mirror.exists());
}

#[tokio::test]
async fn missing_encoder_reports_zero_conversions_but_keeps_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.transcode = Some(TranscodeConfig {
        codec: AudioCodec::Flac,
        quality_hint: String::new(),
        workers: 1,
    });
    cfg.ffmpeg_path = Some(PathBuf::from("/nonexistent/ffmpeg"));

    write_blob(&cfg, "blob", &ogg_blob(0, 700));

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.processed, 1);

    let transcode = report.transcode.expect("transcode report");
    assert_eq!(transcode.converted, 0);
}

#[tokio::test]
async fn no_transcode_pass_when_nothing_was_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.transcode = Some(TranscodeConfig {
        codec: AudioCodec::Wav,
        quality_hint: String::new(),
        workers: 1,
    });
    write_blob(&cfg, "noise", &vec![0x07u8; 64]);

    let report = CacheExtractor::new(cfg.clone()).run().await;
    assert_eq!(report.processed, 0);
    assert!(report.transcode.is_none());
}
