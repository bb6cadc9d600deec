//! Extraction pipeline orchestrator
//!
//! Owns every piece of shared state for one run and drives the phases:
//! Scanning -> Processing -> (Transcoding) -> Done | Cancelled | Failed.
//! The enumerator seeds a bounded work queue; a pool of workers pulls
//! locators and runs each through the fixed per-item sequence. Per-item
//! failures are counted and logged, never propagated; only a startup
//! failure (unwritable output root) fails the run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use acex_common::{EventBus, ExtractorEvent, RunPhase};

use crate::classifier::Classifier;
use crate::config::RunConfig;
use crate::content_cache::{ContentCheck, ContentHashCache};
use crate::error_log::ErrorLog;
use crate::extract;
use crate::history::ExtractHistory;
use crate::progress::ProgressEmitter;
use crate::scanner::{CacheScanner, SourceLocator};
use crate::stats::{RunReport, RunStats, TranscodeReport};
use crate::transcode::Transcoder;
use crate::writer::{AudioWriter, WriteError};

/// Queue pop budget; an empty, timed-out queue ends the worker
const QUEUE_POP_TIMEOUT: Duration = Duration::from_secs(5);

/// Work queue bound per worker; the enumerator blocks when it is full
const QUEUE_CAPACITY_PER_WORKER: usize = 8;

/// Event bus capacity for a run
const EVENT_BUS_CAPACITY: usize = 1024;

/// One-run extraction orchestrator
///
/// All shared state is owned here and handed to workers by reference; the
/// core takes no globals.
pub struct CacheExtractor {
    cfg: Arc<RunConfig>,
    bus: EventBus,
    cancel: CancellationToken,
}

impl CacheExtractor {
    pub fn new(cfg: RunConfig) -> Self {
        Self::with_event_bus(cfg, EventBus::new(EVENT_BUS_CAPACITY))
    }

    /// Share an externally-owned bus so the host can subscribe before the
    /// run starts
    pub fn with_event_bus(cfg: RunConfig, bus: EventBus) -> Self {
        Self {
            cfg: Arc::new(cfg),
            bus,
            cancel: CancellationToken::new(),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Request cooperative cancellation
    ///
    /// Workers stop between items; partial progress is persisted before the
    /// run reports `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the run to completion
    ///
    /// Always yields a report; infrastructure failures surface as the
    /// `Failed` phase rather than an error.
    pub async fn run(&self) -> RunReport {
        let stats = Arc::new(RunStats::new());

        self.bus.emit_lossy(ExtractorEvent::RunStarted {
            input_root: self.cfg.input_root.display().to_string(),
            output_root: self.cfg.output_root.display().to_string(),
            timestamp: acex_common::time::now(),
        });

        match self.execute(stats.clone()).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Run failed");
                self.finish_phase(RunPhase::Failed, &stats);
                RunReport::from_stats(
                    RunPhase::Failed,
                    &stats,
                    self.cfg.output_root.clone(),
                    stats.elapsed_seconds(),
                    None,
                )
            }
        }
    }

    async fn execute(&self, stats: Arc<RunStats>) -> acex_common::Result<RunReport> {
        let cfg = &self.cfg;
        cfg.validate()?;

        // Startup: the output layout must be writable or the run is dead
        std::fs::create_dir_all(&cfg.output_root)?;
        std::fs::create_dir_all(cfg.logs_dir())?;

        let run_ts = acex_common::time::run_timestamp();
        let classifier = Classifier::new(cfg.classification, cfg.ffprobe_program());
        let writer = AudioWriter::new(cfg.output_root.clone(), run_ts, classifier);
        writer.ensure_layout()?;

        // Progress reads the same enumeration total the scanner bumps
        let total = Arc::new(AtomicU64::new(0));
        let ctx = Arc::new(RunContext {
            cfg: cfg.clone(),
            stats: stats.clone(),
            total: total.clone(),
            history: ExtractHistory::load(&cfg.processed_set_path),
            content: ContentHashCache::new(),
            writer,
            error_log: Arc::new(ErrorLog::new(&cfg.logs_dir())),
            progress: Arc::new(ProgressEmitter::new(self.bus.clone(), stats.clone(), total)),
            cancel: self.cancel.clone(),
        });

        tracing::info!(
            input = %cfg.input_root.display(),
            output = %cfg.output_root.display(),
            workers = cfg.workers,
            classification = ?cfg.classification,
            "Starting extraction run"
        );

        self.change_phase(RunPhase::Scanning);

        let (tx, rx) = mpsc::channel::<SourceLocator>(cfg.workers * QUEUE_CAPACITY_PER_WORKER);
        let scanner = Arc::new(CacheScanner::new(cfg));
        let producer = tokio::spawn(scanner.enumerate(
            tx,
            self.cancel.clone(),
            ctx.total.clone(),
            stats.clone(),
            ctx.error_log.clone(),
        ));

        self.change_phase(RunPhase::Processing);

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = Vec::with_capacity(cfg.workers);
        for worker_id in 0..cfg.workers {
            let ctx = ctx.clone();
            let rx = rx.clone();
            workers.push(tokio::spawn(async move {
                ctx.worker_loop(worker_id, rx).await;
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task aborted");
            }
        }
        drop(rx);
        match producer.await {
            Ok(enumerated) => {
                tracing::debug!(enumerated, "Producer joined");
            }
            Err(e) => tracing::error!(error = %e, "Producer task aborted"),
        }

        // Single end-of-run persist; also the cancel path, so partial
        // progress survives
        ctx.history.persist();
        ctx.cleanup_db_temp().await;

        let transcode = if self.cancel.is_cancelled() {
            None
        } else {
            self.maybe_transcode(&ctx, &stats).await
        };

        let phase = if self.cancel.is_cancelled() {
            RunPhase::Cancelled
        } else {
            RunPhase::Done
        };
        ctx.progress.emit_now(phase);
        self.finish_phase(phase, &stats);

        let duration_seconds = stats.elapsed_seconds();
        let report = RunReport::from_stats(
            phase,
            &stats,
            cfg.output_root.clone(),
            duration_seconds,
            transcode,
        );
        tracing::info!(
            processed = report.processed,
            duplicates = report.duplicates_content,
            already_processed = report.already_processed_source,
            errors = report.errors,
            duration_seconds,
            "Extraction run finished"
        );
        Ok(report)
    }

    /// Transcode pass, only when configured and something was emitted
    async fn maybe_transcode(
        &self,
        ctx: &RunContext,
        stats: &Arc<RunStats>,
    ) -> Option<TranscodeReport> {
        let transcode_cfg = self.cfg.transcode.as_ref()?;
        if stats.processed.load(Ordering::Relaxed) == 0 {
            return None;
        }

        self.change_phase(RunPhase::Transcoding);

        let transcoder = Transcoder::new(
            &self.cfg,
            transcode_cfg,
            stats.clone(),
            ctx.error_log.clone(),
            self.cancel.clone(),
        )
        .with_progress(ctx.progress.clone());
        match transcoder.run().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Transcode stage failed");
                ctx.error_log.log("transcode", &e.to_string());
                Some(TranscodeReport {
                    converted: 0,
                    failed: 0,
                    skipped_conversion: 0,
                    output_dir: transcoder.converted_dir().to_path_buf(),
                    duration_seconds: 0.0,
                })
            }
        }
    }

    fn change_phase(&self, phase: RunPhase) {
        tracing::info!(phase = %phase, "Phase change");
        self.bus.emit_lossy(ExtractorEvent::PhaseChanged {
            phase,
            timestamp: acex_common::time::now(),
        });
    }

    fn finish_phase(&self, phase: RunPhase, stats: &RunStats) {
        self.change_phase(phase);
        let snap = stats.snapshot();
        self.bus.emit_lossy(ExtractorEvent::RunFinished {
            phase,
            processed: snap.processed,
            errors: snap.errors,
            duration_seconds: stats.elapsed_seconds(),
            timestamp: acex_common::time::now(),
        });
    }
}

/// Everything a worker needs, owned once per run
struct RunContext {
    cfg: Arc<RunConfig>,
    stats: Arc<RunStats>,
    total: Arc<AtomicU64>,
    history: ExtractHistory,
    content: ContentHashCache,
    writer: AudioWriter,
    error_log: Arc<ErrorLog>,
    progress: Arc<ProgressEmitter>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Worker loop: pop, process, report, repeat
    ///
    /// Exits on cancellation, on a closed-and-drained queue, or on a
    /// 5-second empty-queue timeout.
    async fn worker_loop(
        &self,
        worker_id: usize,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SourceLocator>>>,
    ) {
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(worker_id, "Worker exiting on cancellation");
                break;
            }

            let popped = tokio::time::timeout(QUEUE_POP_TIMEOUT, async {
                rx.lock().await.recv().await
            })
            .await;

            let locator = match popped {
                Ok(Some(locator)) => locator,
                Ok(None) => {
                    tracing::debug!(worker_id, "Queue drained, worker exiting");
                    break;
                }
                Err(_) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    tracing::debug!(worker_id, "Queue empty past timeout, worker exiting");
                    break;
                }
            };

            self.process_item(locator).await;
            self.progress.maybe_emit(RunPhase::Processing);
        }
    }

    /// The fixed per-item sequence: history check, locate, content check,
    /// emit. Nothing here escapes the worker.
    async fn process_item(&self, locator: SourceLocator) {
        let fingerprint = locator.fingerprint();
        if self.history.is_processed(&fingerprint) {
            self.stats.bump_already_processed();
            return;
        }

        let path = locator.path().to_path_buf();
        let located = tokio::task::spawn_blocking(move || {
            extract::locate_audio(&path).map(|payload| {
                let content_md5 = payload.content_md5();
                (payload, content_md5)
            })
        })
        .await;

        let (payload, content_md5) = match located {
            Ok(Some(found)) => found,
            Ok(None) => return, // not audio; silent skip
            Err(e) => {
                tracing::error!(source = %locator.describe(), error = %e, "Locator task aborted");
                self.stats.bump_errors();
                self.error_log
                    .log(&locator.describe(), &format!("Worker fault: {}", e));
                return;
            }
        };

        if self.content.insert(&content_md5) == ContentCheck::Duplicate {
            self.stats.bump_duplicates_content();
            return;
        }

        match self.writer.emit(&locator.basename(), &payload).await {
            Ok(target) => {
                self.stats.bump_processed();
                self.history.mark_processed(&fingerprint);
                tracing::debug!(
                    source = %locator.describe(),
                    target = %target.display(),
                    "Source extracted"
                );
            }
            Err(WriteError::InvalidHeader) => {
                // Content-level: the blob only looked like audio
            }
            Err(e) => {
                self.stats.bump_errors();
                self.error_log.log(&locator.describe(), &e.to_string());
            }
        }
    }

    /// Best-effort removal of materialized index rows
    async fn cleanup_db_temp(&self) {
        let db_temp = self.cfg.db_temp_dir();
        if db_temp.is_dir() {
            if let Err(e) = tokio::fs::remove_dir_all(&db_temp).await {
                tracing::debug!(path = %db_temp.display(), error = %e, "db_temp cleanup failed");
            }
        }
    }
}
