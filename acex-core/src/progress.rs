//! Rate-limited progress emission
//!
//! Workers report progress after every item; the emitter throttles what
//! actually reaches the event bus to at most 10 Hz. The throttle state sits
//! behind a try-lock so a worker never waits on another worker's emit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use acex_common::{EventBus, ExtractorEvent, RunPhase};

use crate::stats::RunStats;

/// Minimum spacing between progress events (10 Hz)
const MIN_EMIT_INTERVAL: Duration = Duration::from_millis(100);

pub struct ProgressEmitter {
    bus: EventBus,
    stats: Arc<RunStats>,
    total: Arc<AtomicU64>,
    last_emit: Mutex<Instant>,
}

impl ProgressEmitter {
    pub fn new(bus: EventBus, stats: Arc<RunStats>, total: Arc<AtomicU64>) -> Self {
        Self {
            bus,
            stats,
            total,
            last_emit: Mutex::new(
                Instant::now()
                    .checked_sub(MIN_EMIT_INTERVAL)
                    .unwrap_or_else(Instant::now),
            ),
        }
    }

    /// Emit a progress event if the throttle window has passed
    ///
    /// Returns whether an event was actually sent. Contention on the
    /// throttle lock counts as throttled.
    pub fn maybe_emit(&self, phase: RunPhase) -> bool {
        self.maybe_emit_counts(
            phase,
            self.stats.items_done(),
            self.total.load(Ordering::Relaxed),
        )
    }

    /// Throttled emit with caller-supplied counts (the transcode pass
    /// tracks its own totals)
    pub fn maybe_emit_counts(&self, phase: RunPhase, done: u64, total: u64) -> bool {
        let Ok(mut last) = self.last_emit.try_lock() else {
            return false;
        };
        if last.elapsed() < MIN_EMIT_INTERVAL {
            return false;
        }
        *last = Instant::now();
        drop(last);

        self.emit_counts(phase, done, total);
        true
    }

    /// Emit unconditionally (phase transitions, final snapshot)
    pub fn emit_now(&self, phase: RunPhase) {
        self.emit_counts(
            phase,
            self.stats.items_done(),
            self.total.load(Ordering::Relaxed),
        );
    }

    fn emit_counts(&self, phase: RunPhase, done: u64, total: u64) {
        let elapsed = self.stats.elapsed_seconds();
        let rate = if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        };

        self.bus.emit_lossy(ExtractorEvent::Progress {
            phase,
            processed_so_far: done,
            total,
            elapsed_seconds: elapsed,
            items_per_second: rate,
            timestamp: acex_common::time::now(),
        });
    }
}
