//! Event types for the ACEX event system
//!
//! Provides the shared event definitions and the EventBus used to push
//! progress out of the extractor core to whatever host wraps it (CLI, GUI,
//! service). The bus is broadcast-based: slow subscribers never block the
//! worker pool.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of an extraction run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Scanning,
    Processing,
    Transcoding,
    Done,
    Cancelled,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Scanning => write!(f, "scanning"),
            RunPhase::Processing => write!(f, "processing"),
            RunPhase::Transcoding => write!(f, "transcoding"),
            RunPhase::Done => write!(f, "done"),
            RunPhase::Cancelled => write!(f, "cancelled"),
            RunPhase::Failed => write!(f, "failed"),
        }
    }
}

/// ACEX event types
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to an out-of-process host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtractorEvent {
    /// An extraction run started
    RunStarted {
        input_root: String,
        output_root: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The run moved to a new phase
    PhaseChanged {
        phase: RunPhase,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic progress update (rate-limited by the emitter, <= 10 Hz)
    Progress {
        phase: RunPhase,
        processed_so_far: u64,
        total: u64,
        elapsed_seconds: f64,
        items_per_second: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The run finished, in any terminal phase
    RunFinished {
        phase: RunPhase,
        processed: u64,
        errors: u64,
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ExtractorEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ExtractorEvent::RunStarted { .. } => "RunStarted",
            ExtractorEvent::PhaseChanged { .. } => "PhaseChanged",
            ExtractorEvent::Progress { .. } => "Progress",
            ExtractorEvent::RunFinished { .. } => "RunFinished",
        }
    }
}

/// Central event distribution bus
///
/// Backed by `tokio::sync::broadcast`, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExtractorEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ExtractorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ExtractorEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<ExtractorEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Progress events are advisory; it is fine for them to go nowhere.
    pub fn emit_lossy(&self, event: ExtractorEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for event, dropped");
        }
    }

    /// Channel capacity this bus was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
