//! Event types broadcast by the playback engine.
//!
//! | Event | Receiver |
//! |-------|----------|
//! | `PlaybackStatusEvent` | `PlaybackEngine::subscribe_status` |
//! | `UtteranceEvent` | `PlaybackEngine::subscribe_utterances` |

use serde::{Deserialize, Serialize};

use crate::device::WriteOutcome;
use crate::diagnostics::DiagnosticsSnapshot;

// ---------------------------------------------------------------------------
// Utterance events
// ---------------------------------------------------------------------------

/// Emitted once an utterance has been written and flushed to the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Caller-supplied utterance id.
    pub id: String,
    /// Samples pushed into the sink for this utterance.
    pub samples: usize,
    /// Worst outcome seen while writing and flushing.
    pub outcome: WriteOutcome,
}

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatusEvent {
    pub status: PlaybackStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
    /// Sink counters at the time of the change.
    pub diagnostics: Option<DiagnosticsSnapshot>,
}

/// Current state of the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// Sink configured, nothing playing.
    Idle,
    /// Writing an utterance to the device.
    Playing,
    /// Engine shut down; the sink is cleared.
    Stopped,
    /// The sink could not be configured.
    Error,
}
