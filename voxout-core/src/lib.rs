//! # voxout-core
//!
//! Streaming 16-bit mono PCM output for speech playback.
//!
//! ## Architecture
//!
//! ```text
//! producer ─► AudioSink::write ─► StagingBuffer (capacity N)
//!                                      │ full / flush
//!                                      ▼
//!                           Box<dyn DeviceWriter>
//!                 ┌────────────────────┴────────────────────┐
//!        BlockingWriter<D: BlockingDevice>     DoubleBufferWriter<Q: BufferQueue>
//!          prepare / write / resume              slot A ⇄ slot B, HandoffSignal
//!                 │                                          │
//!                 └──────────── cpal output stream ──────────┘
//! ```
//!
//! `PlaybackEngine` wraps an `AudioSink` on a blocking worker thread and
//! broadcasts status and per-utterance events.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod sink;

// Convenience re-exports for downstream crates
pub use config::{OutputMode, SinkConfig};
pub use device::{
    BlockingBackend, DeviceBackend, DeviceWriter, NullDevice, NullQueue, QueuedBackend, StreamParams,
    WriteOutcome,
};
pub use diagnostics::DiagnosticsSnapshot;
pub use engine::{BackendFactory, PlaybackEngine, Utterance};
pub use error::SinkError;
pub use ipc::events::{PlaybackStatus, PlaybackStatusEvent, UtteranceEvent};
pub use sink::AudioSink;

#[cfg(feature = "audio-cpal")]
pub use device::CpalBackend;
