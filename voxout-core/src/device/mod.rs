//! Device writer abstraction.
//!
//! ```text
//! AudioSink ──submit──► Box<dyn DeviceWriter>
//!                           ├─ BlockingWriter<D: BlockingDevice>     (blocking / queued write)
//!                           └─ DoubleBufferWriter<Q: BufferQueue>    (callback-driven double buffer)
//! ```
//!
//! A [`DeviceBackend`] is the strategy injected into the sink: it knows how to
//! open a writer for a given [`StreamParams`]. Platform bindings only need to
//! implement the small primitive traits [`BlockingDevice`] or [`BufferQueue`];
//! the writers carry the buffering and recovery logic.

pub mod blocking;
pub mod enumerate;
pub mod null;
pub mod queued;

#[cfg(feature = "audio-cpal")]
pub mod cpal_out;

pub use blocking::{BlockingDevice, BlockingWriter, DeviceWrite};
pub use null::{NullDevice, NullQueue};
pub use queued::{BufferQueue, CompletionFn, DoubleBufferWriter, Rejected};

#[cfg(feature = "audio-cpal")]
pub use cpal_out::{CpalBackend, CpalBlockingDevice, CpalBufferQueue};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Extra time granted to a device to play out queued audio on close.
pub const DRAIN_SLACK: Duration = Duration::from_millis(250);

/// Parameters a writer is opened with. Fixed for the writer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamParams {
    /// Requested sample rate (Hz).
    pub sample_rate: u32,
    /// Buffer capacity in samples.
    pub capacity: usize,
}

impl StreamParams {
    pub fn new(sample_rate: u32, capacity: usize) -> Self {
        Self {
            sample_rate,
            capacity,
        }
    }

    /// Wall-clock length of one full buffer at the requested rate.
    pub fn buffer_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.capacity as f64 / self.sample_rate as f64)
    }

    /// Upper bound for waiting on queued audio when closing.
    pub fn drain_timeout(&self) -> Duration {
        self.buffer_duration() * 2 + DRAIN_SLACK
    }
}

/// Result of pushing samples at a device writer, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteOutcome {
    /// Every sample was accepted.
    Ok,
    /// The device underran; the rest of this submission was dropped and the
    /// device is re-prepared on the next submission.
    TransientUnderrun,
    /// The device is in a state that rejects audio. Later writes keep failing
    /// until the sink is reconfigured.
    FatalDeviceError,
}

impl WriteOutcome {
    pub fn is_ok(self) -> bool {
        self == WriteOutcome::Ok
    }

    /// The more severe of two outcomes.
    pub fn worst(self, other: WriteOutcome) -> WriteOutcome {
        std::cmp::max(self, other)
    }
}

/// An open output stream.
///
/// Writers are not required to be `Send`: several platform streams are bound
/// to the thread that created them.
pub trait DeviceWriter {
    /// The rate the device actually runs at (may differ from the request).
    fn sample_rate(&self) -> u32;

    /// Deliver `samples` in order. May block until the device has room.
    fn submit(&mut self, samples: &[i16]) -> WriteOutcome;

    /// Push any samples the writer holds internally.
    fn flush(&mut self) -> WriteOutcome;

    /// Release the device. Idempotent.
    fn close(&mut self);
}

/// Opens writers. Injected into [`AudioSink`](crate::sink::AudioSink).
pub trait DeviceBackend {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Open a writer for `params`.
    ///
    /// # Errors
    /// Any negotiation failure. Implementations must release everything they
    /// acquired before returning an error.
    fn open(&mut self, params: StreamParams) -> Result<Box<dyn DeviceWriter>>;
}

/// Backend that opens a [`BlockingDevice`] through a closure and wraps it in a
/// [`BlockingWriter`].
pub struct BlockingBackend<F> {
    name: String,
    open_device: F,
}

impl<F> BlockingBackend<F> {
    pub fn new<D>(name: impl Into<String>, open_device: F) -> Self
    where
        F: FnMut(StreamParams) -> Result<D>,
        D: BlockingDevice + 'static,
    {
        Self {
            name: name.into(),
            open_device,
        }
    }
}

impl<F, D> DeviceBackend for BlockingBackend<F>
where
    F: FnMut(StreamParams) -> Result<D>,
    D: BlockingDevice + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, params: StreamParams) -> Result<Box<dyn DeviceWriter>> {
        let device = (self.open_device)(params)?;
        Ok(Box::new(BlockingWriter::new(device, params)))
    }
}

/// Backend that opens a [`BufferQueue`] through a closure and wraps it in a
/// [`DoubleBufferWriter`].
pub struct QueuedBackend<F> {
    name: String,
    open_queue: F,
}

impl<F> QueuedBackend<F> {
    pub fn new<Q>(name: impl Into<String>, open_queue: F) -> Self
    where
        F: FnMut(StreamParams) -> Result<Q>,
        Q: BufferQueue + 'static,
    {
        Self {
            name: name.into(),
            open_queue,
        }
    }
}

impl<F, Q> DeviceBackend for QueuedBackend<F>
where
    F: FnMut(StreamParams) -> Result<Q>,
    Q: BufferQueue + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, params: StreamParams) -> Result<Box<dyn DeviceWriter>> {
        let queue = (self.open_queue)(params)?;
        Ok(Box::new(DoubleBufferWriter::open(queue, params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prefers_fatal() {
        use WriteOutcome::*;
        assert_eq!(Ok.worst(TransientUnderrun), TransientUnderrun);
        assert_eq!(TransientUnderrun.worst(Ok), TransientUnderrun);
        assert_eq!(TransientUnderrun.worst(FatalDeviceError), FatalDeviceError);
        assert_eq!(FatalDeviceError.worst(Ok), FatalDeviceError);
    }

    #[test]
    fn buffer_duration_matches_rate() {
        let params = StreamParams::new(48_000, 4_800);
        assert_eq!(params.buffer_duration().as_millis(), 100);
        assert_eq!(params.drain_timeout().as_millis(), 450);
        assert_eq!(StreamParams::new(0, 10).buffer_duration(), Duration::ZERO);
    }

    #[test]
    fn outcome_serializes_camel_case() {
        let json = serde_json::to_value(WriteOutcome::TransientUnderrun).expect("serialize");
        assert_eq!(json, "transientUnderrun");
    }
}
