//! Sample buffers shared by the accumulator and the device writers.
//!
//! - [`StagingBuffer`]: fixed-capacity producer-side accumulator.
//! - [`handoff::HandoffSignal`]: binary signal guarding double-buffer reuse.
//! - [`create_pcm_ring`]: lock-free SPSC ring feeding the cpal callback.

pub mod handoff;
pub mod staging;

pub use handoff::HandoffSignal;
pub use staging::StagingBuffer;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the writer thread.
pub type PcmProducer = ringbuf::HeapProd<i16>;

/// Consumer half, held by the audio callback.
pub type PcmConsumer = ringbuf::HeapCons<i16>;

/// Create a matched producer/consumer pair holding `capacity` samples.
///
/// A zero capacity is bumped to one sample so the ring is always usable.
pub fn create_pcm_ring(capacity: usize) -> (PcmProducer, PcmConsumer) {
    HeapRb::<i16>::new(capacity.max(1)).split()
}
