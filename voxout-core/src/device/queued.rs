//! Asynchronous double-buffer writer for callback-driven buffer queues.
//!
//! ## Slot cycle
//!
//! ```text
//! Owned-by-Producer ──enqueue──► Enqueued ──device──► Draining ──completion──► Owned-by-Producer
//! ```
//!
//! Two `Vec<i16>` slots alternate: the producer fills one while the device
//! drains the other. Ownership is moved, never shared: `enqueue` moves the
//! slot's `Vec` into the platform queue and the completion callback moves it
//! back over a channel before notifying the [`HandoffSignal`]. A slot that is
//! out on the device is `None` on this side, so the producer cannot touch it.
//!
//! The producer waits on the signal before every enqueue, which keeps at most
//! one buffer outstanding while the other slot is being filled.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::{DeviceWriter, StreamParams, WriteOutcome};
use crate::buffering::HandoffSignal;
use crate::error::Result;

/// Called on the backend's playback thread with each fully played buffer.
pub type CompletionFn = Box<dyn FnMut(Vec<i16>) + Send + 'static>;

/// An enqueue the platform refused. Carries the buffer back to its owner.
#[derive(Debug)]
pub struct Rejected {
    pub buffer: Vec<i16>,
    pub reason: String,
}

/// Platform primitive behind [`DoubleBufferWriter`].
pub trait BufferQueue {
    /// The negotiated device rate.
    fn sample_rate(&self) -> u32;

    /// Install the callback invoked after each enqueued buffer has played.
    fn register_completion(&mut self, on_complete: CompletionFn) -> Result<()>;

    /// Start playback.
    fn start(&mut self) -> Result<()>;

    /// Queue the first `len` samples of `buffer` for playback.
    ///
    /// The queue owns the buffer until it hands it to the completion callback.
    fn enqueue(&mut self, buffer: Vec<i16>, len: usize) -> std::result::Result<(), Rejected>;

    /// Stop playback. Buffers still queued are not completed.
    fn stop(&mut self);
}

pub struct DoubleBufferWriter<Q: BufferQueue> {
    /// `None` once closed.
    queue: Option<Q>,
    slots: [Option<Vec<i16>>; 2],
    /// Slot the producer is filling.
    active: usize,
    /// Next free sample in the active slot.
    write_index: usize,
    params: StreamParams,
    handoff: Arc<HandoffSignal>,
    returned: Receiver<Vec<i16>>,
}

impl<Q: BufferQueue> DoubleBufferWriter<Q> {
    /// Allocate both slots, wire the completion callback and start playback.
    ///
    /// # Errors
    /// Propagates callback registration or start failures. The queue and the
    /// slots are dropped before returning.
    pub fn open(mut queue: Q, params: StreamParams) -> Result<Self> {
        let capacity = params.capacity;
        let slots = [Some(vec![0i16; capacity]), Some(vec![0i16; capacity])];
        let handoff = Arc::new(HandoffSignal::new());

        // Two buffers exist in total, so two slots in the channel never block.
        let (return_tx, returned) = crossbeam_channel::bounded::<Vec<i16>>(2);
        queue.register_completion(completion_callback(return_tx, Arc::clone(&handoff)))?;
        queue.start()?;

        info!(
            requested_rate = params.sample_rate,
            device_rate = queue.sample_rate(),
            capacity,
            "double-buffer output opened"
        );

        Ok(Self {
            queue: Some(queue),
            slots,
            active: 0,
            write_index: 0,
            params,
            handoff,
            returned,
        })
    }

    /// Index of the slot currently being filled.
    pub fn active_slot(&self) -> usize {
        self.active
    }

    /// Samples waiting in the active slot.
    pub fn pending(&self) -> usize {
        self.write_index
    }

    /// Move buffers handed back by the completion callback into empty slots.
    fn reclaim(&mut self) {
        while let Ok(mut buffer) = self.returned.try_recv() {
            if buffer.len() != self.params.capacity {
                buffer.resize(self.params.capacity, 0);
            }
            match self.slots.iter_mut().find(|slot| slot.is_none()) {
                Some(slot) => *slot = Some(buffer),
                None => warn!("completion returned a buffer with no empty slot"),
            }
        }
    }

    /// Wait for the device to release the previous buffer, then hand over the
    /// first `len` samples of the active slot and switch slots.
    fn enqueue_active(&mut self, len: usize) -> WriteOutcome {
        if !self.handoff.wait() {
            error!("handoff signal closed while enqueueing");
            self.write_index = 0;
            return WriteOutcome::FatalDeviceError;
        }
        self.reclaim();

        let Some(queue) = self.queue.as_mut() else {
            return WriteOutcome::FatalDeviceError;
        };
        let Some(buffer) = self.slots[self.active].take() else {
            error!(slot = self.active, "active slot is still owned by the device");
            self.handoff.notify();
            return WriteOutcome::FatalDeviceError;
        };

        match queue.enqueue(buffer, len) {
            Ok(()) => {
                debug!(slot = self.active, len, "buffer enqueued");
                self.active ^= 1;
                self.write_index = 0;
                WriteOutcome::Ok
            }
            Err(Rejected { buffer, reason }) => {
                error!(slot = self.active, len, "enqueue rejected: {reason}");
                self.slots[self.active] = Some(buffer);
                self.write_index = 0;
                // No completion will arrive for this buffer.
                self.handoff.notify();
                WriteOutcome::FatalDeviceError
            }
        }
    }
}

fn completion_callback(return_tx: Sender<Vec<i16>>, handoff: Arc<HandoffSignal>) -> CompletionFn {
    Box::new(move |buffer| {
        // The return must land before the notify so the producer finds it.
        if return_tx.try_send(buffer).is_err() {
            warn!("writer gone, dropping returned buffer");
        }
        handoff.notify();
    })
}

impl<Q: BufferQueue> DeviceWriter for DoubleBufferWriter<Q> {
    fn sample_rate(&self) -> u32 {
        self.queue
            .as_ref()
            .map(BufferQueue::sample_rate)
            .unwrap_or(self.params.sample_rate)
    }

    fn submit(&mut self, samples: &[i16]) -> WriteOutcome {
        if self.queue.is_none() {
            return WriteOutcome::FatalDeviceError;
        }

        let capacity = self.params.capacity;
        let mut outcome = WriteOutcome::Ok;
        let mut rest = samples;
        while !rest.is_empty() {
            let Some(slot) = self.slots[self.active].as_mut() else {
                error!(slot = self.active, "producer has no buffer to fill");
                return WriteOutcome::FatalDeviceError;
            };
            let n = (capacity - self.write_index).min(rest.len());
            slot[self.write_index..self.write_index + n].copy_from_slice(&rest[..n]);
            self.write_index += n;
            rest = &rest[n..];

            if self.write_index == capacity {
                outcome = outcome.worst(self.enqueue_active(capacity));
            }
        }
        outcome
    }

    fn flush(&mut self) -> WriteOutcome {
        if self.queue.is_none() || self.write_index == 0 {
            return WriteOutcome::Ok;
        }
        let len = self.write_index;
        self.enqueue_active(len)
    }

    fn close(&mut self) {
        let Some(mut queue) = self.queue.take() else {
            return;
        };

        // Let the outstanding buffer play out before tearing the device down.
        let timeout = self.params.drain_timeout();
        if !self.handoff.wait_timeout(timeout) {
            warn!(?timeout, "outstanding buffer did not drain before close");
        }
        queue.stop();
        self.handoff.close();
        drop(queue);

        self.slots = [None, None];
        self.write_index = 0;
        info!("double-buffer output closed");
    }
}

impl<Q: BufferQueue> Drop for DoubleBufferWriter<Q> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wall-clock time the device needs for `len` samples at `sample_rate`.
pub fn play_time(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(len as f64 / sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use parking_lot::Mutex;

    /// Queue that completes every buffer synchronously inside `enqueue`.
    #[derive(Default)]
    struct InstantQueue {
        on_complete: Option<CompletionFn>,
        played: Arc<Mutex<Vec<Vec<i16>>>>,
        reject_next: bool,
        fail_start: bool,
        stopped: Arc<Mutex<bool>>,
    }

    impl BufferQueue for InstantQueue {
        fn sample_rate(&self) -> u32 {
            8_000
        }

        fn register_completion(&mut self, on_complete: CompletionFn) -> Result<()> {
            self.on_complete = Some(on_complete);
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(SinkError::AudioStream("player refused to start".into()));
            }
            Ok(())
        }

        fn enqueue(&mut self, buffer: Vec<i16>, len: usize) -> std::result::Result<(), Rejected> {
            if std::mem::take(&mut self.reject_next) {
                return Err(Rejected {
                    buffer,
                    reason: "queue full".into(),
                });
            }
            self.played.lock().push(buffer[..len].to_vec());
            if let Some(cb) = self.on_complete.as_mut() {
                cb(buffer);
            }
            Ok(())
        }

        fn stop(&mut self) {
            *self.stopped.lock() = true;
        }
    }

    #[test]
    fn full_slots_are_enqueued_and_alternate() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let queue = InstantQueue {
            played: Arc::clone(&played),
            ..Default::default()
        };
        let mut w = DoubleBufferWriter::open(queue, StreamParams::new(8_000, 3)).expect("open");

        assert_eq!(w.submit(&[1, 2, 3, 4, 5, 6, 7]), WriteOutcome::Ok);
        assert_eq!(w.active_slot(), 0);
        assert_eq!(w.pending(), 1);
        assert_eq!(*played.lock(), vec![vec![1, 2, 3], vec![4, 5, 6]]);

        assert_eq!(w.flush(), WriteOutcome::Ok);
        assert_eq!(played.lock().last(), Some(&vec![7]));
        assert_eq!(w.pending(), 0);
    }

    #[test]
    fn flush_without_pending_samples_enqueues_nothing() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let queue = InstantQueue {
            played: Arc::clone(&played),
            ..Default::default()
        };
        let mut w = DoubleBufferWriter::open(queue, StreamParams::new(8_000, 4)).expect("open");
        assert_eq!(w.flush(), WriteOutcome::Ok);
        assert!(played.lock().is_empty());
    }

    #[test]
    fn rejected_enqueue_keeps_buffer_and_rearms_signal() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let queue = InstantQueue {
            played: Arc::clone(&played),
            reject_next: true,
            ..Default::default()
        };
        let mut w = DoubleBufferWriter::open(queue, StreamParams::new(8_000, 2)).expect("open");

        assert_eq!(w.submit(&[1, 2]), WriteOutcome::FatalDeviceError);
        assert_eq!(w.active_slot(), 0);
        assert_eq!(w.submit(&[3, 4]), WriteOutcome::Ok);
        assert_eq!(*played.lock(), vec![vec![3, 4]]);
    }

    #[test]
    fn start_failure_is_reported() {
        let queue = InstantQueue {
            fail_start: true,
            ..Default::default()
        };
        let result = DoubleBufferWriter::open(queue, StreamParams::new(8_000, 2));
        assert!(matches!(result, Err(SinkError::AudioStream(_))));
    }

    #[test]
    fn close_stops_queue_once() {
        let stopped = Arc::new(Mutex::new(false));
        let queue = InstantQueue {
            stopped: Arc::clone(&stopped),
            ..Default::default()
        };
        let mut w = DoubleBufferWriter::open(queue, StreamParams::new(8_000, 2)).expect("open");
        w.close();
        assert!(*stopped.lock());
        w.close();
        assert_eq!(w.submit(&[1]), WriteOutcome::FatalDeviceError);
    }

    #[test]
    fn play_time_scales_with_rate() {
        assert_eq!(play_time(8_000, 8_000), Duration::from_secs(1));
        assert_eq!(play_time(10, 0), Duration::ZERO);
    }
}
