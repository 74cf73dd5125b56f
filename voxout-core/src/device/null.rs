//! Output primitives with no hardware behind them.
//!
//! `NullDevice` is a [`BlockingDevice`]; `NullQueue` is a [`BufferQueue`]
//! whose buffers are "played" on a background thread. Both are used by the
//! benchmark binary and on hosts without an output device. In paced mode they
//! consume samples no faster than `sample_rate`.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::debug;

use super::blocking::{BlockingDevice, DeviceWrite};
use super::queued::{play_time, BufferQueue, CompletionFn, Rejected};
use super::StreamParams;
use crate::error::{Result, SinkError};

pub struct NullDevice {
    sample_rate: u32,
    lead: Duration,
    paced: bool,
    started: Option<Instant>,
    consumed: u64,
}

impl NullDevice {
    /// A device that swallows samples as fast as they arrive.
    pub fn instant(params: StreamParams) -> Self {
        Self::new(params, false)
    }

    /// A device that consumes samples in real time.
    pub fn paced(params: StreamParams) -> Self {
        Self::new(params, true)
    }

    fn new(params: StreamParams, paced: bool) -> Self {
        Self {
            sample_rate: params.sample_rate,
            lead: params.buffer_duration(),
            paced,
            started: None,
            consumed: 0,
        }
    }

    /// Total samples accepted since open.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl BlockingDevice for NullDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn prepare(&mut self) -> Result<()> {
        self.started = Some(Instant::now());
        self.consumed = 0;
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> DeviceWrite {
        if self.paced {
            let start = *self.started.get_or_insert_with(Instant::now);
            let due = start + play_time(self.consumed as usize, self.sample_rate);
            let now = Instant::now();
            if due > now + self.lead {
                std::thread::sleep(due - now - self.lead);
            }
        }
        self.consumed += samples.len() as u64;
        DeviceWrite::Accepted(samples.len())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn drain(&mut self, timeout: Duration) {
        if !self.paced {
            return;
        }
        if let Some(start) = self.started {
            let end = start + play_time(self.consumed as usize, self.sample_rate);
            let wait = end.saturating_duration_since(Instant::now()).min(timeout);
            std::thread::sleep(wait);
        }
    }

    fn close(&mut self) {
        debug!(consumed = self.consumed, "null device closed");
    }
}

/// Buffer queue played by a background thread.
pub struct NullQueue {
    sample_rate: u32,
    paced: bool,
    on_complete: Option<CompletionFn>,
    jobs: Option<Sender<(Vec<i16>, usize)>>,
    stopping: Arc<AtomicBool>,
    played: Arc<AtomicU64>,
    player: Option<JoinHandle<()>>,
}

impl NullQueue {
    /// Completes each buffer as soon as the player thread sees it.
    pub fn instant(params: StreamParams) -> Self {
        Self::new(params, false)
    }

    /// Holds each buffer for its real play time before completing it.
    pub fn paced(params: StreamParams) -> Self {
        Self::new(params, true)
    }

    fn new(params: StreamParams, paced: bool) -> Self {
        Self {
            sample_rate: params.sample_rate,
            paced,
            on_complete: None,
            jobs: None,
            stopping: Arc::new(AtomicBool::new(false)),
            played: Arc::new(AtomicU64::new(0)),
            player: None,
        }
    }

    /// Total samples played since start.
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }
}

impl BufferQueue for NullQueue {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn register_completion(&mut self, on_complete: CompletionFn) -> Result<()> {
        self.on_complete = Some(on_complete);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let mut on_complete = self.on_complete.take().ok_or_else(|| {
            SinkError::AudioStream("no completion callback registered".into())
        })?;
        let (jobs, job_rx) = crossbeam_channel::unbounded::<(Vec<i16>, usize)>();
        let stopping = Arc::clone(&self.stopping);
        let played = Arc::clone(&self.played);
        let (paced, sample_rate) = (self.paced, self.sample_rate);

        let player = std::thread::Builder::new()
            .name("null-queue".into())
            .spawn(move || {
                while let Ok((buffer, len)) = job_rx.recv() {
                    if paced {
                        std::thread::sleep(play_time(len, sample_rate));
                    }
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    played.fetch_add(len as u64, Ordering::Relaxed);
                    on_complete(buffer);
                }
            })?;

        self.jobs = Some(jobs);
        self.player = Some(player);
        Ok(())
    }

    fn enqueue(&mut self, buffer: Vec<i16>, len: usize) -> std::result::Result<(), Rejected> {
        let Some(jobs) = self.jobs.as_ref() else {
            return Err(Rejected {
                buffer,
                reason: "queue not started".into(),
            });
        };
        jobs.send((buffer, len)).map_err(|e| Rejected {
            buffer: e.into_inner().0,
            reason: "player thread gone".into(),
        })
    }

    fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.jobs = None;
        if let Some(player) = self.player.take() {
            let _ = player.join();
        }
        debug!(played = self.played(), "null queue stopped");
    }
}

impl Drop for NullQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
