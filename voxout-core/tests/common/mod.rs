//! Recording fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use voxout_core::device::{DeviceBackend, DeviceWriter, StreamParams, WriteOutcome};
use voxout_core::{AudioSink, BackendFactory, SinkError};

/// One interaction between the sink and its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open { sample_rate: u32, capacity: usize },
    Submit(Vec<i16>),
    Flush,
    Close,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Backend that records every open, submission and close.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub calls: CallLog,
    pub fail_open: bool,
    /// Time each submission blocks, like a device with a full queue.
    pub submit_delay: Duration,
    /// Outcomes handed out by successive submissions; `Ok` once empty.
    pub outcomes: Arc<Mutex<VecDeque<WriteOutcome>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn slow(submit_delay: Duration) -> Self {
        Self {
            submit_delay,
            ..Self::default()
        }
    }

    /// Backend whose writers answer submissions with `outcomes` in order.
    pub fn scripted(outcomes: impl IntoIterator<Item = WriteOutcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn sink(&self) -> AudioSink {
        AudioSink::new(Box::new(self.clone()))
    }

    /// Engine factory that hands a clone of this backend to the worker.
    pub fn factory(&self) -> BackendFactory {
        let backend = self.clone();
        Box::new(move || Box::new(backend) as Box<dyn DeviceBackend>)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn submissions(&self) -> Vec<Vec<i16>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Submit(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

impl DeviceBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&mut self, params: StreamParams) -> voxout_core::error::Result<Box<dyn DeviceWriter>> {
        self.calls.lock().push(Call::Open {
            sample_rate: params.sample_rate,
            capacity: params.capacity,
        });
        if self.fail_open {
            return Err(SinkError::AudioDevice("device busy".into()));
        }
        Ok(Box::new(RecordingWriter {
            calls: Arc::clone(&self.calls),
            sample_rate: params.sample_rate,
            submit_delay: self.submit_delay,
            outcomes: Arc::clone(&self.outcomes),
            closed: false,
        }))
    }
}

struct RecordingWriter {
    calls: CallLog,
    sample_rate: u32,
    submit_delay: Duration,
    outcomes: Arc<Mutex<VecDeque<WriteOutcome>>>,
    closed: bool,
}

impl DeviceWriter for RecordingWriter {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn submit(&mut self, samples: &[i16]) -> WriteOutcome {
        if !self.submit_delay.is_zero() {
            thread::sleep(self.submit_delay);
        }
        self.calls.lock().push(Call::Submit(samples.to_vec()));
        self.outcomes.lock().pop_front().unwrap_or(WriteOutcome::Ok)
    }

    fn flush(&mut self) -> WriteOutcome {
        self.calls.lock().push(Call::Flush);
        WriteOutcome::Ok
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.calls.lock().push(Call::Close);
        }
    }
}
