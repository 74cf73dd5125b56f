//! Counters describing what the sink has pushed to the device.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct SinkDiagnostics {
    pub samples_written: AtomicUsize,
    pub samples_submitted: AtomicUsize,
    pub submissions: AtomicUsize,
    pub flushes: AtomicUsize,
    pub underruns: AtomicUsize,
    pub device_errors: AtomicUsize,
    pub opens: AtomicUsize,
    pub open_failures: AtomicUsize,
    pub closes: AtomicUsize,
}

impl SinkDiagnostics {
    pub fn reset(&self) {
        self.samples_written.store(0, Ordering::Relaxed);
        self.samples_submitted.store(0, Ordering::Relaxed);
        self.submissions.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.device_errors.store(0, Ordering::Relaxed);
        self.opens.store(0, Ordering::Relaxed);
        self.open_failures.store(0, Ordering::Relaxed);
        self.closes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_written: self.samples_written.load(Ordering::Relaxed),
            samples_submitted: self.samples_submitted.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize, by: usize) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_written: usize,
    pub samples_submitted: usize,
    pub submissions: usize,
    pub flushes: usize,
    pub underruns: usize,
    pub device_errors: usize,
    pub opens: usize,
    pub open_failures: usize,
    pub closes: usize,
}
