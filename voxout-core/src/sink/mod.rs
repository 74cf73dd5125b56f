//! `AudioSink`: the sample accumulator the synthesis engine pushes into.
//!
//! ## Lifecycle
//!
//! ```text
//! AudioSink::new(backend)           unconfigured, no device
//!     └─► configure(rate, cap)      device open, staging buffer allocated
//!         ├─► write(sample) ...     submits every `cap` samples
//!         ├─► flush()               submits the partial tail
//!         └─► clear() / drop        flush, close device, free buffer
//! ```
//!
//! Writing to an unconfigured sink is a no-op, so the producer's hot path
//! never has to check state. The sink is driven from one thread at a time;
//! every mutating method takes `&mut self`.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    buffering::StagingBuffer,
    config::validate_stream,
    device::{DeviceBackend, DeviceWriter, StreamParams, WriteOutcome},
    diagnostics::{DiagnosticsSnapshot, SinkDiagnostics},
    error::Result,
};

/// The configured half of the sink: everything that exists only while a
/// device is open.
struct OpenStream {
    params: StreamParams,
    staging: StagingBuffer,
    writer: Box<dyn DeviceWriter>,
}

pub struct AudioSink {
    backend: Box<dyn DeviceBackend>,
    stream: Option<OpenStream>,
    diagnostics: Arc<SinkDiagnostics>,
}

impl AudioSink {
    /// Create an unconfigured sink that opens devices through `backend`.
    pub fn new(backend: Box<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            stream: None,
            diagnostics: Arc::new(SinkDiagnostics::default()),
        }
    }

    /// Set rate and capacity, (re)opening the device when they change.
    ///
    /// Identical parameters on a configured sink are a no-op. Otherwise the
    /// current device is flushed and closed first; if either value is zero the
    /// sink is left unconfigured.
    ///
    /// # Errors
    /// `SinkError::InvalidConfig` when the parameters are out of range
    /// (checked before the backend is asked to open), or the backend's open
    /// error. The sink is unconfigured afterwards and later writes are no-ops.
    pub fn configure(&mut self, sample_rate: u32, capacity: usize) -> Result<()> {
        let params = StreamParams::new(sample_rate, capacity);
        if self.stream.as_ref().is_some_and(|s| s.params == params) {
            return Ok(());
        }

        self.clear();

        if sample_rate == 0 || capacity == 0 {
            debug!(sample_rate, capacity, "zero parameter, sink left unconfigured");
            return Ok(());
        }
        validate_stream(sample_rate, capacity)?;

        let writer = match self.backend.open(params) {
            Ok(w) => w,
            Err(e) => {
                SinkDiagnostics::bump(&self.diagnostics.open_failures, 1);
                error!(
                    backend = self.backend.name(),
                    sample_rate, capacity, "failed to open audio output: {e}"
                );
                return Err(e);
            }
        };

        SinkDiagnostics::bump(&self.diagnostics.opens, 1);
        let device_rate = writer.sample_rate();
        if device_rate != sample_rate {
            warn!(
                requested = sample_rate,
                device_rate, "device negotiated a different sample rate"
            );
        }
        info!(
            backend = self.backend.name(),
            sample_rate, capacity, "audio sink configured"
        );

        self.stream = Some(OpenStream {
            params,
            staging: StagingBuffer::new(capacity),
            writer,
        });
        Ok(())
    }

    /// Append one sample; submits the staging buffer when it fills.
    ///
    /// Blocks only when a full buffer is handed to a device that has no room.
    #[inline]
    pub fn write(&mut self, sample: i16) -> WriteOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return WriteOutcome::Ok;
        };
        SinkDiagnostics::bump(&self.diagnostics.samples_written, 1);
        if !stream.staging.push(sample) {
            return WriteOutcome::Ok;
        }
        submit(stream, &self.diagnostics)
    }

    /// Push every sample of `samples` in order. Returns the worst outcome.
    pub fn write_all(&mut self, samples: &[i16]) -> WriteOutcome {
        samples
            .iter()
            .fold(WriteOutcome::Ok, |acc, &s| acc.worst(self.write(s)))
    }

    /// Submit the partially filled staging buffer, then drain the writer's
    /// own partial state. No-op when unconfigured or empty.
    pub fn flush(&mut self) -> WriteOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return WriteOutcome::Ok;
        };
        if stream.staging.is_empty() {
            return WriteOutcome::Ok;
        }
        SinkDiagnostics::bump(&self.diagnostics.flushes, 1);
        let outcome = submit(stream, &self.diagnostics);
        let flushed = stream.writer.flush();
        record(&self.diagnostics, flushed);
        outcome.worst(flushed)
    }

    /// Flush, close the device and drop the staging buffer. Idempotent.
    pub fn clear(&mut self) {
        if self.stream.is_none() {
            return;
        }
        self.flush();
        if let Some(mut stream) = self.stream.take() {
            stream.writer.close();
            SinkDiagnostics::bump(&self.diagnostics.closes, 1);
            info!(
                backend = self.backend.name(),
                sample_rate = stream.params.sample_rate,
                "audio sink cleared"
            );
        }
    }

    pub fn is_configured(&self) -> bool {
        self.stream.is_some()
    }

    /// Configured sample rate, 0 when unconfigured.
    pub fn sample_rate(&self) -> u32 {
        self.stream.as_ref().map_or(0, |s| s.params.sample_rate)
    }

    /// Configured capacity, 0 when unconfigured.
    pub fn capacity(&self) -> usize {
        self.stream.as_ref().map_or(0, |s| s.params.capacity)
    }

    /// Rate the device actually runs at, if configured.
    pub fn device_sample_rate(&self) -> Option<u32> {
        self.stream.as_ref().map(|s| s.writer.sample_rate())
    }

    /// Samples waiting in the staging buffer.
    pub fn pending(&self) -> usize {
        self.stream.as_ref().map_or(0, |s| s.staging.len())
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn diagnostics(&self) -> Arc<SinkDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Hand the staging buffer's filled prefix to the writer and reset it.
fn submit(stream: &mut OpenStream, diagnostics: &SinkDiagnostics) -> WriteOutcome {
    let samples = stream.staging.take();
    SinkDiagnostics::bump(&diagnostics.submissions, 1);
    SinkDiagnostics::bump(&diagnostics.samples_submitted, samples.len());
    let outcome = stream.writer.submit(samples);
    record(diagnostics, outcome);
    outcome
}

fn record(diagnostics: &SinkDiagnostics, outcome: WriteOutcome) {
    match outcome {
        WriteOutcome::Ok => {}
        WriteOutcome::TransientUnderrun => SinkDiagnostics::bump(&diagnostics.underruns, 1),
        WriteOutcome::FatalDeviceError => SinkDiagnostics::bump(&diagnostics.device_errors, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BlockingBackend, NullDevice};
    use crate::error::SinkError;

    fn null_sink() -> AudioSink {
        AudioSink::new(Box::new(BlockingBackend::new("null", |p| {
            Ok(NullDevice::instant(p))
        })))
    }

    #[test]
    fn starts_unconfigured_and_ignores_writes() {
        let mut sink = null_sink();
        assert!(!sink.is_configured());
        assert_eq!(sink.write(5), WriteOutcome::Ok);
        assert_eq!(sink.flush(), WriteOutcome::Ok);
        assert_eq!(sink.diagnostics_snapshot(), DiagnosticsSnapshot::default());
    }

    #[test]
    fn zero_parameters_leave_sink_unconfigured() {
        let mut sink = null_sink();
        sink.configure(0, 128).expect("configure");
        assert!(!sink.is_configured());
        sink.configure(16_000, 0).expect("configure");
        assert!(!sink.is_configured());
    }

    #[test]
    fn counts_written_and_submitted_samples() {
        let mut sink = null_sink();
        sink.configure(16_000, 4).expect("configure");
        assert_eq!(sink.write_all(&[1, 2, 3, 4, 5, 6]), WriteOutcome::Ok);
        assert_eq!(sink.pending(), 2);
        sink.flush();

        let snap = sink.diagnostics_snapshot();
        assert_eq!(snap.samples_written, 6);
        assert_eq!(snap.samples_submitted, 6);
        assert_eq!(snap.submissions, 2);
        assert_eq!(snap.flushes, 1);
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn oversized_capacity_is_rejected_before_open() {
        let mut sink = null_sink();
        sink.configure(16_000, 4).expect("configure");

        let result = sink.configure(16_000, usize::MAX / 2);
        assert!(matches!(result, Err(SinkError::InvalidConfig(_))));
        assert!(!sink.is_configured());
        assert_eq!(sink.write(1), WriteOutcome::Ok);

        let snap = sink.diagnostics_snapshot();
        assert_eq!(snap.opens, 1);
        assert_eq!(snap.open_failures, 0);
        assert_eq!(snap.samples_written, 0);
    }

    #[test]
    fn clear_resets_accessors() {
        let mut sink = null_sink();
        sink.configure(22_050, 64).expect("configure");
        assert_eq!(sink.sample_rate(), 22_050);
        assert_eq!(sink.capacity(), 64);
        assert_eq!(sink.device_sample_rate(), Some(22_050));
        assert_eq!(sink.backend_name(), "null");

        sink.clear();
        sink.clear();
        assert_eq!(sink.sample_rate(), 0);
        assert_eq!(sink.capacity(), 0);
        assert_eq!(sink.device_sample_rate(), None);
        assert_eq!(sink.diagnostics_snapshot().closes, 1);
    }
}
