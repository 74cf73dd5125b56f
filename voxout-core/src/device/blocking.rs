//! Synchronous device writer for platforms with a blocking (or queued) write call.
//!
//! ## Recovery rules
//!
//! | Primitive reports | Writer reaction |
//! |-------------------|-----------------|
//! | `Accepted(n)` | advance by `n`, keep writing |
//! | `Underrun` | mark "needs prepare", drop the rest of this submission |
//! | `Suspended` | `resume()` + `prepare()`, retry the same samples |
//! | `BadState` / `Failed` | log, report `FatalDeviceError` |
//!
//! A failed `prepare()` latches the writer: every later submission reports
//! `FatalDeviceError` until the sink is reconfigured.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{DeviceWriter, StreamParams, WriteOutcome};
use crate::error::Result;

/// How many resume/prepare cycles a single submission may go through.
const MAX_RESUME_ATTEMPTS: usize = 8;

/// Tagged result of one call to the platform's blocking write primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceWrite {
    /// The device took this many samples from the front of the slice.
    Accepted(usize),
    /// The device ran dry before new samples arrived and stopped.
    Underrun,
    /// The device was suspended (e.g. system sleep) and must be resumed.
    Suspended,
    /// The stream is not in a state that accepts samples.
    BadState,
    /// Any other failure (device unplugged, permission revoked, ...).
    Failed(String),
}

/// Platform primitive behind [`BlockingWriter`].
pub trait BlockingDevice {
    /// The negotiated device rate.
    fn sample_rate(&self) -> u32;

    /// Make the stream ready to accept samples (after open or an underrun).
    fn prepare(&mut self) -> Result<()>;

    /// Write a prefix of `samples`, blocking until the device has room.
    fn write(&mut self, samples: &[i16]) -> DeviceWrite;

    /// Bring a suspended stream back.
    fn resume(&mut self) -> Result<()>;

    /// Wait until queued samples have been played, at most `timeout`.
    fn drain(&mut self, timeout: Duration);

    /// Release the device.
    fn close(&mut self);
}

pub struct BlockingWriter<D: BlockingDevice> {
    /// `None` once closed.
    device: Option<D>,
    params: StreamParams,
    needs_prepare: bool,
    faulted: bool,
}

impl<D: BlockingDevice> BlockingWriter<D> {
    pub fn new(device: D, params: StreamParams) -> Self {
        info!(
            requested_rate = params.sample_rate,
            device_rate = device.sample_rate(),
            capacity = params.capacity,
            "blocking output opened"
        );
        Self {
            device: Some(device),
            params,
            needs_prepare: true,
            faulted: false,
        }
    }

    /// Whether a failed prepare has latched this writer.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    fn fault(&mut self, context: &str, err: impl std::fmt::Display) -> WriteOutcome {
        error!("{context}: {err}");
        self.faulted = true;
        WriteOutcome::FatalDeviceError
    }
}

impl<D: BlockingDevice> DeviceWriter for BlockingWriter<D> {
    fn sample_rate(&self) -> u32 {
        self.device
            .as_ref()
            .map(BlockingDevice::sample_rate)
            .unwrap_or(self.params.sample_rate)
    }

    fn submit(&mut self, samples: &[i16]) -> WriteOutcome {
        if self.faulted {
            return WriteOutcome::FatalDeviceError;
        }
        let Some(device) = self.device.as_mut() else {
            return WriteOutcome::FatalDeviceError;
        };

        if self.needs_prepare {
            if let Err(e) = device.prepare() {
                return self.fault("can't prepare audio device", e);
            }
            self.needs_prepare = false;
        }

        let mut offset = 0;
        let mut resumes = 0;
        while offset < samples.len() {
            let remaining = samples.len() - offset;
            match device.write(&samples[offset..]) {
                DeviceWrite::Accepted(0) => {
                    error!(remaining, "audio device made no progress");
                    return WriteOutcome::FatalDeviceError;
                }
                DeviceWrite::Accepted(n) => {
                    offset += n.min(remaining);
                }
                DeviceWrite::Underrun => {
                    warn!(
                        dropped = remaining,
                        "audio device underrun, re-preparing on next submission"
                    );
                    self.needs_prepare = true;
                    return WriteOutcome::TransientUnderrun;
                }
                DeviceWrite::Suspended => {
                    resumes += 1;
                    if resumes > MAX_RESUME_ATTEMPTS {
                        error!("audio device keeps reporting suspended");
                        return WriteOutcome::FatalDeviceError;
                    }
                    debug!("audio device suspended, resuming");
                    if let Err(e) = device.resume() {
                        error!("can't resume audio device: {e}");
                        return WriteOutcome::FatalDeviceError;
                    }
                    if let Err(e) = device.prepare() {
                        return self.fault("can't prepare audio device after resume", e);
                    }
                }
                DeviceWrite::BadState => {
                    error!("PCM is not in the right state");
                    return WriteOutcome::FatalDeviceError;
                }
                DeviceWrite::Failed(reason) => {
                    error!("audio device write failed: {reason}");
                    return WriteOutcome::FatalDeviceError;
                }
            }
        }

        WriteOutcome::Ok
    }

    fn flush(&mut self) -> WriteOutcome {
        WriteOutcome::Ok
    }

    fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.drain(self.params.drain_timeout());
            device.close();
            info!("blocking output closed");
        }
    }
}

impl<D: BlockingDevice> Drop for BlockingWriter<D> {
    fn drop(&mut self) {
        self.close();
    }
}
