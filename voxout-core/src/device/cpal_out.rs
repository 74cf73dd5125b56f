//! cpal output bindings for both writer variants.
//!
//! # Threading
//!
//! The cpal data callback runs on an OS audio thread. It only pops samples
//! (ring buffer or owned queued buffers) and, for the double-buffer queue,
//! hands drained buffers to the completion callback.
//!
//! `cpal::Stream` is `!Send` on most platforms, so these devices must be
//! created and dropped on the same thread. The playback engine does this
//! by building the sink inside its blocking thread.
//!
//! # Underruns
//!
//! cpal pulls samples; when nothing is queued the callback plays silence and
//! counts the starved frames. That is the normal state between utterances,
//! so it is never reported as [`DeviceWrite::Underrun`].

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig, StreamError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::blocking::{BlockingDevice, BlockingWriter, DeviceWrite};
use super::queued::{BufferQueue, CompletionFn, DoubleBufferWriter, Rejected};
use super::{DeviceBackend, DeviceWriter, StreamParams};
use crate::buffering::{create_pcm_ring, Consumer, Observer, PcmConsumer, PcmProducer, Producer};
use crate::config::{OutputMode, SinkConfig};
use crate::error::{Result, SinkError};

/// Longest single wait on the ring. Stream faults do not signal the
/// condvar, so a blocked writer notices them on the next poll.
const SPACE_POLL: Duration = Duration::from_millis(20);

const FAULT_NONE: u8 = 0;
const FAULT_BACKEND: u8 = 1;
const FAULT_DEVICE_LOST: u8 = 2;

/// Opens cpal-backed writers in the configured [`OutputMode`].
#[derive(Debug, Clone)]
pub struct CpalBackend {
    mode: OutputMode,
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new(mode: OutputMode, device_name: Option<String>) -> Self {
        Self { mode, device_name }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(config.mode, config.device_name.clone())
    }
}

impl DeviceBackend for CpalBackend {
    fn name(&self) -> &str {
        match self.mode {
            OutputMode::Blocking => "cpal-blocking",
            OutputMode::DoubleBuffer => "cpal-double-buffer",
        }
    }

    fn open(&mut self, params: StreamParams) -> Result<Box<dyn DeviceWriter>> {
        let preferred = self.device_name.as_deref();
        match self.mode {
            OutputMode::Blocking => {
                let device = CpalBlockingDevice::open(preferred, params)?;
                Ok(Box::new(BlockingWriter::new(device, params)))
            }
            OutputMode::DoubleBuffer => {
                let queue = CpalBufferQueue::open(preferred, params)?;
                Ok(Box::new(DoubleBufferWriter::open(queue, params)?))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Device selection and format negotiation
// ---------------------------------------------------------------------------

struct Negotiated {
    device: cpal::Device,
    config: StreamConfig,
    format: SampleFormat,
}

/// Preferred name, then the host default, then the first output device.
fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    if let Some(preferred_name) = preferred {
        match host.output_devices() {
            Ok(mut devices) => {
                let found = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });
                if let Some(device) = found {
                    return Ok(device);
                }
                warn!(
                    "preferred output device '{}' not found, falling back",
                    preferred_name
                );
            }
            Err(e) => {
                warn!("failed to list output devices while resolving preference: {e}");
            }
        }
    }

    if let Some(default) = host.default_output_device() {
        return Ok(default);
    }

    let mut devices = host
        .output_devices()
        .map_err(|e| SinkError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(SinkError::NoOutputDevice)?;
    warn!("no default output device, falling back to first available output");
    Ok(fallback)
}

/// Ranking key for a supported config range; lower is better.
///
/// Rate distance first (samples are never resampled), then mono, then i16.
fn config_rank(
    channels: u16,
    min_rate: u32,
    max_rate: u32,
    format: SampleFormat,
    requested: u32,
) -> (u32, bool, bool) {
    let rate = nearest_rate(min_rate, max_rate, requested);
    (
        rate.abs_diff(requested),
        channels != 1,
        format != SampleFormat::I16,
    )
}

fn nearest_rate(min_rate: u32, max_rate: u32, requested: u32) -> u32 {
    requested.clamp(min_rate, max_rate.max(min_rate))
}

fn negotiate(preferred: Option<&str>, requested_rate: u32) -> Result<Negotiated> {
    let host = cpal::default_host();
    let device = select_device(&host, preferred)?;

    let ranges = device
        .supported_output_configs()
        .map_err(|e| SinkError::AudioDevice(e.to_string()))?;
    let best = ranges
        .filter(|r| matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .min_by_key(|r| {
            config_rank(
                r.channels(),
                r.min_sample_rate().0,
                r.max_sample_rate().0,
                r.sample_format(),
                requested_rate,
            )
        })
        .ok_or(SinkError::UnsupportedFormat {
            sample_rate: requested_rate,
        })?;

    let rate = nearest_rate(
        best.min_sample_rate().0,
        best.max_sample_rate().0,
        requested_rate,
    );
    let config = StreamConfig {
        channels: best.channels(),
        sample_rate: SampleRate(rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        requested_rate,
        rate,
        channels = config.channels,
        sample_format = ?best.sample_format(),
        "output format negotiated"
    );

    Ok(Negotiated {
        device,
        config,
        format: best.sample_format(),
    })
}

// ---------------------------------------------------------------------------
// Stream plumbing shared by both devices
// ---------------------------------------------------------------------------

/// Where the data callback pulls mono samples from.
trait PcmSource: Send + 'static {
    fn next_sample(&mut self) -> Option<i16>;

    /// Called once after each callback period.
    fn period_done(&mut self) {}
}

#[derive(Default)]
struct StreamState {
    fault: AtomicU8,
    starved_frames: AtomicUsize,
}

impl StreamState {
    fn fault(&self) -> u8 {
        self.fault.load(Ordering::Acquire)
    }
}

fn build_stream<S: PcmSource>(
    negotiated: &Negotiated,
    source: S,
    state: Arc<StreamState>,
) -> Result<Stream> {
    match negotiated.format {
        SampleFormat::I16 => build_typed_stream::<i16, S>(negotiated, source, state),
        SampleFormat::F32 => build_typed_stream::<f32, S>(negotiated, source, state),
        fmt => Err(SinkError::AudioStream(format!(
            "unsupported sample format: {fmt:?}"
        ))),
    }
}

fn build_typed_stream<T, S>(
    negotiated: &Negotiated,
    mut source: S,
    state: Arc<StreamState>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<i16>,
    S: PcmSource,
{
    let channels = negotiated.config.channels.max(1) as usize;
    let data_state = Arc::clone(&state);

    negotiated
        .device
        .build_output_stream(
            &negotiated.config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                let mut starved = 0usize;
                for frame in data.chunks_mut(channels) {
                    let sample = source.next_sample().unwrap_or_else(|| {
                        starved += 1;
                        0
                    });
                    frame.fill(T::from_sample(sample));
                }
                if starved > 0 {
                    data_state
                        .starved_frames
                        .fetch_add(starved, Ordering::Relaxed);
                }
                source.period_done();
            },
            move |err| match err {
                StreamError::DeviceNotAvailable => {
                    state.fault.store(FAULT_DEVICE_LOST, Ordering::Release);
                    error!("output device no longer available");
                }
                other => {
                    state.fault.store(FAULT_BACKEND, Ordering::Release);
                    error!("audio stream error: {other}");
                }
            },
            None,
        )
        .map_err(|e| SinkError::AudioStream(e.to_string()))
}

// ---------------------------------------------------------------------------
// Blocking device: ring buffer between writer and callback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RingSpace {
    lock: Mutex<()>,
    cond: Condvar,
}

impl RingSpace {
    /// Wait for a notify unless `ready` already holds. `ready` is checked
    /// under the lock the notifier takes, so a wakeup cannot slip in between.
    fn wait_until(&self, ready: impl Fn() -> bool, timeout: Duration) {
        let mut guard = self.lock.lock();
        if ready() {
            return;
        }
        self.cond.wait_for(&mut guard, timeout);
    }

    fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_one();
    }
}

struct RingSource {
    consumer: PcmConsumer,
    space: Arc<RingSpace>,
}

impl PcmSource for RingSource {
    fn next_sample(&mut self) -> Option<i16> {
        self.consumer.try_pop()
    }

    fn period_done(&mut self) {
        self.space.notify();
    }
}

/// Queued blocking writes: `write` pushes into a ring the callback drains and
/// waits while the ring is full.
pub struct CpalBlockingDevice {
    stream: Option<Stream>,
    producer: PcmProducer,
    space: Arc<RingSpace>,
    state: Arc<StreamState>,
    sample_rate: u32,
}

impl CpalBlockingDevice {
    /// Open and negotiate. The stream stays paused until `prepare`.
    pub fn open(preferred: Option<&str>, params: StreamParams) -> Result<Self> {
        let negotiated = negotiate(preferred, params.sample_rate)?;
        let (producer, consumer) = create_pcm_ring(params.capacity * 2);
        let space = Arc::new(RingSpace::default());
        let state = Arc::new(StreamState::default());

        let source = RingSource {
            consumer,
            space: Arc::clone(&space),
        };
        let stream = build_stream(&negotiated, source, Arc::clone(&state))?;
        // Some hosts start streams on creation.
        if let Err(e) = stream.pause() {
            debug!("pause after build not supported: {e}");
        }

        Ok(Self {
            stream: Some(stream),
            producer,
            space,
            state,
            sample_rate: negotiated.config.sample_rate.0,
        })
    }

    /// Frames played as silence because the ring was empty.
    pub fn starved_frames(&self) -> usize {
        self.state.starved_frames.load(Ordering::Relaxed)
    }

    /// Block until `ready` holds for the ring, a period ends, or the poll
    /// interval passes.
    fn wait_on_ring(&self, ready: impl Fn(&PcmProducer) -> bool) {
        self.space.wait_until(|| ready(&self.producer), SPACE_POLL);
    }

    fn play(&self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| SinkError::AudioStream("stream already closed".into()))?;
        stream
            .play()
            .map_err(|e| SinkError::AudioStream(e.to_string()))
    }
}

impl BlockingDevice for CpalBlockingDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn prepare(&mut self) -> Result<()> {
        self.play()
    }

    fn write(&mut self, samples: &[i16]) -> DeviceWrite {
        if samples.is_empty() {
            return DeviceWrite::Accepted(0);
        }
        loop {
            match self.state.fault() {
                FAULT_DEVICE_LOST => {
                    return DeviceWrite::Failed("output device no longer available".into())
                }
                FAULT_BACKEND => {
                    self.state.fault.store(FAULT_NONE, Ordering::Release);
                    return DeviceWrite::BadState;
                }
                _ => {}
            }
            let n = self.producer.push_slice(samples);
            if n > 0 {
                return DeviceWrite::Accepted(n);
            }
            self.wait_on_ring(|p| p.vacant_len() > 0);
        }
    }

    fn resume(&mut self) -> Result<()> {
        self.play()
    }

    fn drain(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.producer.occupied_len() > 0 {
            if Instant::now() >= deadline || self.state.fault() == FAULT_DEVICE_LOST {
                warn!(
                    left = self.producer.occupied_len(),
                    "output ring not drained before close"
                );
                return;
            }
            self.wait_on_ring(|p| p.occupied_len() == 0);
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("pause on close failed: {e}");
            }
            debug!(starved_frames = self.starved_frames(), "cpal blocking stream closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Buffer queue: owned buffers moved into the callback and back out
// ---------------------------------------------------------------------------

struct Playing {
    buffer: Vec<i16>,
    len: usize,
    pos: usize,
}

struct QueueSource {
    incoming: Receiver<(Vec<i16>, usize)>,
    current: Option<Playing>,
    on_complete: CompletionFn,
}

impl PcmSource for QueueSource {
    fn next_sample(&mut self) -> Option<i16> {
        loop {
            match self.current.as_mut() {
                Some(playing) if playing.pos < playing.len => {
                    let sample = playing.buffer[playing.pos];
                    playing.pos += 1;
                    return Some(sample);
                }
                Some(_) => {
                    if let Some(done) = self.current.take() {
                        (self.on_complete)(done.buffer);
                    }
                }
                None => match self.incoming.try_recv() {
                    Ok((buffer, len)) => {
                        let len = len.min(buffer.len());
                        self.current = Some(Playing {
                            buffer,
                            len,
                            pos: 0,
                        });
                    }
                    Err(_) => return None,
                },
            }
        }
    }
}

/// Callback-driven queue of owned buffers.
pub struct CpalBufferQueue {
    negotiated: Negotiated,
    stream: Option<Stream>,
    outgoing: Sender<(Vec<i16>, usize)>,
    /// Moved into the data callback by `register_completion`.
    incoming: Option<Receiver<(Vec<i16>, usize)>>,
    state: Arc<StreamState>,
}

impl CpalBufferQueue {
    pub fn open(preferred: Option<&str>, params: StreamParams) -> Result<Self> {
        let negotiated = negotiate(preferred, params.sample_rate)?;
        let (outgoing, incoming) = crossbeam_channel::bounded(2);
        debug!(capacity = params.capacity, "cpal buffer queue created");
        Ok(Self {
            negotiated,
            stream: None,
            outgoing,
            incoming: Some(incoming),
            state: Arc::new(StreamState::default()),
        })
    }

    pub fn starved_frames(&self) -> usize {
        self.state.starved_frames.load(Ordering::Relaxed)
    }
}

impl BufferQueue for CpalBufferQueue {
    fn sample_rate(&self) -> u32 {
        self.negotiated.config.sample_rate.0
    }

    fn register_completion(&mut self, on_complete: CompletionFn) -> Result<()> {
        let incoming = self
            .incoming
            .take()
            .ok_or_else(|| SinkError::AudioStream("completion callback already registered".into()))?;
        let source = QueueSource {
            incoming,
            current: None,
            on_complete,
        };
        self.stream = Some(build_stream(&self.negotiated, source, Arc::clone(&self.state))?);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| SinkError::AudioStream("no completion callback registered".into()))?;
        stream
            .play()
            .map_err(|e| SinkError::AudioStream(e.to_string()))
    }

    fn enqueue(&mut self, buffer: Vec<i16>, len: usize) -> std::result::Result<(), Rejected> {
        if self.state.fault() == FAULT_DEVICE_LOST {
            return Err(Rejected {
                buffer,
                reason: "output device no longer available".into(),
            });
        }
        self.outgoing.try_send((buffer, len)).map_err(|e| {
            let (buffer, _) = e.into_inner();
            Rejected {
                buffer,
                reason: "playback queue full".into(),
            }
        })
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("pause on stop failed: {e}");
            }
            debug!(starved_frames = self.starved_frames(), "cpal buffer queue stopped");
        }
    }
}
