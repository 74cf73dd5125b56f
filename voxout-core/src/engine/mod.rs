//! `PlaybackEngine` owns an [`AudioSink`] on a dedicated blocking thread.
//!
//! ## Lifecycle
//!
//! ```text
//! PlaybackEngine::start(config, backend)   → sink configured, status = Idle
//!     ├─► speak(id, samples)               → queued; status = Playing while written
//!     ├─► reconfigure(rate, capacity)      → close + reopen when parameters change
//!     ├─► clear()                          → drop queued utterances, reopen device
//!     └─► stop()                           → sink flushed and cleared, status = Stopped
//! ```
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so the backend and the sink are
//! created *inside* the `spawn_blocking` closure and never cross a thread
//! boundary. Callers talk to the worker over a crossbeam channel, which also
//! serializes utterances from several callers. A sync oneshot channel carries
//! the configure result back to `start()`.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    config::SinkConfig,
    device::{DeviceBackend, WriteOutcome},
    diagnostics::{DiagnosticsSnapshot, SinkDiagnostics},
    error::{Result, SinkError},
    ipc::events::{PlaybackStatus, PlaybackStatusEvent, UtteranceEvent},
    sink::AudioSink,
};

/// Broadcast channel capacity for status and utterance events.
const BROADCAST_CAP: usize = 64;

/// Builds the device backend on the worker thread.
pub type BackendFactory = Box<dyn FnOnce() -> Box<dyn DeviceBackend> + Send + 'static>;

/// One block of finished PCM to play.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: String,
    pub samples: Vec<i16>,
}

enum PlaybackCommand {
    Speak {
        utterance: Utterance,
        generation: u64,
    },
    Configure {
        sample_rate: u32,
        capacity: usize,
        reply: std::sync::mpsc::Sender<Result<()>>,
    },
    Reopen,
    Shutdown,
}

/// Shared state the worker publishes into.
#[derive(Clone)]
struct Published {
    status: Arc<Mutex<PlaybackStatus>>,
    status_tx: broadcast::Sender<PlaybackStatusEvent>,
    utterance_tx: broadcast::Sender<UtteranceEvent>,
    seq: Arc<AtomicU64>,
}

impl Published {
    fn set_status(
        &self,
        status: PlaybackStatus,
        detail: Option<String>,
        diagnostics: Option<DiagnosticsSnapshot>,
    ) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(PlaybackStatusEvent {
            status,
            detail,
            diagnostics,
        });
    }
}

/// The top-level playback handle.
///
/// `PlaybackEngine` is `Send + Sync`; wrap it in `Arc` to share it between
/// tasks. All sink work happens on the worker thread.
pub struct PlaybackEngine {
    commands: Sender<PlaybackCommand>,
    running: Arc<AtomicBool>,
    /// Bumped by `clear()`; queued utterances from older generations are skipped.
    generation: Arc<AtomicU64>,
    published: Published,
    diagnostics: Arc<SinkDiagnostics>,
}

impl PlaybackEngine {
    /// Spawn the worker, build the backend there and configure the sink.
    ///
    /// Blocks until the device is open (or fails). Must be called from within
    /// a Tokio runtime.
    ///
    /// # Errors
    /// `SinkError::InvalidConfig` for a bad config, or the backend's open error.
    pub fn start(config: SinkConfig, backend: BackendFactory) -> Result<Self> {
        config.validate()?;
        let params = config.stream_params();

        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (utterance_tx, _) = broadcast::channel(BROADCAST_CAP);
        let published = Published {
            status: Arc::new(Mutex::new(PlaybackStatus::Idle)),
            status_tx,
            utterance_tx,
            seq: Arc::new(AtomicU64::new(0)),
        };
        let running = Arc::new(AtomicBool::new(true));
        let generation = Arc::new(AtomicU64::new(0));

        let worker_published = published.clone();
        let worker_running = Arc::clone(&running);
        let worker_generation = Arc::clone(&generation);

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<Arc<SinkDiagnostics>>>();

        tokio::task::spawn_blocking(move || {
            // ── Build backend + sink on THIS thread (cpal::Stream is !Send) ──
            let mut sink = AudioSink::new(backend());
            match sink.configure(params.sample_rate, params.capacity) {
                Ok(()) => {
                    let _ = open_tx.send(Ok(sink.diagnostics()));
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    worker_running.store(false, Ordering::SeqCst);
                    return;
                }
            }

            run_worker(
                &mut sink,
                command_rx,
                &worker_published,
                &worker_generation,
            );

            // Flush + release the device on this thread.
            sink.clear();
            worker_running.store(false, Ordering::SeqCst);
            worker_published.set_status(
                PlaybackStatus::Stopped,
                None,
                Some(sink.diagnostics_snapshot()),
            );
            info!("playback worker exited");
        });

        match open_rx.recv() {
            Ok(Ok(diagnostics)) => {
                published.set_status(PlaybackStatus::Idle, None, None);
                info!(
                    sample_rate = params.sample_rate,
                    capacity = params.capacity,
                    "playback engine started"
                );
                Ok(Self {
                    commands,
                    running,
                    generation,
                    published,
                    diagnostics,
                })
            }
            Ok(Err(e)) => {
                published.set_status(PlaybackStatus::Error, Some(e.to_string()), None);
                Err(e)
            }
            Err(_) => {
                published.set_status(
                    PlaybackStatus::Error,
                    Some("playback worker failed to start".into()),
                    None,
                );
                Err(SinkError::Other(anyhow::anyhow!(
                    "playback worker died unexpectedly"
                )))
            }
        }
    }

    /// Queue an utterance. Returns as soon as it is queued.
    ///
    /// # Errors
    /// `SinkError::NotRunning` after `stop()`.
    pub fn speak(&self, id: impl Into<String>, samples: Vec<i16>) -> Result<()> {
        self.send(PlaybackCommand::Speak {
            utterance: Utterance {
                id: id.into(),
                samples,
            },
            generation: self.generation.load(Ordering::SeqCst),
        })
    }

    /// Change rate/capacity. Waits for queued utterances ahead of it and for
    /// the device to reopen.
    pub fn reconfigure(&self, sample_rate: u32, capacity: usize) -> Result<()> {
        let (reply, reply_rx) = std::sync::mpsc::channel();
        self.send(PlaybackCommand::Configure {
            sample_rate,
            capacity,
            reply,
        })?;
        reply_rx.recv().map_err(|_| SinkError::NotRunning)?
    }

    /// Drop every queued utterance and reopen the device.
    ///
    /// The utterance currently being written still completes.
    pub fn clear(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.send(PlaybackCommand::Reopen)
    }

    /// Flush, release the device and end the worker.
    ///
    /// # Errors
    /// `SinkError::NotRunning` if already stopped.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SinkError::NotRunning);
        }
        info!("playback stop requested");
        self.send(PlaybackCommand::Shutdown)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> PlaybackStatus {
        *self.published.status.lock()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<PlaybackStatusEvent> {
        self.published.status_tx.subscribe()
    }

    pub fn subscribe_utterances(&self) -> broadcast::Receiver<UtteranceEvent> {
        self.published.utterance_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn send(&self, command: PlaybackCommand) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SinkError::NotRunning);
        }
        self.commands
            .send(command)
            .map_err(|_| SinkError::NotRunning)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.commands.send(PlaybackCommand::Shutdown);
        }
    }
}

fn run_worker(
    sink: &mut AudioSink,
    commands: Receiver<PlaybackCommand>,
    published: &Published,
    generation: &AtomicU64,
) {
    while let Ok(command) = commands.recv() {
        match command {
            PlaybackCommand::Speak {
                utterance,
                generation: queued_at,
            } => {
                if queued_at < generation.load(Ordering::SeqCst) {
                    debug!(id = %utterance.id, "skipping cleared utterance");
                    continue;
                }
                play_utterance(sink, utterance, published);
            }
            PlaybackCommand::Configure {
                sample_rate,
                capacity,
                reply,
            } => {
                let result = sink.configure(sample_rate, capacity);
                if let Err(e) = &result {
                    published.set_status(PlaybackStatus::Error, Some(e.to_string()), None);
                }
                let _ = reply.send(result);
            }
            PlaybackCommand::Reopen => {
                let (sample_rate, capacity) = (sink.sample_rate(), sink.capacity());
                sink.clear();
                if sample_rate > 0 {
                    if let Err(e) = sink.configure(sample_rate, capacity) {
                        error!("failed to reopen output after clear: {e}");
                        published.set_status(PlaybackStatus::Error, Some(e.to_string()), None);
                    }
                }
            }
            PlaybackCommand::Shutdown => break,
        }
    }
}

fn play_utterance(sink: &mut AudioSink, utterance: Utterance, published: &Published) {
    let span = info_span!("utterance", id = %utterance.id, samples = utterance.samples.len());
    let _enter = span.enter();

    if !sink.is_configured() {
        warn!("sink unconfigured, utterance dropped");
    }

    published.set_status(PlaybackStatus::Playing, None, None);
    let outcome = sink
        .write_all(&utterance.samples)
        .worst(sink.flush());
    if outcome != WriteOutcome::Ok {
        warn!(?outcome, "utterance played with device errors");
    }

    let seq = published.seq.fetch_add(1, Ordering::Relaxed);
    let _ = published.utterance_tx.send(UtteranceEvent {
        seq,
        id: utterance.id,
        samples: utterance.samples.len(),
        outcome,
    });
    published.set_status(PlaybackStatus::Idle, None, Some(sink.diagnostics_snapshot()));
}
