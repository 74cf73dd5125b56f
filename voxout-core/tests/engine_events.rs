mod common;

use std::time::Duration;

use common::{Call, RecordingBackend};
use tokio::sync::broadcast;
use voxout_core::{
    PlaybackEngine, PlaybackStatus, PlaybackStatusEvent, SinkConfig, SinkError, UtteranceEvent,
    WriteOutcome,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn config(sample_rate: u32, capacity: usize) -> SinkConfig {
    SinkConfig {
        sample_rate,
        buffer_capacity: capacity,
        ..SinkConfig::default()
    }
}

fn start(backend: &RecordingBackend, sample_rate: u32, capacity: usize) -> PlaybackEngine {
    PlaybackEngine::start(config(sample_rate, capacity), backend.factory()).expect("engine start")
}

async fn next_utterance(rx: &mut broadcast::Receiver<UtteranceEvent>) -> UtteranceEvent {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for utterance event")
        .expect("utterance channel closed unexpectedly")
}

async fn wait_for_status(
    rx: &mut broadcast::Receiver<PlaybackStatusEvent>,
    status: PlaybackStatus,
) -> PlaybackStatusEvent {
    loop {
        let ev = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for status event")
            .expect("status channel closed unexpectedly");
        if ev.status == status {
            return ev;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn spoken_utterance_is_written_and_flushed() {
    let backend = RecordingBackend::new();
    let engine = start(&backend, 8_000, 4);
    let mut utterances = engine.subscribe_utterances();

    engine.speak("hello", vec![1, 2, 3, 4, 5, 6]).expect("speak");
    let ev = next_utterance(&mut utterances).await;

    assert_eq!(ev.id, "hello");
    assert_eq!(ev.samples, 6);
    assert_eq!(ev.outcome, WriteOutcome::Ok);
    assert_eq!(backend.submissions(), vec![vec![1, 2, 3, 4], vec![5, 6]]);
    assert_eq!(engine.diagnostics_snapshot().samples_submitted, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_closes_the_device_and_rejects_further_work() {
    let backend = RecordingBackend::new();
    let engine = start(&backend, 8_000, 4);
    let mut status = engine.subscribe_status();

    engine.stop().expect("stop");
    let ev = wait_for_status(&mut status, PlaybackStatus::Stopped).await;

    assert!(ev.diagnostics.is_some());
    assert_eq!(engine.status(), PlaybackStatus::Stopped);
    assert!(!engine.is_running());
    assert!(matches!(engine.speak("late", vec![1]), Err(SinkError::NotRunning)));
    assert!(matches!(engine.stop(), Err(SinkError::NotRunning)));
    assert_eq!(backend.count(|c| *c == Call::Close), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_open_is_reported_from_start() {
    let backend = RecordingBackend::failing();
    let result = PlaybackEngine::start(config(8_000, 4), backend.factory());
    assert!(matches!(result, Err(SinkError::AudioDevice(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_is_rejected_before_opening() {
    let backend = RecordingBackend::new();
    let result = PlaybackEngine::start(config(8_000, 0), backend.factory());
    assert!(matches!(result, Err(SinkError::InvalidConfig(_))));
    assert!(backend.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn reconfigure_reopens_only_on_change() {
    let backend = RecordingBackend::new();
    let engine = start(&backend, 8_000, 4);

    engine.reconfigure(8_000, 4).expect("same params");
    assert_eq!(backend.count(|c| matches!(c, Call::Open { .. })), 1);

    engine.reconfigure(16_000, 8).expect("new params");
    assert_eq!(
        backend.calls()[1..],
        [
            Call::Close,
            Call::Open {
                sample_rate: 16_000,
                capacity: 8
            }
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_drops_utterances_queued_before_it() {
    let backend = RecordingBackend::slow(Duration::from_millis(40));
    let engine = start(&backend, 8_000, 4);
    let mut utterances = engine.subscribe_utterances();

    engine.speak("first", vec![1; 8]).expect("speak");
    engine.speak("second", vec![2; 8]).expect("speak");
    engine.speak("third", vec![3; 8]).expect("speak");
    engine.clear().expect("clear");
    engine.speak("after", vec![4; 4]).expect("speak");

    let mut seen = Vec::new();
    loop {
        let ev = next_utterance(&mut utterances).await;
        seen.push(ev.id.clone());
        if ev.id == "after" {
            break;
        }
    }

    assert!(!seen.iter().any(|id| id == "second" || id == "third"));
    assert_eq!(backend.submissions().last(), Some(&vec![4; 4]));
}
