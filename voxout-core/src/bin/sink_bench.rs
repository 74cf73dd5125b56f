use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use serde::Serialize;
use voxout_core::device::enumerate::list_output_devices;
use voxout_core::{
    AudioSink, BlockingBackend, DiagnosticsSnapshot, NullDevice, NullQueue, OutputMode,
    QueuedBackend, StreamParams, WriteOutcome,
};

#[derive(Debug)]
struct Args {
    seconds: f64,
    sample_rate: u32,
    capacity: usize,
    paced: bool,
    list_devices: bool,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModeResult {
    mode: OutputMode,
    backend: String,
    samples: usize,
    utterances: usize,
    elapsed_ms: f64,
    samples_per_sec: f64,
    realtime_factor: f64,
    p50_utterance_ms: f64,
    p95_utterance_ms: f64,
    worst_outcome: WriteOutcome,
    diagnostics: DiagnosticsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    seconds: f64,
    sample_rate: u32,
    capacity: usize,
    paced: bool,
    modes: Vec<ModeResult>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("sink_bench failed: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        seconds: 5.0,
        sample_rate: 48_000,
        capacity: 6_000,
        paced: false,
        list_devices: false,
        output: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seconds" => {
                let v = it.next().context("missing value for --seconds")?;
                args.seconds = v
                    .parse::<f64>()
                    .context("invalid value for --seconds")?
                    .clamp(0.1, 600.0);
            }
            "--rate" => {
                let v = it.next().context("missing value for --rate")?;
                args.sample_rate = v.parse().context("invalid value for --rate")?;
            }
            "--capacity" => {
                let v = it.next().context("missing value for --capacity")?;
                args.capacity = v.parse().context("invalid value for --capacity")?;
            }
            "--paced" => args.paced = true,
            "--list-devices" => args.list_devices = true,
            "--output" => {
                let v = it.next().context("missing value for --output")?;
                args.output = Some(PathBuf::from(v));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p voxout-core --bin sink_bench -- \\
  [--seconds <s>] [--rate <hz>] [--capacity <samples>] [--paced] [--output <file.json>]
  --list-devices   print the ranked output devices as JSON and exit"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    if args.sample_rate == 0 || args.capacity == 0 {
        bail!("--rate and --capacity must be non-zero");
    }
    Ok(args)
}

/// A 440 Hz tone at a third of full scale.
fn tone(sample_rate: u32, len: usize) -> Vec<i16> {
    let step = 2.0 * std::f64::consts::PI * 440.0 / f64::from(sample_rate);
    (0..len)
        .map(|n| ((n as f64 * step).sin() * f64::from(i16::MAX) / 3.0) as i16)
        .collect()
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn open_sink(mode: OutputMode, paced: bool) -> AudioSink {
    match mode {
        OutputMode::Blocking => AudioSink::new(Box::new(BlockingBackend::new(
            "null-blocking",
            move |params: StreamParams| {
                Ok(if paced {
                    NullDevice::paced(params)
                } else {
                    NullDevice::instant(params)
                })
            },
        ))),
        OutputMode::DoubleBuffer => AudioSink::new(Box::new(QueuedBackend::new(
            "null-double-buffer",
            move |params: StreamParams| {
                Ok(if paced {
                    NullQueue::paced(params)
                } else {
                    NullQueue::instant(params)
                })
            },
        ))),
    }
}

fn bench_mode(mode: OutputMode, args: &Args, pcm: &[i16]) -> anyhow::Result<ModeResult> {
    let mut sink = open_sink(mode, args.paced);
    sink.configure(args.sample_rate, args.capacity)
        .with_context(|| format!("configure {mode:?} sink"))?;

    // One utterance per second of audio, flushed at each boundary.
    let utterance_len = args.sample_rate as usize;
    let mut latencies = Vec::new();
    let mut worst = WriteOutcome::Ok;

    let started = Instant::now();
    for utterance in pcm.chunks(utterance_len) {
        let t0 = Instant::now();
        worst = worst.worst(sink.write_all(utterance)).worst(sink.flush());
        latencies.push(t0.elapsed().as_secs_f64() * 1_000.0);
    }
    sink.clear();
    let elapsed = started.elapsed().as_secs_f64();

    Ok(ModeResult {
        mode,
        backend: sink.backend_name().to_string(),
        samples: pcm.len(),
        utterances: latencies.len(),
        elapsed_ms: elapsed * 1_000.0,
        samples_per_sec: if elapsed > 0.0 {
            pcm.len() as f64 / elapsed
        } else {
            0.0
        },
        realtime_factor: if elapsed > 0.0 {
            pcm.len() as f64 / f64::from(args.sample_rate) / elapsed
        } else {
            0.0
        },
        p50_utterance_ms: percentile(&latencies, 0.50),
        p95_utterance_ms: percentile(&latencies, 0.95),
        worst_outcome: worst,
        diagnostics: sink.diagnostics_snapshot(),
    })
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;
    if args.list_devices {
        let devices = list_output_devices();
        if devices.is_empty() {
            eprintln!("no output devices found");
        }
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let total = (args.seconds * f64::from(args.sample_rate)).round() as usize;
    let pcm = tone(args.sample_rate, total);

    let modes = [OutputMode::Blocking, OutputMode::DoubleBuffer]
        .into_iter()
        .map(|mode| bench_mode(mode, &args, &pcm))
        .collect::<anyhow::Result<Vec<_>>>()?;

    for m in &modes {
        eprintln!(
            "{:?}: {:.0} samples/s ({:.1}x realtime) submissions={} p95={:.2}ms",
            m.mode,
            m.samples_per_sec,
            m.realtime_factor,
            m.diagnostics.submissions,
            m.p95_utterance_ms
        );
    }

    let summary = Summary {
        seconds: args.seconds,
        sample_rate: args.sample_rate,
        capacity: args.capacity,
        paced: args.paced,
        modes,
    };

    let json = serde_json::to_string_pretty(&summary)?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out, json)?;
        eprintln!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }
    Ok(())
}
