use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use featstream_core::{
    FeatureFrame, FrameClass, FrameInput, FrameMeasures, FrameStatus, FrontendConfig, Session,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e:#}");
        std::process::exit(1);
    }
}

#[derive(Debug)]
struct Args {
    channels: usize,
    utterances: usize,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResult {
    channel: usize,
    frames: usize,
    utterances_detected: usize,
    vectors_emitted: usize,
    /// Vectors of completed utterances as seen by the consumer.
    vectors_delivered: usize,
    frames_dropped: usize,
    #[serde(skip)]
    latencies_us: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    channels: usize,
    utterances_per_channel: usize,
    total_frames: usize,
    utterances_detected: usize,
    vectors_emitted: usize,
    p50_frame_latency_us: f64,
    p95_frame_latency_us: f64,
    wall_time_ms: f64,
    per_channel: Vec<ChannelResult>,
}

const LEADING_SILENCE: usize = 30;
const SPEECH: usize = 80;
const TRAILING_SILENCE: usize = 60;

fn parse_args() -> anyhow::Result<Args> {
    let mut channels = 4;
    let mut utterances = 5;
    let mut output = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--channels" => {
                let v = it.next().context("missing value for --channels")?;
                channels = v
                    .parse::<usize>()
                    .context("invalid value for --channels")?
                    .clamp(1, 64);
            }
            "--utterances" => {
                let v = it.next().context("missing value for --utterances")?;
                utterances = v
                    .parse::<usize>()
                    .context("invalid value for --utterances")?
                    .clamp(1, 1000);
            }
            "--output" => {
                let v = it.next().context("missing value for --output")?;
                output = Some(PathBuf::from(v));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: featstream-bench [--channels <n>] [--utterances <k>] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(Args {
        channels,
        utterances,
        output,
    })
}

/// Silence, a voiced stretch, silence; cepstra vary smoothly per channel.
fn synth_utterance(channel: usize, dim: usize) -> Vec<FrameInput> {
    let total = LEADING_SILENCE + SPEECH + TRAILING_SILENCE;
    (0..total)
        .map(|t| {
            let speech = (LEADING_SILENCE..LEADING_SILENCE + SPEECH).contains(&t);
            let phase = t as f32 * 0.13 + channel as f32;
            let amp = if speech { 4.0 } else { 0.2 };
            let mut cepstrum: Vec<f32> = (0..dim - 1)
                .map(|i| amp * (phase + i as f32 * 0.7).sin())
                .collect();
            let measures = if speech {
                cepstrum.push(22.0);
                FrameMeasures {
                    entropy: 0.25,
                    log_energy: 22.0,
                    log_power: 22.0,
                    vad: FrameClass::Voiced,
                    speech_plausible: true,
                }
            } else {
                cepstrum.push(14.0);
                FrameMeasures::silent(14.0)
            };
            FrameInput::new(cepstrum, measures)
        })
        .collect()
}

fn run_channel(channel: usize, utterances: usize, config: FrontendConfig) -> anyhow::Result<ChannelResult> {
    let dim = config.features.dim_mfcc;
    let mut session = Session::<f32>::new(config)?;
    let mut latencies_us = Vec::new();
    let mut vectors: Vec<FeatureFrame> = Vec::new();
    let mut frames = 0;
    let mut delivered = 0;

    for _ in 0..utterances {
        for input in synth_utterance(channel, dim) {
            let started = Instant::now();
            let status = session.push(&input);
            latencies_us.push(started.elapsed().as_secs_f64() * 1e6);
            frames += 1;
            match status {
                FrameStatus::Fail => bail!("channel {channel}: frame rejected"),
                FrameStatus::Reset => vectors.clear(),
                FrameStatus::Emitted => vectors.extend(session.take_pending()),
                FrameStatus::Complete => {
                    vectors.extend(session.take_pending());
                    delivered += vectors.len();
                    vectors.clear();
                }
                FrameStatus::NothingYet => {}
            }
        }
    }
    session.finish();

    let snap = session.diagnostics().snapshot();
    let seed = session.close();
    info!(channel, max_log_energy = seed.max_log_energy, "channel done");
    Ok(ChannelResult {
        channel,
        frames,
        utterances_detected: snap.utterances,
        vectors_emitted: snap.vectors_emitted,
        vectors_delivered: delivered,
        frames_dropped: snap.frames_dropped,
        latencies_us,
    })
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

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("featstream_core=warn")),
        )
        .init();

    let args = parse_args()?;
    let config = FrontendConfig::default();
    let started = Instant::now();

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut workers = Vec::with_capacity(args.channels);
    for channel in 0..args.channels {
        let tx = tx.clone();
        let config = config.clone();
        let utterances = args.utterances;
        workers.push(std::thread::spawn(move || {
            let result = run_channel(channel, utterances, config);
            // The receiver outlives every worker.
            let _ = tx.send(result);
        }));
    }
    drop(tx);

    let mut per_channel = rx
        .iter()
        .collect::<anyhow::Result<Vec<ChannelResult>>>()?;
    for worker in workers {
        if worker.join().is_err() {
            bail!("worker thread panicked");
        }
    }
    per_channel.sort_by_key(|r| r.channel);

    let latencies: Vec<f64> = per_channel
        .iter()
        .flat_map(|r| r.latencies_us.iter().copied())
        .collect();
    let summary = Summary {
        channels: args.channels,
        utterances_per_channel: args.utterances,
        total_frames: per_channel.iter().map(|r| r.frames).sum(),
        utterances_detected: per_channel.iter().map(|r| r.utterances_detected).sum(),
        vectors_emitted: per_channel.iter().map(|r| r.vectors_emitted).sum(),
        p50_frame_latency_us: percentile(&latencies, 0.50),
        p95_frame_latency_us: percentile(&latencies, 0.95),
        wall_time_ms: started.elapsed().as_secs_f64() * 1e3,
        per_channel,
    };

    println!(
        "Done. frames={} utterances={} p50={:.2}us p95={:.2}us",
        summary.total_frames,
        summary.utterances_detected,
        summary.p50_frame_latency_us,
        summary.p95_frame_latency_us
    );

    let json = serde_json::to_string_pretty(&summary)?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out, json)?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }
    Ok(())
}
