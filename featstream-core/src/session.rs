//! Per-channel session: one endpoint detector feeding one feature stream.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::FrontendConfig;
use crate::epd::{EndpointDetector, EndpointState, EpdStatus, LimitStatus, Loudness};
use crate::error::{FrontendError, Result};
use crate::frame::FrameInput;
use crate::normalizer::NormalizerSeed;
use crate::numeric::Scalar;
use crate::quantizer::Quantizer;
use crate::stream::{FeatureFrame, FeatureStream, FrameStatus, StreamCounts};

// ── Diagnostics ────────────────────────────────────────────────────────

pub struct SessionDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_rejected: AtomicUsize,
    pub vectors_emitted: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub frames_skipped: AtomicUsize,
    pub output_overflows: AtomicUsize,
    pub utterances: AtomicUsize,
    pub resets: AtomicUsize,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            frames_in: AtomicUsize::new(0),
            frames_rejected: AtomicUsize::new(0),
            vectors_emitted: AtomicUsize::new(0),
            frames_dropped: AtomicUsize::new(0),
            frames_skipped: AtomicUsize::new(0),
            output_overflows: AtomicUsize::new(0),
            utterances: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_rejected.store(0, Ordering::Relaxed);
        self.vectors_emitted.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.output_overflows.store(0, Ordering::Relaxed);
        self.utterances.store(0, Ordering::Relaxed);
        self.resets.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            vectors_emitted: self.vectors_emitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            output_overflows: self.output_overflows.load(Ordering::Relaxed),
            utterances: self.utterances.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }

    fn record(&self, counts: StreamCounts) {
        self.vectors_emitted
            .fetch_add(counts.emitted as usize, Ordering::Relaxed);
        self.vectors_emitted
            .fetch_sub(counts.trimmed as usize, Ordering::Relaxed);
        self.frames_dropped
            .fetch_add(counts.dropped as usize, Ordering::Relaxed);
        self.frames_skipped
            .fetch_add(counts.skipped as usize, Ordering::Relaxed);
        self.output_overflows
            .fetch_add(counts.overflowed as usize, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SessionDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_rejected: usize,
    /// Net of vectors trimmed at end of input.
    pub vectors_emitted: usize,
    pub frames_dropped: usize,
    pub frames_skipped: usize,
    pub output_overflows: usize,
    pub utterances: usize,
    pub resets: usize,
}

// ── Seed templates ─────────────────────────────────────────────────────

/// Named normalizer seeds shared between sessions.
///
/// Sessions copy a template when they open; a closing session may publish
/// its adapted seed back under a name.
#[derive(Debug, Clone, Default)]
pub struct SeedStore {
    seeds: Arc<RwLock<HashMap<String, NormalizerSeed>>>,
}

impl SeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, seed: NormalizerSeed) {
        self.seeds.write().insert(name.into(), seed);
    }

    pub fn get(&self, name: &str) -> Option<NormalizerSeed> {
        self.seeds.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.seeds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.read().is_empty()
    }

    /// Loads a binary seed file as a template.
    pub fn load_file(&self, name: impl Into<String>, path: impl AsRef<Path>, dim: usize) -> Result<()> {
        let seed = NormalizerSeed::load(path, dim)?;
        self.insert(name, seed);
        Ok(())
    }

    /// Replaces a template with a session's adapted seed.
    pub fn publish(&self, name: impl Into<String>, seed: NormalizerSeed) {
        let name = name.into();
        debug!(name = %name, "seed template updated");
        self.insert(name, seed);
    }
}

// ── Session ────────────────────────────────────────────────────────────

/// One audio channel's front-end state.
#[derive(Debug)]
pub struct Session<S: Scalar = f32> {
    epd: EndpointDetector<S>,
    stream: FeatureStream<S>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl<S: Scalar> Session<S> {
    /// Opens a session from neutral normalizer statistics.
    pub fn new(config: FrontendConfig) -> Result<Self> {
        let seed = NormalizerSeed::neutral(config.features.dim_mfcc.saturating_sub(1));
        Self::open(config, &seed, None)
    }

    pub fn with_seed(config: FrontendConfig, seed: &NormalizerSeed) -> Result<Self> {
        Self::open(config, seed, None)
    }

    /// Opens from a named template in `store`.
    pub fn from_store(config: FrontendConfig, store: &SeedStore, name: &str) -> Result<Self> {
        let seed = store
            .get(name)
            .ok_or_else(|| FrontendError::SeedFormat(format!("no seed template named {name:?}")))?;
        Self::open(config, &seed, None)
    }

    /// Full constructor. The configuration is validated here; a quantizer
    /// is required when quantization is enabled.
    pub fn open(
        mut config: FrontendConfig,
        seed: &NormalizerSeed,
        quantizer: Option<Quantizer>,
    ) -> Result<Self> {
        config.validate()?;
        let FrontendConfig { epd, features } = config;
        let quantize = features.quantize;
        let mut stream = FeatureStream::new(features, seed)?;
        match quantizer {
            Some(q) => stream.set_quantizer(q)?,
            None if quantize => {
                return Err(FrontendError::InvalidConfig(
                    "quantize is set but no quantizer was supplied".into(),
                ))
            }
            None => {}
        }
        info!(output_dim = stream.output_dim(), "session opened");
        Ok(Self {
            epd: EndpointDetector::new(epd),
            stream,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        })
    }

    pub fn output_dim(&self) -> usize {
        self.stream.output_dim()
    }

    pub fn detector(&self) -> &EndpointDetector<S> {
        &self.epd
    }

    pub fn stream(&self) -> &FeatureStream<S> {
        &self.stream
    }

    pub fn state(&self) -> EndpointState {
        self.epd.state()
    }

    pub fn diagnostics(&self) -> Arc<SessionDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub fn loudness(&self) -> Loudness {
        self.epd.loudness()
    }

    pub fn check_limits(&self) -> LimitStatus {
        self.epd.check_limits()
    }

    /// Processes one analysed frame.
    pub fn push(&mut self, input: &FrameInput) -> FrameStatus {
        self.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);
        let expected = self.stream.config().dim_mfcc;
        if input.cepstrum.len() != expected {
            warn!(
                expected,
                actual = input.cepstrum.len(),
                "frame rejected: dimension mismatch"
            );
            self.diagnostics
                .frames_rejected
                .fetch_add(1, Ordering::Relaxed);
            return FrameStatus::Fail;
        }

        let detected = self.epd.detect(&input.measures) == EpdStatus::Detected;
        let frame = self.epd.frame();
        let status = self.stream.process(Some(&input.cepstrum), &frame);
        if detected {
            debug!(
                start = self.epd.start_frame(),
                end = self.epd.end_frame(),
                "utterance end detected"
            );
        }
        self.account(status)
    }

    /// Signals end of input, completing the current utterance.
    ///
    /// Trailing silence longer than the drop window is trimmed. Without an
    /// open utterance there is nothing to complete.
    pub fn finish(&mut self) -> FrameStatus {
        if !matches!(
            self.epd.state(),
            EndpointState::CoreSpeech | EndpointState::TrailingSilence
        ) {
            return FrameStatus::NothingYet;
        }
        let frame = self.epd.end_of_input();
        let status = self.stream.process(None, &frame);
        self.account(status)
    }

    /// Vectors finalized since the previous call.
    pub fn take_pending(&mut self) -> Vec<FeatureFrame<S>> {
        self.stream.take_pending()
    }

    /// The current utterance's vectors, leaving the output empty.
    pub fn utterance(&mut self) -> Vec<FeatureFrame<S>> {
        self.stream.drain()
    }

    /// Starts over for a new input; adapted normalizer statistics survive.
    pub fn reset(&mut self) {
        self.epd.reset();
        self.stream.reset();
        self.diagnostics.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Ends the session and returns the adapted seed for persistence.
    pub fn close(self) -> NormalizerSeed {
        let seed = self.stream.seed();
        info!(
            frames = self.diagnostics.frames_in.load(Ordering::Relaxed),
            utterances = self.diagnostics.utterances.load(Ordering::Relaxed),
            "session closed"
        );
        seed
    }

    fn account(&mut self, status: FrameStatus) -> FrameStatus {
        self.diagnostics.record(self.stream.take_counts());
        match status {
            FrameStatus::Complete => {
                self.diagnostics.utterances.fetch_add(1, Ordering::Relaxed);
            }
            FrameStatus::Fail => {
                self.diagnostics
                    .frames_rejected
                    .fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        status
    }
}
