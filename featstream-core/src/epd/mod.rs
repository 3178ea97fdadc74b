//! Endpoint detection.
//!
//! The detector runs a hysteresis state machine over per-frame entropy and
//! energy measurements:
//!
//! ```text
//! UtterStart → LeadingSilence ⇄ CoreSpeech ⇄ TrailingSilence → UtterEnd
//!                    ▲                              │ (too short)
//!                    └──────────────────────────────┘
//! ```
//!
//! Each call to [`EndpointDetector::detect`] compensates and refines the
//! frame, adapts the noise baseline and thresholds, median-smooths the
//! entropy and then steps the state machine. Onset and end are confirmed
//! in hindsight, so the reported start/end frames lie in the past.

pub mod classify;
pub mod context;
pub mod median;
pub mod noise;

use serde::{Deserialize, Serialize};

use crate::config::EpdConfig;
use crate::frame::{FrameClass, FrameMeasures};
use crate::numeric::Scalar;

use classify::{compensate_entropy, refine_frame_class, FrameView};
use context::EpdContext;
use median::MedianWindow;
use noise::{NoiseTracker, SnrStats, BOOTSTRAP_FRAMES};

/// Boundary state of the current utterance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointState {
    #[default]
    UtterStart,
    LeadingSilence,
    CoreSpeech,
    TrailingSilence,
    UtterEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpdStatus {
    /// The utterance end was reached on this frame.
    Detected,
    NotDetected,
}

/// Detector output for one frame, consumed by the feature stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpdFrame {
    pub state: EndpointState,
    pub frame_class: FrameClass,
    /// Frames processed, including this one.
    pub frame_count: u64,
    pub start_frame: u64,
    pub end_frame: u64,
    /// An onset was confirmed on this frame.
    pub start_detected: bool,
    /// A provisional start was abandoned on this frame.
    pub start_reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Loudness {
    Normal,
    TooSoft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitStatus {
    Ok,
    /// No onset within the configured wait.
    WaitTimeout,
    /// The current utterance is longer than allowed.
    SpeechTooLong,
}

/// Per-channel endpoint detector.
#[derive(Debug)]
pub struct EndpointDetector<S: Scalar = f32> {
    config: EpdConfig,
    ctx: EpdContext<S>,
    noise: NoiseTracker<S>,
    snr: SnrStats<S>,
    median: MedianWindow<S>,
    frame_class: FrameClass,
    smoothed: S,
}

impl<S: Scalar> EndpointDetector<S> {
    pub fn new(config: EpdConfig) -> Self {
        Self {
            ctx: EpdContext::new(&config),
            median: MedianWindow::new(config.median_window),
            noise: NoiseTracker::default(),
            snr: SnrStats::default(),
            frame_class: FrameClass::Silence,
            smoothed: S::ZERO,
            config,
        }
    }

    /// Processes one frame of measurements.
    pub fn detect(&mut self, measures: &FrameMeasures) -> EpdStatus {
        let k = S::from_f32;
        self.ctx.start_detected = false;
        self.ctx.start_reset = false;
        let state = self.ctx.state;
        let frame_index = self.ctx.frame_index;

        let mut view = FrameView {
            entropy: k(measures.entropy),
            energy: k(measures.log_energy),
            power: k(measures.log_power),
            vad: measures.vad,
            speech_plausible: measures.speech_plausible,
        };
        let d_energy = view.energy - self.noise.energy;
        let d_power = view.power - self.noise.power;

        view.entropy =
            compensate_entropy(&view, d_energy, d_power, state, frame_index, self.ctx.pause);
        if view.speech_plausible
            && state == EndpointState::TrailingSilence
            && view.vad != FrameClass::Voiced
            && (view.entropy < k(0.02) || view.vad < FrameClass::Mixed)
        {
            view.speech_plausible = false;
        }

        let class = refine_frame_class(&view, state, self.ctx.pause, &self.snr);
        if class >= FrameClass::Mixed || view.entropy > k(0.05) {
            self.snr.add_speech(view.power);
        } else {
            self.snr.add_noise(view.power);
        }

        self.noise
            .update(frame_index, state, view.entropy, view.energy, view.power);

        let smoothed = self.median.push(view.entropy);
        let strongly_voiced = class == FrameClass::Voiced
            || view.entropy > k(0.2)
            || (smoothed > k(0.05)
                && d_energy > k(2.0)
                && d_power > k(2.0)
                && view.speech_plausible);
        self.ctx
            .update_runs(smoothed > self.noise.upper, strongly_voiced);
        self.ctx.record(smoothed, class);

        let d_energy = view.energy - self.noise.energy;
        self.frame_class = if frame_index < BOOTSTRAP_FRAMES
            || (view.entropy <= k(0.01) && d_energy < S::ONE)
        {
            FrameClass::Silence
        } else if class == FrameClass::Silence && (view.entropy > k(0.03) || d_energy > k(2.0)) {
            FrameClass::Unvoiced
        } else {
            class
        };
        self.smoothed = smoothed;

        let detected = self.ctx.transition(
            &self.config,
            view.entropy,
            smoothed,
            &self.noise,
            &mut self.snr,
        );
        self.ctx.frame_index += 1;

        if detected {
            EpdStatus::Detected
        } else {
            EpdStatus::NotDetected
        }
    }

    /// Output record for the most recent frame.
    pub fn frame(&self) -> EpdFrame {
        EpdFrame {
            state: self.ctx.state,
            frame_class: self.frame_class,
            frame_count: self.ctx.frame_index,
            start_frame: self.ctx.start_frame,
            end_frame: self.ctx.end_frame,
            start_detected: self.ctx.start_detected,
            start_reset: self.ctx.start_reset,
        }
    }

    /// Record used to drain the stream when input ends.
    pub fn end_of_input(&self) -> EpdFrame {
        EpdFrame {
            state: EndpointState::UtterEnd,
            frame_class: FrameClass::Silence,
            start_detected: false,
            start_reset: false,
            ..self.frame()
        }
    }

    /// Compares speech and noise power of the current utterance.
    pub fn loudness(&self) -> Loudness {
        match self.snr.snr() {
            Some(snr) if snr >= self.config.soft_snr_threshold => Loudness::Normal,
            _ => Loudness::TooSoft,
        }
    }

    pub fn snr(&self) -> Option<f32> {
        self.snr.snr()
    }

    pub fn check_limits(&self) -> LimitStatus {
        let ctx = &self.ctx;
        match ctx.state {
            EndpointState::UtterStart | EndpointState::LeadingSilence => {
                let waited = ctx.frame_index.saturating_sub(ctx.waiting_since);
                if waited > self.config.max_wait_frames as u64 {
                    return LimitStatus::WaitTimeout;
                }
            }
            EndpointState::CoreSpeech | EndpointState::TrailingSilence => {
                let spoken = ctx.frame_index.saturating_sub(ctx.real_begin);
                if spoken > self.config.max_speech_frames as u64 {
                    return LimitStatus::SpeechTooLong;
                }
            }
            EndpointState::UtterEnd => {}
        }
        LimitStatus::Ok
    }

    /// Restores the session-start state.
    pub fn reset(&mut self) {
        self.ctx = EpdContext::new(&self.config);
        self.noise = NoiseTracker::default();
        self.snr.reset();
        self.median.clear();
        self.frame_class = FrameClass::Silence;
        self.smoothed = S::ZERO;
    }

    pub fn state(&self) -> EndpointState {
        self.ctx.state
    }

    pub fn frame_class(&self) -> FrameClass {
        self.frame_class
    }

    pub fn frame_count(&self) -> u64 {
        self.ctx.frame_index
    }

    /// One-based frame id where speech really began.
    pub fn real_begin(&self) -> u64 {
        self.ctx.real_begin
    }

    /// One-based frame id where speech really ended, zero while open.
    pub fn real_end(&self) -> u64 {
        self.ctx.real_end
    }

    pub fn start_frame(&self) -> u64 {
        self.ctx.start_frame
    }

    pub fn end_frame(&self) -> u64 {
        self.ctx.end_frame
    }

    pub fn utterances(&self) -> u32 {
        self.ctx.utterances
    }

    pub fn smoothed_entropy(&self) -> S {
        self.smoothed
    }

    /// Current (lower, upper) entropy thresholds.
    pub fn thresholds(&self) -> (S, S) {
        (self.noise.lower, self.noise.upper)
    }

    pub fn noise_energy(&self) -> S {
        self.noise.energy
    }

    pub fn context(&self) -> &EpdContext<S> {
        &self.ctx
    }

    pub fn config(&self) -> &EpdConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent() -> FrameMeasures {
        FrameMeasures {
            entropy: 0.005,
            log_energy: 14.0,
            log_power: 14.0,
            vad: FrameClass::Silence,
            speech_plausible: false,
        }
    }

    fn voiced() -> FrameMeasures {
        FrameMeasures {
            entropy: 0.25,
            log_energy: 22.0,
            log_power: 22.0,
            vad: FrameClass::Voiced,
            speech_plausible: true,
        }
    }

    #[test]
    fn first_frame_leaves_utter_start() {
        let mut epd = EndpointDetector::<f32>::new(EpdConfig::default());
        assert_eq!(epd.state(), EndpointState::UtterStart);
        assert_eq!(epd.detect(&silent()), EpdStatus::NotDetected);
        assert_eq!(epd.state(), EndpointState::LeadingSilence);
        assert_eq!(epd.frame_count(), 1);
        assert_eq!(epd.frame_class(), FrameClass::Silence);
    }

    #[test]
    fn silence_never_starts_speech() {
        let mut epd = EndpointDetector::<f32>::new(EpdConfig::default());
        for _ in 0..300 {
            assert_eq!(epd.detect(&silent()), EpdStatus::NotDetected);
            assert_eq!(epd.state(), EndpointState::LeadingSilence);
        }
        assert_eq!(epd.noise_energy(), 14.0);
    }

    #[test]
    fn voiced_run_confirms_onset() {
        let mut epd = EndpointDetector::<f32>::new(EpdConfig::default());
        for _ in 0..8 {
            epd.detect(&silent());
        }
        let mut onset_at = None;
        for i in 8..20 {
            epd.detect(&voiced());
            if epd.frame().start_detected {
                onset_at = Some(i);
                break;
            }
        }
        assert_eq!(onset_at, Some(13));
        assert_eq!(epd.real_begin(), 10);
        assert_eq!(epd.start_frame(), 0);
    }

    #[test]
    fn wait_timeout_reported() {
        let config = EpdConfig {
            max_wait_frames: 10,
            ..EpdConfig::default()
        };
        let mut epd = EndpointDetector::<f32>::new(config);
        for _ in 0..5 {
            epd.detect(&silent());
        }
        assert_eq!(epd.check_limits(), LimitStatus::Ok);
        for _ in 0..10 {
            epd.detect(&silent());
        }
        assert_eq!(epd.check_limits(), LimitStatus::WaitTimeout);
    }

    #[test]
    fn silence_only_is_too_soft() {
        let mut epd = EndpointDetector::<f32>::new(EpdConfig::default());
        assert_eq!(epd.loudness(), Loudness::TooSoft);
        for _ in 0..20 {
            epd.detect(&silent());
        }
        assert_eq!(epd.loudness(), Loudness::TooSoft);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut epd = EndpointDetector::<f32>::new(EpdConfig::default());
        for _ in 0..8 {
            epd.detect(&silent());
        }
        for _ in 0..10 {
            epd.detect(&voiced());
        }
        assert_eq!(epd.state(), EndpointState::CoreSpeech);
        epd.reset();
        assert_eq!(epd.state(), EndpointState::UtterStart);
        assert_eq!(epd.frame_count(), 0);
        assert_eq!(epd.real_begin(), 0);
    }
}
