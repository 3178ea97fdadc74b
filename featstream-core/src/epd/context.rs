use tracing::debug;

use crate::config::EpdConfig;
use crate::frame::FrameClass;
use crate::numeric::Scalar;

use super::noise::{NoiseTracker, SnrStats};
use super::EndpointState;

/// Length of the smoothed-entropy history.
pub const HISTORY_LEN: usize = 128;
/// Entropy that counts a frame as reliably voiced.
const RELIABLE_VOICED: f32 = 0.10;
/// Offset subtracted from the utterance length before the minimum checks.
const ABORT_OFFSET: i64 = 20;
/// Voiced run that re-opens an utterance regardless of its peak.
const REOPEN_RUN: u32 = 5;

/// Per-channel detector state: hysteresis counters, boundary markers and
/// the recent smoothed-entropy history.
#[derive(Debug, Clone)]
pub struct EpdContext<S: Scalar = f32> {
    pub state: EndpointState,
    /// Frames seen so far (index of the next frame).
    pub frame_index: u64,
    /// Consecutive frames with smoothed entropy above the upper threshold.
    pub voiced_run: u32,
    /// Consecutive strongly voiced frames.
    pub strong_run: u32,
    pub max_strong_run: u32,
    /// Longest strongly voiced run since the provisional end.
    pub max_strong_since_end: u32,
    pub pause: u32,
    pub speech_frames: u32,
    pub reliable_voiced: u32,
    pub real_begin: u64,
    pub real_end: u64,
    pub start_frame: u64,
    pub end_frame: u64,
    pub begin_margin: u64,
    pub end_margin: u64,
    pub utterances: u32,
    pub start_detected: bool,
    pub start_reset: bool,
    /// Frame index at which leading silence was last entered.
    pub waiting_since: u64,
    entropy_history: Vec<S>,
    class_history: Vec<FrameClass>,
}

impl<S: Scalar> EpdContext<S> {
    pub fn new(config: &EpdConfig) -> Self {
        Self {
            state: EndpointState::UtterStart,
            frame_index: 0,
            voiced_run: 0,
            strong_run: 0,
            max_strong_run: 0,
            max_strong_since_end: 0,
            pause: 0,
            speech_frames: 0,
            reliable_voiced: 0,
            real_begin: 0,
            real_end: 0,
            start_frame: 0,
            end_frame: 0,
            begin_margin: config.begin_margin_frames as u64,
            end_margin: config.end_margin_frames as u64,
            utterances: 0,
            start_detected: false,
            start_reset: false,
            waiting_since: 0,
            entropy_history: vec![S::ZERO; HISTORY_LEN],
            class_history: vec![FrameClass::Silence; HISTORY_LEN],
        }
    }

    pub fn record(&mut self, smoothed: S, class: FrameClass) {
        let slot = (self.frame_index % HISTORY_LEN as u64) as usize;
        self.entropy_history[slot] = smoothed;
        self.class_history[slot] = class;
    }

    /// Smoothed entropy and refined class recorded for `frame`, if it is
    /// still inside the history window.
    pub fn history(&self, frame: u64) -> Option<(S, FrameClass)> {
        if frame >= self.frame_index || self.frame_index - frame > HISTORY_LEN as u64 {
            return None;
        }
        let slot = (frame % HISTORY_LEN as u64) as usize;
        Some((self.entropy_history[slot], self.class_history[slot]))
    }

    fn entropy_at(&self, frame: u64) -> S {
        self.entropy_history[(frame % HISTORY_LEN as u64) as usize]
    }

    /// Updates the voiced and strongly voiced run lengths.
    pub fn update_runs(&mut self, above_upper: bool, strongly_voiced: bool) {
        if above_upper {
            self.voiced_run += 1;
        } else {
            self.voiced_run = 0;
        }
        if strongly_voiced {
            self.strong_run += 1;
            self.max_strong_run = self.max_strong_run.max(self.strong_run);
            self.max_strong_since_end = self.max_strong_since_end.max(self.strong_run);
        } else {
            self.strong_run = 0;
        }
    }

    /// Runs one step of the boundary state machine for the current frame.
    /// Returns `true` when the utterance end is reached.
    pub fn transition(
        &mut self,
        config: &EpdConfig,
        entropy: S,
        smoothed: S,
        thresholds: &NoiseTracker<S>,
        snr: &mut SnrStats<S>,
    ) -> bool {
        let frame_id = self.frame_index + 1;
        let onset = config.onset_frames as u64;
        let reliable = S::from_f32(RELIABLE_VOICED);
        let from = self.state;

        match self.state {
            EndpointState::UtterStart => {
                self.state = EndpointState::LeadingSilence;
                self.waiting_since = self.frame_index;
            }
            EndpointState::LeadingSilence => {
                if self.voiced_run as u64 >= onset {
                    self.state = EndpointState::CoreSpeech;
                    self.real_begin = frame_id.saturating_sub(onset + 1);
                    self.start_frame = self.real_begin.saturating_sub(self.begin_margin);
                    self.real_end = 0;
                    self.end_frame = 0;
                    self.speech_frames = config.onset_frames as u32;
                    self.pause = 0;
                    self.start_detected = true;
                    self.max_strong_since_end = 0;
                    self.reliable_voiced = (self.start_frame..frame_id)
                        .filter(|&i| self.entropy_at(i) >= reliable)
                        .count() as u32;
                }
            }
            EndpointState::CoreSpeech => {
                if smoothed < thresholds.lower {
                    self.state = EndpointState::TrailingSilence;
                    self.real_end = frame_id;
                    self.end_frame = self.real_end + self.end_margin;
                    self.pause = 1;
                    self.max_strong_since_end = 0;
                } else {
                    if entropy > thresholds.upper {
                        self.speech_frames += 1;
                    }
                    if entropy > reliable {
                        self.reliable_voiced += 1;
                    }
                }
            }
            EndpointState::TrailingSilence => {
                if entropy > thresholds.upper {
                    self.speech_frames += 1;
                }
                if entropy > reliable {
                    self.reliable_voiced += 1;
                } else {
                    self.pause += 1;
                }

                if self.pause as usize > config.end_pause_frames {
                    let length = self.real_end as i64 - self.real_begin as i64 - ABORT_OFFSET;
                    if length < config.min_speech_frames as i64
                        || length < config.min_voiced_frames as i64
                    {
                        self.abort();
                    } else {
                        self.state = EndpointState::UtterEnd;
                        self.end_frame = self.real_end + self.end_margin;
                        self.utterances += 1;
                    }
                } else if self.voiced_run as u64 >= onset || self.max_strong_since_end as u64 >= onset {
                    let lowest = frame_id.saturating_sub(onset);
                    let peak = (lowest..frame_id)
                        .map(|i| self.entropy_at(i))
                        .fold(S::ZERO, |acc, v| acc.max(v));
                    let short_pause = (self.pause as usize) < config.mid_pause_frames;
                    let reopen = (peak > S::from_f32(0.2)
                        && (short_pause || self.voiced_run as u64 >= onset))
                        || (peak >= reliable && short_pause)
                        || (self.voiced_run >= REOPEN_RUN && short_pause);
                    if reopen {
                        self.state = EndpointState::CoreSpeech;
                        self.real_end = 0;
                        self.end_frame = 0;
                        self.pause = 0;
                    }
                }
            }
            EndpointState::UtterEnd => {
                self.state = EndpointState::LeadingSilence;
                if !config.continuous {
                    self.frame_index = 0;
                }
                self.waiting_since = self.frame_index;
                self.start_frame = 0;
                self.end_frame = 0;
                self.speech_frames = 0;
                self.reliable_voiced = 0;
                self.voiced_run = 0;
                self.start_reset = true;
                self.begin_margin = config.begin_margin_frames as u64;
                self.end_margin = config.end_margin_frames as u64;
                snr.reset();
            }
        }

        if self.state != from {
            debug!(
                frame = frame_id,
                from = ?from,
                to = ?self.state,
                real_begin = self.real_begin,
                real_end = self.real_end,
                "endpoint transition"
            );
        }
        self.state == EndpointState::UtterEnd
    }

    /// Abandons a too-short utterance and returns to leading silence.
    fn abort(&mut self) {
        self.state = EndpointState::LeadingSilence;
        self.waiting_since = self.frame_index;
        self.real_begin = 0;
        self.start_frame = 0;
        self.real_end = 0;
        self.end_frame = 0;
        self.start_reset = true;
        self.pause = 0;
        self.reliable_voiced = 0;
        self.speech_frames = 0;
        self.max_strong_run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (EpdConfig, EpdContext<f32>) {
        let config = EpdConfig::default();
        let ctx = EpdContext::new(&config);
        (config, ctx)
    }

    fn thresholds() -> NoiseTracker<f32> {
        NoiseTracker {
            energy: 14.0,
            power: 14.0,
            lower: 0.04,
            upper: 0.07,
        }
    }

    #[test]
    fn onset_sets_begin_and_start_frames() {
        let (config, mut ctx) = context();
        let mut snr = SnrStats::default();
        ctx.state = EndpointState::LeadingSilence;
        ctx.frame_index = 30;
        ctx.voiced_run = 3;
        assert!(!ctx.transition(&config, 0.3, 0.3, &thresholds(), &mut snr));
        assert_eq!(ctx.state, EndpointState::CoreSpeech);
        assert_eq!(ctx.real_begin, 27);
        assert_eq!(ctx.start_frame, 17);
        assert!(ctx.start_detected);
    }

    #[test]
    fn short_utterance_aborts() {
        let (config, mut ctx) = context();
        let mut snr = SnrStats::default();
        ctx.state = EndpointState::TrailingSilence;
        ctx.frame_index = 100;
        ctx.real_begin = 50;
        ctx.real_end = 60;
        ctx.pause = config.end_pause_frames as u32;
        assert!(!ctx.transition(&config, 0.01, 0.01, &thresholds(), &mut snr));
        assert_eq!(ctx.state, EndpointState::LeadingSilence);
        assert!(ctx.start_reset);
        assert_eq!(ctx.real_begin, 0);
    }

    #[test]
    fn long_pause_ends_utterance() {
        let (config, mut ctx) = context();
        let mut snr = SnrStats::default();
        ctx.state = EndpointState::TrailingSilence;
        ctx.frame_index = 200;
        ctx.real_begin = 20;
        ctx.real_end = 150;
        ctx.pause = config.end_pause_frames as u32;
        assert!(ctx.transition(&config, 0.01, 0.01, &thresholds(), &mut snr));
        assert_eq!(ctx.state, EndpointState::UtterEnd);
        assert_eq!(ctx.end_frame, 160);
        assert_eq!(ctx.utterances, 1);

        // The next step returns to leading silence and keeps counting.
        assert!(!ctx.transition(&config, 0.01, 0.01, &thresholds(), &mut snr));
        assert_eq!(ctx.state, EndpointState::LeadingSilence);
        assert_eq!(ctx.frame_index, 200);
        assert!(ctx.start_reset);
    }

    #[test]
    fn renewed_onset_reopens_speech() {
        let (config, mut ctx) = context();
        let mut snr = SnrStats::default();
        ctx.state = EndpointState::TrailingSilence;
        ctx.frame_index = 100;
        ctx.real_begin = 20;
        ctx.real_end = 95;
        ctx.pause = 4;
        ctx.voiced_run = 3;
        for frame in 97..100 {
            ctx.frame_index = frame;
            ctx.record(0.3, FrameClass::Voiced);
        }
        ctx.frame_index = 100;
        ctx.record(0.3, FrameClass::Voiced);
        ctx.transition(&config, 0.3, 0.3, &thresholds(), &mut snr);
        assert_eq!(ctx.state, EndpointState::CoreSpeech);
        assert_eq!(ctx.real_end, 0);
        assert_eq!(ctx.pause, 0);
    }

    #[test]
    fn history_window_bounds() {
        let (_, mut ctx) = context();
        ctx.record(0.5, FrameClass::Voiced);
        ctx.frame_index = 1;
        assert_eq!(ctx.history(0), Some((0.5, FrameClass::Voiced)));
        assert_eq!(ctx.history(1), None);
        ctx.frame_index = 200;
        assert_eq!(ctx.history(0), None);
    }
}
