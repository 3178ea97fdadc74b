use tracing::{debug, info, warn};

use crate::compress::FrameCompressor;
use crate::config::FeatureConfig;
use crate::delta::{Derived, DerivativeComputer};
use crate::epd::{EndpointState, EpdFrame};
use crate::error::{FrontendError, Result};
use crate::frame::FrameClass;
use crate::normalizer::{Normalizer, NormalizerSeed};
use crate::numeric::{convert_slice, Scalar};
use crate::quantizer::Quantizer;

use super::buffer::{CellActivity, StreamBuffer};
use super::output::{FeatureFrame, FeatureOutputStream};

/// Outcome of one [`FeatureStream::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The input was unusable; nothing changed.
    Fail,
    NothingYet,
    /// New vectors are available through [`FeatureStream::take_pending`].
    Emitted,
    /// A new segment started; vectors handed out so far are void.
    Reset,
    /// The utterance is finished and its vectors are final.
    Complete,
}

/// Per-call finalization counts, collected by the owning session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounts {
    pub emitted: u64,
    pub dropped: u64,
    pub skipped: u64,
    /// Vectors refused by a full output stream, plus speech cells forced
    /// out of a full ring ahead of their delay.
    pub overflowed: u64,
    /// Previously emitted vectors removed by end-of-input trimming.
    pub trimmed: u64,
}

/// Turns frames plus endpoint decisions into utterance feature vectors.
///
/// Frames are normalized and compressed on arrival and held in a ring.
/// Finalization (derivatives + output) trails the newest frame by the
/// configured delay so the right-hand derivative context exists. When the
/// detector confirms an onset in hindsight, the stream rewinds to the start
/// frame and replays the buffered cells.
#[derive(Debug)]
pub struct FeatureStream<S: Scalar = f32> {
    config: FeatureConfig,
    buffer: StreamBuffer<S>,
    normalizer: Normalizer<S>,
    compressor: FrameCompressor<S>,
    derivatives: DerivativeComputer,
    output: FeatureOutputStream<S>,
    quantizer: Option<Quantizer>,
    delay: i64,
    silence_run: usize,
    last_state: EndpointState,
    counts: StreamCounts,
}

impl<S: Scalar> FeatureStream<S> {
    pub fn new(config: FeatureConfig, seed: &NormalizerSeed) -> Result<Self> {
        let normalizer = Normalizer::new(&config, seed)?;
        let stream = Self {
            buffer: StreamBuffer::new(config.ring_capacity, config.dim_mfcc),
            compressor: FrameCompressor::new(&config),
            derivatives: DerivativeComputer::new(&config),
            output: FeatureOutputStream::new(config.max_output_frames),
            quantizer: None,
            delay: config.delay() as i64,
            silence_run: config.silence_drop_window,
            last_state: EndpointState::UtterStart,
            counts: StreamCounts::default(),
            normalizer,
            config,
        };
        info!(
            output_dim = stream.output_dim(),
            delay = stream.delay,
            capacity = stream.buffer.capacity(),
            live = stream.config.is_live(),
            "feature stream ready"
        );
        Ok(stream)
    }

    /// Attaches a quantizer; vectors are quantized only when the
    /// configuration asks for it.
    pub fn set_quantizer(&mut self, quantizer: Quantizer) -> Result<()> {
        if quantizer.dim() != self.output_dim() {
            return Err(FrontendError::DimensionMismatch {
                expected: self.output_dim(),
                actual: quantizer.dim(),
            });
        }
        self.quantizer = Some(quantizer);
        Ok(())
    }

    pub fn output_dim(&self) -> usize {
        self.derivatives.output_dim()
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn buffer(&self) -> &StreamBuffer<S> {
        &self.buffer
    }

    pub fn normalizer(&self) -> &Normalizer<S> {
        &self.normalizer
    }

    pub fn output(&self) -> &FeatureOutputStream<S> {
        &self.output
    }

    /// Vectors finalized since the previous call.
    pub fn take_pending(&mut self) -> Vec<FeatureFrame<S>> {
        self.output.take_pending()
    }

    /// Hands the finished utterance to the caller.
    pub fn drain(&mut self) -> Vec<FeatureFrame<S>> {
        self.output.drain()
    }

    /// Counts accumulated since the previous call.
    pub fn take_counts(&mut self) -> StreamCounts {
        std::mem::take(&mut self.counts)
    }

    /// Snapshot of the adapted normalizer state.
    pub fn seed(&self) -> NormalizerSeed {
        self.normalizer.seed()
    }

    /// Clears the ring and output; normalizer statistics are kept.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.compressor.reset();
        self.derivatives.begin_utterance();
        self.output.clear();
        self.silence_run = self.config.silence_drop_window;
        self.last_state = EndpointState::UtterStart;
        debug!("feature stream reset");
    }

    /// Ingests one frame (or, with `None`, the end of input) together with
    /// the detector's decision for it.
    pub fn process(&mut self, input: Option<&[f32]>, epd: &EpdFrame) -> FrameStatus {
        let status = match input {
            Some(frame) => {
                if frame.len() != self.config.dim_mfcc {
                    warn!(
                        expected = self.config.dim_mfcc,
                        actual = frame.len(),
                        "frame rejected: dimension mismatch"
                    );
                    return FrameStatus::Fail;
                }
                self.ingest(&convert_slice::<S>(frame), epd.frame_class);
                self.dispatch(epd, true)
            }
            None if epd.state == EndpointState::UtterEnd => self.dispatch(epd, false),
            None => {
                warn!(state = ?epd.state, "missing frame outside utterance end");
                return FrameStatus::Fail;
            }
        };
        self.last_state = epd.state;
        status
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    fn ingest(&mut self, raw: &[S], class: FrameClass) {
        if self.buffer.is_full() {
            self.make_room();
        }
        let pos = self.buffer.push(raw, class);

        if self.config.silence_drop {
            if class == FrameClass::Silence {
                self.silence_run += 1;
            } else {
                self.silence_run = 0;
            }
            if self.silence_run > 2 * self.config.silence_drop_window {
                let target = pos - self.config.silence_drop_window as i64;
                self.buffer.cell_mut(target).activity = CellActivity::Dropped;
            }
        }

        self.normalizer
            .process(class, &mut self.buffer.cell_mut(pos).norm);

        self.compressor
            .compress(&mut self.buffer, pos, self.normalizer.voiced_inv_std());
    }

    /// The ring is full: the cell at the output cursor leaves before its
    /// slot is reused. Speech cells are finalized early.
    fn make_room(&mut self) {
        let out = self.buffer.output();
        if self.buffer.cell(out).speech {
            warn!(
                frame = out,
                capacity = self.buffer.capacity(),
                "stream ring full, finalizing early"
            );
            self.counts.overflowed += 1;
            self.finalize(out);
        }
        self.buffer.set_output(out + 1);
    }

    // ── State handling ─────────────────────────────────────────────────

    fn dispatch(&mut self, epd: &EpdFrame, has_input: bool) -> FrameStatus {
        if epd.start_reset {
            self.output.clear();
        }
        match epd.state {
            EndpointState::UtterStart => FrameStatus::NothingYet,
            EndpointState::LeadingSilence => {
                // Nothing before an onset is pending.
                self.buffer.set_output(self.buffer.written());
                if self.last_state != EndpointState::LeadingSilence {
                    self.buffer.clear_speech();
                    self.output.clear();
                    self.normalizer.begin_utterance();
                    FrameStatus::Reset
                } else {
                    FrameStatus::NothingYet
                }
            }
            EndpointState::CoreSpeech => {
                if epd.start_detected || self.last_state == EndpointState::LeadingSilence {
                    self.start_speech(epd)
                } else if self.last_state == EndpointState::TrailingSilence {
                    self.resume_speech()
                } else {
                    self.advance()
                }
            }
            EndpointState::TrailingSilence => {
                if epd.frame_count.saturating_sub(1) <= epd.end_frame {
                    self.advance()
                } else {
                    FrameStatus::NothingYet
                }
            }
            EndpointState::UtterEnd => self.end_utterance(has_input),
        }
    }

    /// Onset confirmed: replay everything since the start frame.
    fn start_speech(&mut self, epd: &EpdFrame) -> FrameStatus {
        self.derivatives.begin_utterance();
        self.output.clear();
        self.buffer.clear_speech();

        let cur = self.buffer.current();
        let requested = epd
            .frame_count
            .saturating_sub(epd.start_frame)
            .saturating_sub(1) as i64;
        let max_rewind = self.buffer.capacity() as i64 - 1;
        let rewind = if requested > max_rewind {
            warn!(requested, max_rewind, "onset rewind exceeds ring, clamped");
            max_rewind
        } else {
            requested
        };
        debug!(
            frame = cur,
            start_frame = epd.start_frame,
            rewind,
            "replaying buffered speech"
        );

        let mut emitted = false;
        let mut active = cur - rewind;
        let mut out = active - self.delay;
        while active != cur {
            self.buffer.cell_mut(active).speech = true;
            emitted |= self.finalize(out);
            active += 1;
            out += 1;
        }
        self.buffer.cell_mut(cur).speech = true;
        emitted |= self.finalize(out);
        self.buffer.set_output(cur - self.delay + 1);
        self.appended(emitted)
    }

    /// A provisional end was cancelled: the pause becomes speech again.
    fn resume_speech(&mut self) -> FrameStatus {
        let cur = self.buffer.current();
        let out = self.buffer.output().max(self.buffer.oldest());
        let mut pos = cur;
        while pos >= out {
            let cell = self.buffer.cell_mut(pos);
            cell.speech = true;
            if self.config.silence_drop_in_speech && cell.class == FrameClass::Silence {
                cell.activity = CellActivity::Dropped;
            }
            pos -= 1;
        }
        self.buffer.cell_mut(cur).speech = true;

        let last = cur - self.delay;
        let mut emitted = false;
        for pos in out..=last {
            emitted |= self.finalize(pos);
        }
        self.buffer.set_output(out.max(last + 1));
        self.appended(emitted)
    }

    /// Steady state: mark the new frame and finalize one delayed cell.
    fn advance(&mut self) -> FrameStatus {
        let cur = self.buffer.current();
        self.buffer.cell_mut(cur).speech = true;
        let out = self.buffer.output();
        let emitted = self.finalize(out);
        self.buffer.set_output(out + 1);
        self.appended(emitted)
    }

    fn end_utterance(&mut self, has_input: bool) -> FrameStatus {
        let end = self.buffer.written();
        for pos in self.buffer.output().max(self.buffer.oldest())..end {
            self.finalize(pos);
        }
        self.buffer.set_output(end);

        if !has_input && self.config.silence_drop {
            self.drop_trailing_silence();
        }

        self.normalizer.flush();
        if !self.config.is_live() {
            self.batch_post_process();
        }
        info!(
            vectors = self.output.len(),
            frames = end,
            "utterance complete"
        );
        FrameStatus::Complete
    }

    // ── Finalization ───────────────────────────────────────────────────

    /// Derives and appends the cell at `pos` if it belongs to the
    /// utterance. Returns whether a vector was appended.
    fn finalize(&mut self, pos: i64) -> bool {
        if !self.buffer.cell(pos).speech {
            return false;
        }
        match self.derivatives.compute(&self.buffer, pos) {
            Derived::Vector(vector) => {
                let cell = self.buffer.cell(pos);
                let levels = match &self.quantizer {
                    Some(q) if self.config.quantize && self.config.is_live() => {
                        Some(q.quantize(&vector))
                    }
                    _ => None,
                };
                let frame = FeatureFrame {
                    vector,
                    class: cell.class,
                    frame_index: cell.index,
                    levels,
                };
                if self.output.push(frame) {
                    self.counts.emitted += 1;
                    true
                } else {
                    self.counts.overflowed += 1;
                    false
                }
            }
            Derived::Dropped => {
                self.counts.dropped += 1;
                false
            }
            Derived::Skipped => {
                self.counts.skipped += 1;
                false
            }
        }
    }

    fn appended(&self, emitted: bool) -> FrameStatus {
        if emitted && self.config.is_live() {
            FrameStatus::Emitted
        } else {
            FrameStatus::NothingYet
        }
    }

    /// End of input: trims a trailing silence run longer than the drop
    /// window from the output.
    fn drop_trailing_silence(&mut self) {
        let window = self.config.silence_drop_window;
        let last = self.buffer.current();
        let mut run = 0usize;
        let mut pos = last;
        while self.buffer.cell(pos).class == FrameClass::Silence && run <= 2 * window {
            run += 1;
            pos -= 1;
        }
        if run <= window {
            return;
        }
        let mut removed = 0usize;
        for pos in (last - (run - window) as i64 + 1..=last).rev() {
            let cell = self.buffer.cell_mut(pos);
            if cell.is_active() && cell.speech {
                cell.activity = CellActivity::Dropped;
                removed += 1;
            }
        }
        if removed > 0 {
            let len = self.output.len().saturating_sub(removed);
            self.output.truncate(len);
            self.counts.trimmed += removed as u64;
            self.counts.dropped += removed as u64;
            debug!(removed, "trailing silence trimmed");
        }
    }

    /// Second pass over the buffered utterance once batch statistics are
    /// known.
    fn batch_post_process(&mut self) {
        let quantizer = self.quantizer.as_ref().filter(|_| self.config.quantize);
        for frame in self.output.iter_mut() {
            self.normalizer.post_process(frame.class, &mut frame.vector);
            if let Some(q) = quantizer {
                frame.levels = Some(q.quantize(&frame.vector));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CmsMode, Compression};

    fn config() -> FeatureConfig {
        FeatureConfig {
            dim_mfcc: 3,
            silence_drop: false,
            ..FeatureConfig::default()
        }
    }

    fn frame(state: EndpointState, count: u64) -> EpdFrame {
        EpdFrame {
            state,
            frame_class: FrameClass::Voiced,
            frame_count: count,
            start_frame: 0,
            end_frame: 0,
            start_detected: false,
            start_reset: false,
        }
    }

    fn stream(config: FeatureConfig) -> FeatureStream<f32> {
        let seed = NormalizerSeed::neutral(config.dim_mfcc - 1);
        FeatureStream::new(config, &seed).expect("stream")
    }

    /// Leading silence for `lead` frames, onset at frame `lead` with the
    /// start at `start`, speech until `end`.
    fn run_utterance(s: &mut FeatureStream<f32>, lead: u64, start: u64, end: u64) -> Vec<FrameStatus> {
        let mut statuses = Vec::new();
        for i in 0..end {
            let state = if i < lead {
                EndpointState::LeadingSilence
            } else {
                EndpointState::CoreSpeech
            };
            let mut epd = frame(state, i + 1);
            epd.start_frame = start;
            epd.start_detected = i == lead;
            statuses.push(s.process(Some(&[i as f32, 0.0, 1.0]), &epd));
        }
        statuses
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut s = stream(config());
        let epd = frame(EndpointState::LeadingSilence, 1);
        assert_eq!(s.process(Some(&[1.0]), &epd), FrameStatus::Fail);
        assert_eq!(s.buffer().written(), 0);
    }

    #[test]
    fn onset_replays_from_start_frame() {
        let mut s = stream(config());
        let statuses = run_utterance(&mut s, 10, 6, 11);
        assert_eq!(statuses[0], FrameStatus::Reset);
        assert_eq!(statuses[10], FrameStatus::Emitted);
        // Frames 6..=10 are speech; with delay 4 only frame 6 is final.
        let frames = s.take_pending();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_index, 6);
        assert_eq!(s.buffer().output(), 7);
    }

    #[test]
    fn utterance_end_drains_pending_cells() {
        let mut s = stream(config());
        run_utterance(&mut s, 10, 6, 20);
        let end = frame(EndpointState::UtterEnd, 20);
        assert_eq!(s.process(None, &end), FrameStatus::Complete);
        let frames = s.drain();
        let indices: Vec<u64> = frames.iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, (6..20).collect::<Vec<_>>());
        assert!(frames.iter().all(|f| f.vector.len() == 3 + 2 * 3));
    }

    #[test]
    fn cancelled_pause_is_replayed() {
        let mut s = stream(config());
        run_utterance(&mut s, 5, 3, 12);
        // Pause beyond the end margin: output stalls.
        for i in 12..16 {
            let mut epd = frame(EndpointState::TrailingSilence, i + 1);
            epd.end_frame = 12;
            s.process(Some(&[i as f32, 0.0, 1.0]), &epd);
        }
        let stalled = s.buffer().output();
        assert_eq!(stalled, 9);
        let status = s.process(Some(&[16.0, 0.0, 1.0]), &frame(EndpointState::CoreSpeech, 17));
        assert_eq!(status, FrameStatus::Emitted);
        assert_eq!(s.buffer().output(), 16 - 4 + 1);
        let indices: Vec<u64> = s.output().iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, (3..=12).collect::<Vec<_>>());
    }

    #[test]
    fn batch_mode_reports_only_completion() {
        let mut s = stream(FeatureConfig {
            cms: CmsMode::Batch,
            ..config()
        });
        let statuses = run_utterance(&mut s, 5, 3, 15);
        assert!(statuses.iter().all(|st| *st != FrameStatus::Emitted));
        let end = frame(EndpointState::UtterEnd, 15);
        assert_eq!(s.process(None, &end), FrameStatus::Complete);
        assert_eq!(s.output().len(), 12);
    }

    #[test]
    fn trailing_silence_trimmed_at_end_of_input() {
        let mut s = stream(FeatureConfig {
            silence_drop: true,
            silence_drop_window: 2,
            delta: false,
            acceleration: false,
            ..config()
        });
        run_utterance(&mut s, 2, 1, 10);
        for i in 10..15 {
            let mut epd = frame(EndpointState::CoreSpeech, i + 1);
            epd.frame_class = FrameClass::Silence;
            s.process(Some(&[i as f32, 0.0, 1.0]), &epd);
        }
        s.process(None, &frame(EndpointState::UtterEnd, 15));
        // Frame 12 was dropped on arrival; the end-of-input pass trims 13
        // and 14 from the output.
        let last = s.output().last().map(|f| f.frame_index);
        assert_eq!(s.output().len(), 11);
        assert_eq!(last, Some(11));
        assert_eq!(s.take_counts().dropped, 3);
    }

    #[test]
    fn compression_halves_the_output() {
        let mut s = stream(FeatureConfig {
            compression: Compression::TwoToOne,
            ..config()
        });
        run_utterance(&mut s, 4, 4, 24);
        s.process(None, &frame(EndpointState::UtterEnd, 24));
        let counts = s.take_counts();
        assert_eq!(counts.emitted, 10);
        assert_eq!(counts.skipped, 10);
    }
}
