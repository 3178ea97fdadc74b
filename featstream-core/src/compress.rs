//! Frame compression: fixed-ratio merging of adjacent frames and adaptive
//! variable-frame-rate merging of near-duplicates.

use std::collections::VecDeque;

use crate::config::{Compression, FeatureConfig};
use crate::numeric::Scalar;
use crate::stream::{CellActivity, StreamBuffer};

/// `w·x + (1−w)·y` on all dimensions but the last, which takes the max.
pub fn interpolate<S: Scalar>(x: &[S], y: &[S], weight: S) -> Vec<S> {
    let last = x.len().saturating_sub(1);
    x.iter()
        .zip(y)
        .enumerate()
        .map(|(i, (&a, &b))| {
            if i == last {
                a.max(b)
            } else {
                weight * a + (S::ONE - weight) * b
            }
        })
        .collect()
}

/// Weighted squared distance over the first `len` dimensions.
pub fn weighted_distance<S: Scalar>(x: &[S], y: &[S], weights: &[S], len: usize) -> S {
    x.iter()
        .zip(y)
        .zip(weights)
        .take(len)
        .fold(S::ZERO, |acc, ((&a, &b), &w)| {
            let d = (a - b) * w;
            acc + d * d
        })
}

#[derive(Debug, Clone)]
pub struct FrameCompressor<S: Scalar = f32> {
    mode: Compression,
    distance: S,
    max_run: usize,
    /// Frames compressed since the stream was reset.
    counter: u64,
    /// Positions of preceding frames, newest first.
    history: VecDeque<i64>,
}

impl<S: Scalar> FrameCompressor<S> {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            mode: config.compression,
            distance: S::from_f32(config.vfr_distance),
            max_run: config.vfr_max_run.max(1),
            counter: 0,
            history: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> Compression {
        self.mode
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.history.clear();
    }

    /// Sets the static block of the cell at `pos` from its normalized
    /// vector, merging it with its predecessors according to the mode.
    pub fn compress(&mut self, buf: &mut StreamBuffer<S>, pos: i64, weights: &[S]) {
        let n = self.counter;
        self.counter += 1;
        {
            let cur = buf.cell_mut(pos);
            cur.feat.clone_from(&cur.norm);
        }
        let prev = self.history.front().copied();
        let half = S::from_f32(0.5);

        match self.mode {
            Compression::None => {}
            Compression::FiveToFour => match prev {
                Some(p) if n % 5 != 0 => {
                    let merged = interpolate(&buf.cell(p).norm, &buf.cell(pos).norm, half);
                    let prev_class = buf.cell(p).class;
                    let cur = buf.cell_mut(pos);
                    cur.feat = merged;
                    if n % 5 == 1 {
                        cur.class = cur.class.max(prev_class);
                    }
                }
                _ => buf.cell_mut(pos).activity = CellActivity::Skipped,
            },
            Compression::FourToThree => self.merge_into_previous(buf, prev, pos, n % 4 == 2),
            Compression::FiveToThree => {
                self.merge_into_previous(buf, prev, pos, matches!(n % 5, 1 | 4))
            }
            Compression::TwoToOne => self.merge_into_previous(buf, prev, pos, n % 2 == 1),
            Compression::VariableRate => {
                if prev.is_some() {
                    self.variable_rate(buf, pos, weights);
                }
            }
        }

        self.history.push_front(pos);
        self.history.truncate(self.max_run);
    }

    fn merge_into_previous(
        &self,
        buf: &mut StreamBuffer<S>,
        prev: Option<i64>,
        pos: i64,
        merge: bool,
    ) {
        let Some(p) = prev else { return };
        if !merge {
            return;
        }
        let merged = interpolate(&buf.cell(p).norm, &buf.cell(pos).norm, S::from_f32(0.5));
        let cur_class = buf.cell(pos).class;
        buf.cell_mut(pos).activity = CellActivity::Skipped;
        let prev_cell = buf.cell_mut(p);
        prev_cell.feat = merged;
        prev_cell.class = prev_cell.class.max(cur_class);
    }

    fn variable_rate(&self, buf: &mut StreamBuffer<S>, pos: i64, weights: &[S]) {
        let half = S::from_f32(0.5);
        let cepstra = buf.cell(pos).raw.len().saturating_sub(1);
        let active = self
            .history
            .iter()
            .copied()
            .find(|&p| buf.cell(p).activity != CellActivity::Skipped);
        let prev = self.history.front().copied();

        if let Some(active_pos) = active {
            let mut dropped = 0usize;
            let mut close = true;
            for &p in &self.history {
                let d = weighted_distance(&buf.cell(pos).raw, &buf.cell(p).raw, weights, cepstra);
                dropped += 1;
                if d >= self.distance {
                    close = false;
                    break;
                }
                if p == active_pos {
                    break;
                }
            }
            if close {
                let w = S::from_count(dropped) / S::from_count(dropped + 1);
                let merged = interpolate(&buf.cell(active_pos).norm, &buf.cell(pos).norm, w);
                let cur_class = buf.cell(pos).class;
                buf.cell_mut(pos).activity = CellActivity::Skipped;
                let target = buf.cell_mut(active_pos);
                target.feat = merged;
                target.class = target.class.max(cur_class);
                return;
            }
        }

        // Not merged: smooth the predecessor towards the current frame.
        if let Some(p) = prev {
            if buf.cell(p).activity != CellActivity::Skipped {
                let merged = interpolate(&buf.cell(p).norm, &buf.cell(pos).norm, half);
                buf.cell_mut(p).feat = merged;
            }
        }
    }
}
