//! Time-derivative feature blocks computed from ring context.
//!
//! Context cells are found by walking outwards from the target cell while the
//! neighbours belong to the current utterance. Cells that were dropped or
//! merged still count as context; only never-written cells are passed over.

use crate::config::FeatureConfig;
use crate::numeric::Scalar;
use crate::stream::{CellActivity, StreamBuffer};

/// Result of finalizing one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Derived<S> {
    Vector(Vec<S>),
    /// Removed by silence dropping.
    Dropped,
    /// Merged by frame compression.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct DerivativeComputer {
    dim_mfcc: usize,
    static_dim: usize,
    delta: Option<usize>,
    acceleration: Option<usize>,
    third: Option<usize>,
    /// Vectors produced in the current utterance.
    emitted: usize,
}

impl DerivativeComputer {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            dim_mfcc: config.dim_mfcc,
            static_dim: config.static_dim(),
            delta: config.delta.then_some(config.delta_window),
            acceleration: config.acceleration.then_some(config.acceleration_window),
            third: config.third_diff.then_some(config.third_diff_window),
            emitted: 0,
        }
    }

    pub fn output_dim(&self) -> usize {
        let blocks = [self.delta, self.acceleration, self.third]
            .iter()
            .filter(|w| w.is_some())
            .count();
        self.static_dim + blocks * self.dim_mfcc
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Starts a new utterance; the left context may not reach behind it.
    pub fn begin_utterance(&mut self) {
        self.emitted = 0;
    }

    pub fn compute<S: Scalar>(&mut self, buf: &StreamBuffer<S>, pos: i64) -> Derived<S> {
        let center = buf.cell(pos);
        match center.activity {
            CellActivity::Active => {}
            CellActivity::Dropped => return Derived::Dropped,
            CellActivity::Skipped | CellActivity::Null => return Derived::Skipped,
        }

        let mut out = Vec::with_capacity(self.output_dim());
        out.extend_from_slice(&center.feat[..self.static_dim]);

        if let Some(win) = self.delta {
            let left = self.left_context(buf, pos, win);
            let right = right_context(buf, pos, win);
            let (l, r) = (&buf.cell(left[0]).raw, &buf.cell(right[0]).raw);
            out.extend((0..self.dim_mfcc).map(|i| l[i] - r[i]));
        }

        if let Some(win) = self.acceleration {
            let left = self.left_context(buf, pos, win);
            let right = right_context(buf, pos, win);
            let (l, r, c) = (
                &buf.cell(left[0]).raw,
                &buf.cell(right[0]).raw,
                &center.raw,
            );
            let two = S::from_f32(2.0);
            out.extend((0..self.dim_mfcc).map(|i| l[i] + r[i] - two * c[i]));
        }

        if let Some(win) = self.third {
            // Left points: furthest, within three steps, nearest.
            let left = self.left_context(buf, pos, win);
            let right = right_context(buf, pos, win);
            let ctx = [
                &buf.cell(left[0]).raw,
                &buf.cell(left[1]).raw,
                &buf.cell(left[2]).raw,
                &buf.cell(right[2]).raw,
                &buf.cell(right[1]).raw,
                &buf.cell(right[0]).raw,
            ];
            let two = S::from_f32(2.0);
            out.extend((0..self.dim_mfcc).map(|i| {
                ctx[0][i] - ctx[1][i] - two * ctx[2][i] + two * ctx[3][i] + ctx[4][i] - ctx[5][i]
            }));
        }

        self.emitted += 1;
        Derived::Vector(out)
    }

    /// Backward context as `[furthest, within three steps, nearest]`.
    fn left_context<S: Scalar>(&self, buf: &StreamBuffer<S>, pos: i64, win: usize) -> [i64; 3] {
        let mut ctx = [pos; 3];
        let steps = win.min(self.emitted);
        for step in 0..steps {
            let p = pos - 1 - step as i64;
            let cell = buf.cell(p);
            if p < buf.oldest() || !cell.speech {
                break;
            }
            if cell.activity != CellActivity::Null {
                record(&mut ctx, p, step);
            }
        }
        ctx
    }
}

/// Forward context as `[furthest, within three steps, nearest]`.
fn right_context<S: Scalar>(buf: &StreamBuffer<S>, pos: i64, win: usize) -> [i64; 3] {
    let mut ctx = [pos; 3];
    let index = buf.cell(pos).index;
    for step in 0..win {
        let p = pos + 1 + step as i64;
        let cell = buf.cell(p);
        if p >= buf.written() || cell.index <= index || !cell.speech {
            break;
        }
        if cell.activity != CellActivity::Null {
            record(&mut ctx, p, step);
        }
    }
    ctx
}

fn record(ctx: &mut [i64; 3], p: i64, step: usize) {
    if step == 0 {
        ctx[2] = p;
    }
    if step <= 2 {
        ctx[1] = p;
    }
    ctx[0] = p;
}
