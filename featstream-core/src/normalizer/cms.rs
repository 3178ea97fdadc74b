//! Cepstral mean (and variance) normalization per voicing class.

use tracing::debug;

use crate::config::{CmsMode, FeatureConfig};
use crate::frame::FrameClass;
use crate::numeric::Scalar;

use super::seed::NormalizerSeed;

/// Variance floor applied before every square root.
pub const MIN_VAR: f32 = 0.01;
/// Prior weight of the current means when voicing classes are pooled.
const PRIOR_POOLED: u32 = 500;
/// Prior weight of the current means with class-dependent statistics.
const PRIOR_PER_CLASS: u32 = 1000;
/// Silence count that triggers an intermediate flush.
const FLUSH_COUNT: u32 = 3000;

const SIL: usize = 0;
const UNV: usize = 1;
const VOI: usize = 2;

/// Mean, inverse deviation and second moment of one voicing class.
#[derive(Debug, Clone)]
pub struct ClassStats<S: Scalar = f32> {
    pub mean: Vec<S>,
    pub inv_std: Vec<S>,
    pub moment: Vec<S>,
}

impl<S: Scalar> ClassStats<S> {
    fn from_seed(mean: &[f32], inv_std: &[f32]) -> Self {
        let mut stats = Self {
            mean: mean.iter().map(|&v| S::from_f32(v)).collect(),
            inv_std: inv_std.iter().map(|&v| S::from_f32(v)).collect(),
            moment: Vec::new(),
        };
        stats.refresh_moment();
        stats
    }

    /// E[x²] = var + mean², with var recovered from the inverse deviation.
    fn refresh_moment(&mut self) {
        self.moment = self
            .mean
            .iter()
            .zip(&self.inv_std)
            .map(|(&m, &s)| S::ONE / (s * s) + m * m)
            .collect();
    }

    fn recursive_update(&mut self, x: &[S], complement: S, variance: bool) {
        let keep = S::ONE - complement;
        let floor = S::from_f32(MIN_VAR);
        for (i, &v) in x.iter().enumerate() {
            self.mean[i] = keep * self.mean[i] + complement * v;
            if variance {
                self.moment[i] = keep * self.moment[i] + complement * v * v;
                let var = (self.moment[i] - self.mean[i] * self.mean[i]).max(floor);
                self.inv_std[i] = S::ONE / var.sqrt();
            }
        }
    }
}

/// Weighted per-class sums, sums of squares and frame counts.
#[derive(Debug, Clone)]
pub struct Accumulator<S: Scalar = f32> {
    pub sum: [Vec<S>; 3],
    pub sq: [Vec<S>; 3],
    pub count: [u32; 3],
}

impl<S: Scalar> Accumulator<S> {
    fn new(dim: usize) -> Self {
        Self {
            sum: std::array::from_fn(|_| vec![S::ZERO; dim]),
            sq: std::array::from_fn(|_| vec![S::ZERO; dim]),
            count: [0; 3],
        }
    }

    fn clear(&mut self) {
        for c in 0..3 {
            self.sum[c].iter_mut().for_each(|v| *v = S::ZERO);
            self.sq[c].iter_mut().for_each(|v| *v = S::ZERO);
        }
        self.count = [0; 3];
    }

    fn add(&mut self, class: usize, x: &[S], weight: u32) {
        let w = S::from_count(weight as usize);
        for (i, &v) in x.iter().enumerate() {
            self.sum[class][i] += w * v;
            self.sq[class][i] += w * v * v;
        }
        self.count[class] += weight;
    }

    /// Adds one frame with the class-dependent weights.
    fn add_frame(&mut self, class: FrameClass, x: &[S]) {
        match class {
            FrameClass::Silence => self.add(SIL, x, 2),
            FrameClass::Unvoiced => {
                self.add(SIL, x, 1);
                self.add(UNV, x, 2);
            }
            FrameClass::Voiced => self.add(VOI, x, 2),
            FrameClass::Mixed => {
                self.add(UNV, x, 1);
                self.add(VOI, x, 1);
            }
        }
    }
}

/// Per-class cepstral normalizer.
#[derive(Debug, Clone)]
pub struct CepstralNormalizer<S: Scalar = f32> {
    mode: CmsMode,
    variance: bool,
    with_vad: bool,
    use_silence_mean: bool,
    forget_voiced: S,
    forget_unvoiced: S,
    stats: [ClassStats<S>; 3],
    acc: Accumulator<S>,
}

impl<S: Scalar> CepstralNormalizer<S> {
    /// `seed` must already be validated for `config.dim_mfcc - 1`.
    pub fn new(config: &FeatureConfig, seed: &NormalizerSeed) -> Self {
        let dim = config.dim_mfcc - 1;
        let mut cms = Self {
            mode: config.cms,
            variance: config.cms_variance,
            with_vad: config.cms_with_vad,
            use_silence_mean: config.use_silence_mean,
            forget_voiced: S::from_f32(config.forget_voiced),
            forget_unvoiced: S::from_f32(config.forget_unvoiced),
            stats: [
                ClassStats::from_seed(&seed.mean_silence, &seed.inv_std_silence),
                ClassStats::from_seed(&seed.mean_unvoiced, &seed.inv_std_unvoiced),
                ClassStats::from_seed(&seed.mean_voiced, &seed.inv_std_voiced),
            ],
            acc: Accumulator::new(dim),
        };
        cms.reseed();
        cms
    }

    pub fn mode(&self) -> CmsMode {
        self.mode
    }

    pub fn stats(&self, class: FrameClass) -> &ClassStats<S> {
        &self.stats[slot(class)]
    }

    pub fn accumulator(&self) -> &Accumulator<S> {
        &self.acc
    }

    /// Inverse deviations of voiced frames, used as distance weights.
    pub fn voiced_inv_std(&self) -> &[S] {
        &self.stats[VOI].inv_std
    }

    fn prior(&self) -> u32 {
        if self.with_vad {
            PRIOR_PER_CLASS
        } else {
            PRIOR_POOLED
        }
    }

    /// Prepares the accumulator for a new utterance.
    pub fn begin_utterance(&mut self) {
        if self.mode == CmsMode::Batch {
            self.acc.clear();
        }
    }

    /// Seeds the accumulator from the current statistics so that the next
    /// flush blends old and new data.
    fn reseed(&mut self) {
        match self.mode {
            CmsMode::Live | CmsMode::Recursive => {
                let prior = self.prior();
                let w = S::from_count(prior as usize);
                for c in 0..3 {
                    let stats = &self.stats[c];
                    for i in 0..stats.mean.len() {
                        let m = stats.mean[i];
                        let s = stats.inv_std[i];
                        self.acc.sum[c][i] = w * m;
                        self.acc.sq[c][i] = w * (m * m + S::ONE / (s * s));
                    }
                    self.acc.count[c] = prior;
                }
            }
            CmsMode::Batch | CmsMode::None => self.acc.clear(),
        }
    }

    /// Normalizes `out` in place using the statistics of `class`.
    fn correct(&self, class: FrameClass, out: &mut [S]) {
        let scaled = |stats: &ClassStats<S>, i: usize, v: S| {
            let d = v - stats.mean[i];
            if self.variance {
                d * stats.inv_std[i]
            } else {
                d
            }
        };
        match class {
            FrameClass::Mixed => {
                let half = S::from_f32(0.5);
                for (i, v) in out.iter_mut().enumerate() {
                    *v = half * (scaled(&self.stats[UNV], i, *v) + scaled(&self.stats[VOI], i, *v));
                }
            }
            other => {
                let stats = &self.stats[slot(other)];
                for (i, v) in out.iter_mut().enumerate() {
                    *v = scaled(stats, i, *v);
                }
            }
        }
    }

    /// Frame-synchronous stage. `out` holds a copy of the cepstra and is
    /// normalized in place for live and recursive modes.
    pub fn process(&mut self, class: FrameClass, out: &mut [S]) {
        match self.mode {
            CmsMode::None => {}
            CmsMode::Batch => self.acc.add_frame(class, out),
            CmsMode::Live => {
                self.acc.add_frame(class, out);
                self.correct(class, out);
            }
            CmsMode::Recursive => {
                let x = out.to_vec();
                self.acc.add_frame(class, &x);
                if self.with_vad {
                    self.correct(class, out);
                    self.recursive_update(class, &x);
                } else {
                    // A single statistic, kept in the voiced slot.
                    self.correct(FrameClass::Voiced, out);
                    if class != FrameClass::Silence || self.use_silence_mean {
                        let complement = S::ONE - self.forget_voiced;
                        self.stats[VOI].recursive_update(&x, complement, self.variance);
                    }
                }
            }
        }
        if self.mode != CmsMode::Batch && self.acc.count[SIL] >= FLUSH_COUNT {
            debug!(count = self.acc.count[SIL], "intermediate cepstral mean flush");
            self.flush();
        }
    }

    fn recursive_update(&mut self, class: FrameClass, x: &[S]) {
        let half = S::from_f32(0.5);
        let unvoiced = S::ONE - self.forget_unvoiced;
        let voiced = S::ONE - self.forget_voiced;
        let variance = self.variance;
        match class {
            FrameClass::Silence => self.stats[SIL].recursive_update(x, unvoiced, variance),
            FrameClass::Unvoiced => self.stats[UNV].recursive_update(x, unvoiced, variance),
            FrameClass::Voiced => self.stats[VOI].recursive_update(x, voiced, variance),
            FrameClass::Mixed => {
                self.stats[UNV].recursive_update(x, half * unvoiced, variance);
                self.stats[VOI].recursive_update(x, half * voiced, variance);
            }
        }
    }

    /// Applies the utterance statistics to a buffered vector.
    pub fn apply_batch(&self, class: FrameClass, out: &mut [S]) {
        if self.mode != CmsMode::None {
            self.correct(class, out);
        }
    }

    /// Folds the accumulator into the statistics.
    pub fn flush(&mut self) {
        if self.mode == CmsMode::None {
            return;
        }
        let floor = S::from_f32(MIN_VAR);
        let inv_std = |sq: S, count: S, mean: S| {
            let var = (sq / count - mean * mean).max(floor);
            S::ONE / var.sqrt()
        };

        if self.with_vad {
            for c in 0..3 {
                let n = self.acc.count[c];
                if n == 0 {
                    continue;
                }
                let count = S::from_count(n as usize);
                let stats = &mut self.stats[c];
                for i in 0..stats.mean.len() {
                    stats.mean[i] = self.acc.sum[c][i] / count;
                    if self.variance {
                        stats.inv_std[i] = inv_std(self.acc.sq[c][i], count, stats.mean[i]);
                    }
                }
            }
        } else {
            let classes: &[usize] = if self.use_silence_mean {
                &[SIL, UNV, VOI]
            } else {
                &[UNV, VOI]
            };
            let n: u32 = classes.iter().map(|&c| self.acc.count[c]).sum();
            if n > 0 {
                let count = S::from_count(n as usize);
                let dim = self.stats[SIL].mean.len();
                for i in 0..dim {
                    let mut sum = S::ZERO;
                    let mut sq = S::ZERO;
                    for &c in classes {
                        sum += self.acc.sum[c][i];
                        sq += self.acc.sq[c][i];
                    }
                    let mean = sum / count;
                    let inv = inv_std(sq, count, mean);
                    for stats in self.stats.iter_mut() {
                        stats.mean[i] = mean;
                        if self.variance {
                            stats.inv_std[i] = inv;
                        }
                    }
                }
            }
        }
        if self.variance {
            self.stats.iter_mut().for_each(ClassStats::refresh_moment);
        }
        self.reseed();
    }

    /// Writes the statistics into `seed`, leaving its energy range alone.
    pub fn export(&self, seed: &mut NormalizerSeed) {
        let to_f32 = |v: &[S]| v.iter().map(|x| x.to_f32()).collect::<Vec<f32>>();
        seed.mean_silence = to_f32(&self.stats[SIL].mean);
        seed.mean_unvoiced = to_f32(&self.stats[UNV].mean);
        seed.mean_voiced = to_f32(&self.stats[VOI].mean);
        seed.inv_std_silence = to_f32(&self.stats[SIL].inv_std);
        seed.inv_std_unvoiced = to_f32(&self.stats[UNV].inv_std);
        seed.inv_std_voiced = to_f32(&self.stats[VOI].inv_std);
    }
}

fn slot(class: FrameClass) -> usize {
    match class {
        FrameClass::Silence => SIL,
        FrameClass::Unvoiced => UNV,
        // Mixed frames borrow the voiced statistics where a single class is needed.
        FrameClass::Mixed | FrameClass::Voiced => VOI,
    }
}
