//! Log-energy gain control.

use crate::config::AgcMode;
use crate::numeric::Scalar;

const ENERGY_SCALE: f32 = 0.1;
const ENERGY_RANGE: f32 = 15.0;
const ENERGY_FLOOR: f32 = 11.0;

/// Maps log-energy to `scale * (max(e, floor) - max) + 1` against the
/// loudest frame seen.
#[derive(Debug, Clone)]
pub struct GainControl<S: Scalar = f32> {
    mode: AgcMode,
    max: S,
    min: S,
    running_max: S,
}

impl<S: Scalar> GainControl<S> {
    pub fn new(mode: AgcMode, max_log_energy: f32, min_log_energy: f32) -> Self {
        let mut agc = Self {
            mode,
            max: S::from_f32(max_log_energy),
            min: S::from_f32(min_log_energy),
            running_max: S::ZERO,
        };
        agc.begin_utterance();
        agc
    }

    pub fn mode(&self) -> AgcMode {
        self.mode
    }

    pub fn max(&self) -> S {
        self.max
    }

    pub fn min(&self) -> S {
        self.min
    }

    pub fn begin_utterance(&mut self) {
        self.running_max = match self.mode {
            AgcMode::Live => self.max,
            AgcMode::Batch | AgcMode::None => S::ZERO,
        };
        if self.mode == AgcMode::Live {
            self.min = self.max - S::from_f32(ENERGY_RANGE);
        }
    }

    /// Frame-synchronous stage: tracks the maximum and, in live mode,
    /// rewrites `energy`.
    pub fn process(&mut self, energy: &mut S) {
        match self.mode {
            AgcMode::None => {}
            AgcMode::Batch => self.running_max = self.running_max.max(*energy),
            AgcMode::Live => {
                self.running_max = self.running_max.max(*energy);
                let e = energy.max(S::from_f32(ENERGY_FLOOR));
                *energy = S::from_f32(ENERGY_SCALE) * (e - self.max) + S::ONE;
            }
        }
    }

    /// Second pass over a buffered utterance after [`flush`](Self::flush).
    pub fn apply_batch(&self, energy: &mut S) {
        let e = energy.max(self.min);
        *energy = S::from_f32(ENERGY_SCALE) * (e - self.max) + S::ONE;
    }

    /// Adopts the running maximum as the new reference.
    pub fn flush(&mut self) {
        if self.mode == AgcMode::None {
            return;
        }
        self.max = self.running_max;
        self.min = self.max - S::from_f32(ENERGY_RANGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_normalizes_against_seed_max() {
        let mut agc = GainControl::<f32>::new(AgcMode::Live, 21.0, 6.0);
        let mut e = 21.0;
        agc.process(&mut e);
        assert!((e - 1.0).abs() < 1e-6);
        // Below the floor.
        let mut e = 5.0;
        agc.process(&mut e);
        assert!((e - 0.0).abs() < 1e-6, "e={e}");
        let mut e = 25.0;
        agc.process(&mut e);
        agc.flush();
        assert_eq!(agc.max(), 25.0);
        assert_eq!(agc.min(), 10.0);
    }

    #[test]
    fn batch_defers_until_flush() {
        let mut agc = GainControl::<f32>::new(AgcMode::Batch, 0.0, 0.0);
        let mut frames = [12.0f32, 20.0, 4.0];
        for e in frames.iter_mut() {
            let before = *e;
            agc.process(e);
            assert_eq!(*e, before);
        }
        agc.flush();
        for e in frames.iter_mut() {
            agc.apply_batch(e);
        }
        assert!((frames[1] - 1.0).abs() < 1e-6);
        assert!((frames[0] - 0.2).abs() < 1e-6);
        // Clamped at max - 15.
        assert!((frames[2] - -0.5).abs() < 1e-6);
    }

    #[test]
    fn none_leaves_state_alone() {
        let mut agc = GainControl::<f32>::new(AgcMode::None, 18.0, 3.0);
        let mut e = 30.0;
        agc.process(&mut e);
        agc.flush();
        assert_eq!(e, 30.0);
        assert_eq!(agc.max(), 18.0);
    }
}
