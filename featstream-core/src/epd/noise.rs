//! Adaptive noise baseline, entropy thresholds and SNR statistics.

use crate::numeric::Scalar;

use super::EndpointState;

/// Frames used to bootstrap the baseline directly from the signal.
pub const BOOTSTRAP_FRAMES: u64 = 8;
const SNR_COUNT_CAP: u32 = 512;

/// Energy band edges with their step margin and the lower/upper thresholds
/// used in trailing silence and in every other state.
const BANDS: [(f32, f32, [f32; 2], [f32; 2]); 4] = [
    (16.0, 2.0, [0.05, 0.10], [0.03, 0.06]),
    (18.0, 1.5, [0.04, 0.08], [0.02, 0.05]),
    (20.0, 1.2, [0.03, 0.06], [0.02, 0.04]),
    (f32::INFINITY, 1.0, [0.02, 0.05], [0.01, 0.03]),
];

/// Tracks the noise energy/power baseline and derives the entropy
/// thresholds from it.
#[derive(Debug, Clone)]
pub struct NoiseTracker<S: Scalar = f32> {
    pub energy: S,
    pub power: S,
    pub lower: S,
    pub upper: S,
}

impl<S: Scalar> Default for NoiseTracker<S> {
    fn default() -> Self {
        Self {
            energy: S::ZERO,
            power: S::ZERO,
            lower: S::ZERO,
            upper: S::ZERO,
        }
    }
}

impl<S: Scalar> NoiseTracker<S> {
    pub fn update(
        &mut self,
        frame_index: u64,
        state: EndpointState,
        entropy: S,
        energy: S,
        power: S,
    ) {
        let k = S::from_f32;
        let noise_like = entropy < k(0.015);
        let (lower, upper);
        if frame_index < BOOTSTRAP_FRAMES {
            if frame_index == 0 {
                self.energy = energy;
                self.power = power;
            } else if noise_like && energy - self.energy < k(3.0) {
                self.energy = self.energy.max(energy);
                self.power = self.power.max(power);
            }
            lower = k(0.04);
            upper = k(0.9);
        } else {
            let &(_, margin, trailing, other) = BANDS
                .iter()
                .find(|(edge, ..)| self.energy < k(*edge))
                .unwrap_or(&BANDS[BANDS.len() - 1]);
            let [lo, up] = if state == EndpointState::TrailingSilence {
                trailing
            } else {
                other
            };
            lower = k(lo);
            upper = k(up);

            if noise_like {
                let margin = k(margin);
                let d_energy = energy - self.energy;
                let d_power = power - self.power;
                if d_power < margin && d_energy < margin && d_energy > S::ZERO {
                    self.energy += d_energy * k(0.03);
                    self.power += d_power * k(0.03);
                } else if d_energy < S::ZERO {
                    self.energy += d_energy * k(0.01);
                    self.power += d_power * k(0.01);
                }
            }
        }
        self.energy = self.energy.max(k(13.0)).min(k(20.0));
        self.power = self.power.max(k(9.0));
        self.lower = k(0.01) + lower;
        self.upper = k(0.01) + upper;
    }
}

/// Running log-power sums for speech and noise frames.
#[derive(Debug, Clone)]
pub struct SnrStats<S: Scalar = f32> {
    speech_sum: S,
    speech_count: u32,
    noise_sum: S,
    noise_count: u32,
}

impl<S: Scalar> Default for SnrStats<S> {
    fn default() -> Self {
        Self {
            speech_sum: S::ZERO,
            speech_count: 0,
            noise_sum: S::ZERO,
            noise_count: 0,
        }
    }
}

impl<S: Scalar> SnrStats<S> {
    pub fn add_speech(&mut self, power: S) {
        self.speech_sum += power;
        self.speech_count += 1;
        if self.speech_count >= SNR_COUNT_CAP {
            self.speech_sum = self.speech_sum * S::from_f32(0.5);
            self.speech_count /= 2;
        }
    }

    pub fn add_noise(&mut self, power: S) {
        self.noise_sum += power;
        self.noise_count += 1;
        if self.noise_count >= SNR_COUNT_CAP {
            self.noise_sum = self.noise_sum * S::from_f32(0.5);
            self.noise_count /= 2;
        }
    }

    pub fn noise_count(&self) -> u32 {
        self.noise_count
    }

    /// Mean noise log-power, or `None` before any noise frame.
    pub fn noise_mean(&self) -> Option<S> {
        (self.noise_count > 0).then(|| self.noise_sum / S::from_count(self.noise_count as usize))
    }

    pub fn speech_mean(&self) -> Option<S> {
        (self.speech_count > 0)
            .then(|| self.speech_sum / S::from_count(self.speech_count as usize))
    }

    /// Signal-to-noise ratio in dB, or `None` before any noise frame.
    pub fn snr(&self) -> Option<f32> {
        let noise = self.noise_mean()?.to_f32();
        let speech = self.speech_mean().map(|s| s.to_f32()).unwrap_or(0.0);
        let scale = 10.0 * std::f32::consts::LN_2 / (16.0 * std::f32::consts::LN_10);
        Some(scale * (speech - noise))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
