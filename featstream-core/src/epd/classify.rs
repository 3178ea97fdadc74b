//! Entropy compensation and state-dependent frame-class refinement.

use crate::frame::FrameClass;
use crate::numeric::Scalar;

use super::noise::SnrStats;
use super::EndpointState;

/// Entropy assigned to frames with no plausible speech.
pub const ENTROPY_FLOOR: f32 = 0.01;
/// Noise power above which trailing silence is judged noisy.
const NOISY_POWER: f32 = 120.0;

/// Per-frame values shared by compensation and refinement.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<S: Scalar> {
    pub entropy: S,
    pub energy: S,
    pub power: S,
    pub vad: FrameClass,
    pub speech_plausible: bool,
}

/// Boosts the entropy of frames that clearly rise above the noise baseline,
/// and floors it when no speech is plausible.
pub fn compensate_entropy<S: Scalar>(
    view: &FrameView<S>,
    d_energy: S,
    d_power: S,
    state: EndpointState,
    frame_index: u64,
    pause: u32,
) -> S {
    let k = S::from_f32;
    let entropy = view.entropy;
    if !view.speech_plausible || view.vad == FrameClass::Silence {
        return k(ENTROPY_FLOOR);
    }
    let active = frame_index > 20
        && state > EndpointState::LeadingSilence
        && (d_energy > k(4.0) || d_power > k(4.0))
        && view.vad >= FrameClass::Mixed
        && pause < 30;
    if !active {
        return entropy;
    }

    let weight = if state == EndpointState::TrailingSilence && pause >= 20 {
        if view.vad == FrameClass::Voiced && entropy > k(0.03) {
            S::ONE + d_energy / k(8.0)
        } else {
            S::ONE + d_energy / k(40.0)
        }
    } else if d_energy > k(4.0)
        && d_power > k(4.0)
        && view.vad == FrameClass::Voiced
        && entropy > k(0.02)
    {
        S::ONE + d_energy.max(d_power) / k(4.0)
    } else {
        S::ONE + d_energy.max(d_power) / k(8.0)
    };
    entropy * weight
}

/// Recomputes the frame class from the compensated entropy using the
/// thresholds of the current state.
pub fn refine_frame_class<S: Scalar>(
    view: &FrameView<S>,
    state: EndpointState,
    pause: u32,
    snr: &SnrStats<S>,
) -> FrameClass {
    let k = S::from_f32;
    let FrameView {
        entropy,
        energy,
        vad,
        speech_plausible,
        ..
    } = *view;
    let mut level = vad.level();

    match state {
        EndpointState::UtterStart => level = FrameClass::Silence.level(),
        EndpointState::UtterEnd => {}
        EndpointState::LeadingSilence => {
            let noise_power = if snr.noise_count() >= 4 {
                snr.noise_mean().unwrap_or(k(NOISY_POWER))
            } else {
                k(NOISY_POWER)
            };
            if speech_plausible {
                if noise_power >= k(NOISY_POWER) {
                    if entropy >= k(0.25) && energy >= k(20.0) {
                        level += 1;
                    }
                } else if entropy >= k(0.2) && energy >= k(20.0) {
                    level = FrameClass::Voiced.level();
                }
            } else if vad != FrameClass::Silence {
                if entropy <= k(0.01) {
                    level = FrameClass::Silence.level();
                } else if entropy < k(0.05) {
                    level = FrameClass::Unvoiced.level();
                } else if entropy < k(0.1) {
                    level -= 1;
                }
                level = level.min(FrameClass::Mixed.level());
            }
        }
        EndpointState::CoreSpeech => {
            if vad != FrameClass::Silence {
                if entropy <= k(0.01) {
                    level -= 1;
                }
                if entropy >= k(0.2) && energy >= k(20.0) {
                    level += 1;
                }
            }
        }
        EndpointState::TrailingSilence => {
            if vad != FrameClass::Silence {
                let noise_power = snr.noise_mean().unwrap_or(k(NOISY_POWER));
                if !speech_plausible {
                    if entropy <= k(0.01) {
                        level = FrameClass::Silence.level();
                    } else if entropy < k(0.05) {
                        level = FrameClass::Unvoiced.level();
                    } else if entropy < k(0.1) {
                        level -= 1;
                    }
                } else if noise_power > k(NOISY_POWER) {
                    if vad >= FrameClass::Mixed && energy >= k(22.0) && entropy > k(0.05) {
                        level = FrameClass::Voiced.level();
                    } else if energy >= k(20.0) && entropy >= k(0.3) {
                        level += 1;
                    } else if entropy <= k(0.01)
                        || (entropy < k(0.05) && pause >= 3)
                        || (vad == FrameClass::Voiced && entropy < k(0.15))
                    {
                        level -= 1;
                    }
                } else if entropy <= k(0.01) && energy < k(18.0) {
                    level -= 1;
                } else if energy >= k(20.0) || entropy >= k(0.2) {
                    level += 1;
                }
            }
        }
    }
    FrameClass::from_level(level)
}
