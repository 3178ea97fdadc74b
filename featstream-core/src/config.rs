//! Typed configuration for the front-end.
//!
//! Everything here is validated once at session open. Unknown mode strings
//! are rejected by serde while parsing, and invalid combinations by
//! [`FrontendConfig::validate`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FrontendError, Result};

/// Largest supported median window.
pub const MAX_MEDIAN_WINDOW: usize = 8;
/// Largest supported variable-frame-rate run.
pub const MAX_VFR_RUN: usize = 8;

/// Cepstral mean normalization mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CmsMode {
    #[default]
    None,
    /// Accumulate over the utterance, subtract in a second pass at its end.
    Batch,
    /// Subtract the running class means frame by frame.
    Live,
    /// Exponential-forgetting update per frame.
    Recursive,
}

/// Log-energy gain control mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgcMode {
    #[default]
    None,
    Batch,
    Live,
}

/// Frame compression mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Compression {
    #[default]
    None,
    FiveToFour,
    FourToThree,
    FiveToThree,
    TwoToOne,
    VariableRate,
}

/// Endpoint detector settings. All durations are in frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EpdConfig {
    /// Voiced run length that confirms an onset. Default: 3.
    pub onset_frames: usize,
    /// Pause length that ends an utterance. Default: 40.
    pub end_pause_frames: usize,
    /// Pause length beyond which a renewed onset no longer cancels the end.
    /// Default: 40.
    pub mid_pause_frames: usize,
    /// Minimum utterance length. Default: 20.
    pub min_speech_frames: usize,
    /// Minimum voiced length. Default: 15.
    pub min_voiced_frames: usize,
    /// Frames kept before the detected onset. Default: 10.
    pub begin_margin_frames: usize,
    /// Frames kept after the detected end. Default: 10.
    pub end_margin_frames: usize,
    /// Median smoothing window over entropy. Default: 8.
    pub median_window: usize,
    /// Keep the frame counter running across utterances. Default: true.
    pub continuous: bool,
    /// Frames to wait for an onset before reporting a timeout. Default: 1000.
    pub max_wait_frames: usize,
    /// Longest utterance before reporting it as too long. Default: 3000.
    pub max_speech_frames: usize,
    /// SNR below which an utterance is reported as too soft. Default: 2.5.
    pub soft_snr_threshold: f32,
}

impl Default for EpdConfig {
    fn default() -> Self {
        Self {
            onset_frames: 3,
            end_pause_frames: 40,
            mid_pause_frames: 40,
            min_speech_frames: 20,
            min_voiced_frames: 15,
            begin_margin_frames: 10,
            end_margin_frames: 10,
            median_window: 8,
            continuous: true,
            max_wait_frames: 1000,
            max_speech_frames: 3000,
            soft_snr_threshold: 2.5,
        }
    }
}

/// Feature conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureConfig {
    /// Cepstral dimension including the trailing log-energy. Default: 13.
    pub dim_mfcc: usize,
    /// Default: none.
    pub cms: CmsMode,
    /// Also normalize variance (CMVN). Default: false.
    pub cms_variance: bool,
    /// Keep separate statistics per voicing class. Default: true.
    pub cms_with_vad: bool,
    /// Pool silence frames into class-independent statistics. Default: true.
    pub use_silence_mean: bool,
    /// Default: none.
    pub agc: AgcMode,
    /// Default: none.
    pub compression: Compression,
    /// Emit the log-energy term in the static block. Default: true.
    pub use_log_energy: bool,
    pub delta: bool,
    /// Default: 2.
    pub delta_window: usize,
    pub acceleration: bool,
    /// Default: 4.
    pub acceleration_window: usize,
    pub third_diff: bool,
    /// Default: 5.
    pub third_diff_window: usize,
    /// Drop long runs of silence frames. Default: true.
    pub silence_drop: bool,
    /// Default: 5.
    pub silence_drop_window: usize,
    /// Also drop silence frames inside a resumed utterance. Default: false.
    pub silence_drop_in_speech: bool,
    /// Recursive forgetting factor for voiced frames. Default: 0.98.
    pub forget_voiced: f32,
    /// Recursive forgetting factor for silence/unvoiced frames. Default: 0.98.
    pub forget_unvoiced: f32,
    /// Weighted distance threshold for variable-rate merging. Default: 20.0.
    pub vfr_distance: f32,
    /// Longest run merged by variable-rate compression. Default: 1.
    pub vfr_max_run: usize,
    /// Cells in the stream ring. Default: 128.
    pub ring_capacity: usize,
    /// Output vectors kept per utterance. Default: 3000.
    pub max_output_frames: usize,
    /// Quantize output vectors to single bytes. Default: false.
    pub quantize: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            dim_mfcc: 13,
            cms: CmsMode::None,
            cms_variance: false,
            cms_with_vad: true,
            use_silence_mean: true,
            agc: AgcMode::None,
            compression: Compression::None,
            use_log_energy: true,
            delta: true,
            delta_window: 2,
            acceleration: true,
            acceleration_window: 4,
            third_diff: false,
            third_diff_window: 5,
            silence_drop: true,
            silence_drop_window: 5,
            silence_drop_in_speech: false,
            forget_voiced: 0.98,
            forget_unvoiced: 0.98,
            vfr_distance: 20.0,
            vfr_max_run: 1,
            ring_capacity: 128,
            max_output_frames: 3000,
            quantize: false,
        }
    }
}

impl FeatureConfig {
    /// Length of the static block.
    pub fn static_dim(&self) -> usize {
        if self.use_log_energy {
            self.dim_mfcc
        } else {
            self.dim_mfcc - 1
        }
    }

    pub fn derivative_blocks(&self) -> usize {
        [self.delta, self.acceleration, self.third_diff]
            .iter()
            .filter(|&&on| on)
            .count()
    }

    /// Dimension of each emitted feature vector.
    pub fn output_dim(&self) -> usize {
        self.static_dim() + self.dim_mfcc * self.derivative_blocks()
    }

    /// Distance between the write cursor and the cell being finalized.
    pub fn delay(&self) -> usize {
        let mut delay = if self.third_diff {
            self.third_diff_window
        } else if self.acceleration {
            self.acceleration_window
        } else if self.delta {
            self.delta_window
        } else {
            0
        };
        if self.silence_drop {
            delay = delay.max(self.silence_drop_window);
        }
        // Compression rewrites the predecessor, which must still be pending.
        match self.compression {
            Compression::None => {}
            Compression::VariableRate => delay = delay.max(self.vfr_max_run),
            _ => delay = delay.max(1),
        }
        delay
    }

    /// Batch operation defers normalization to the end of the utterance.
    pub fn is_live(&self) -> bool {
        self.cms != CmsMode::Batch && self.agc != AgcMode::Batch
    }
}

/// Complete front-end configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontendConfig {
    pub epd: EpdConfig,
    pub features: FeatureConfig,
}

impl FrontendConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: FrontendConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn output_dim(&self) -> usize {
        self.features.output_dim()
    }

    pub fn delay(&self) -> usize {
        self.features.delay()
    }

    pub fn is_live(&self) -> bool {
        self.features.is_live()
    }

    /// Checks the configuration, repairing the few settings that have an
    /// obvious safe value and rejecting the rest.
    pub fn validate(&mut self) -> Result<()> {
        let epd = &mut self.epd;
        if epd.onset_frames == 0 {
            return Err(invalid("onsetFrames must be at least 1"));
        }
        if epd.median_window == 0 {
            return Err(invalid("medianWindow must be at least 1"));
        }
        if epd.median_window > MAX_MEDIAN_WINDOW {
            warn!(
                requested = epd.median_window,
                max = MAX_MEDIAN_WINDOW,
                "median window capped"
            );
            epd.median_window = MAX_MEDIAN_WINDOW;
        }
        if epd.end_pause_frames <= epd.end_margin_frames {
            warn!(
                end_pause = epd.end_pause_frames,
                end_margin = epd.end_margin_frames,
                "end pause must exceed end margin; raising it"
            );
            epd.end_pause_frames = epd.end_margin_frames + 1;
        }
        if !epd.soft_snr_threshold.is_finite() {
            return Err(invalid("softSnrThreshold must be finite"));
        }

        let f = &mut self.features;
        if f.dim_mfcc < 2 {
            return Err(invalid("dimMfcc must be at least 2"));
        }
        for (name, on, window) in [
            ("deltaWindow", f.delta, f.delta_window),
            ("accelerationWindow", f.acceleration, f.acceleration_window),
            ("thirdDiffWindow", f.third_diff, f.third_diff_window),
            ("silenceDropWindow", f.silence_drop, f.silence_drop_window),
        ] {
            if on && window == 0 {
                return Err(invalid(&format!("{name} must be at least 1")));
            }
        }
        for (name, factor) in [
            ("forgetVoiced", f.forget_voiced),
            ("forgetUnvoiced", f.forget_unvoiced),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(invalid(&format!("{name} must lie in (0, 1), got {factor}")));
            }
        }
        if f.compression == Compression::VariableRate {
            if f.vfr_max_run == 0 || f.vfr_max_run > MAX_VFR_RUN {
                return Err(invalid(&format!(
                    "vfrMaxRun must lie in 1..={MAX_VFR_RUN}, got {}",
                    f.vfr_max_run
                )));
            }
            if !(f.vfr_distance.is_finite() && f.vfr_distance >= 0.0) {
                return Err(invalid("vfrDistance must be a non-negative number"));
            }
        }
        if f.max_output_frames == 0 {
            return Err(invalid("maxOutputFrames must be at least 1"));
        }
        let needed = 2 * (f.delay() + epd.begin_margin_frames + epd.onset_frames + 2);
        if f.ring_capacity <= needed {
            return Err(invalid(&format!(
                "ringCapacity {} too small, need more than {needed}",
                f.ring_capacity
            )));
        }
        // Past the end margin the output cursor stalls until the pause ends.
        let stall =
            epd.end_pause_frames.max(epd.mid_pause_frames) + epd.end_margin_frames + f.delay();
        if f.ring_capacity <= stall {
            return Err(invalid(&format!(
                "ringCapacity {} cannot hold a pause, need more than {stall}",
                f.ring_capacity
            )));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> FrontendError {
    FrontendError::InvalidConfig(msg.to_string())
}
