use serde::{Deserialize, Serialize};

/// Voicing class of one frame, ordered from least to most speech-like.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameClass {
    #[default]
    Silence = 0,
    Unvoiced = 1,
    Mixed = 2,
    Voiced = 3,
}

impl FrameClass {
    /// Maps an integer level onto a class, clamping into `0..=3`.
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => FrameClass::Silence,
            1 => FrameClass::Unvoiced,
            2 => FrameClass::Mixed,
            _ => FrameClass::Voiced,
        }
    }

    pub fn level(self) -> i32 {
        self as i32
    }

    pub fn raised(self) -> Self {
        Self::from_level(self.level() + 1)
    }

    pub fn lowered(self) -> Self {
        Self::from_level(self.level() - 1)
    }
}

/// Spectral measurements for one frame, produced by the analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeasures {
    /// Spectral entropy (higher means more speech-like).
    pub entropy: f32,
    /// Log frame energy.
    pub log_energy: f32,
    /// Log frame power.
    pub log_power: f32,
    /// Coarse voice-activity class from the analysis stage.
    pub vad: FrameClass,
    /// Whether speech is plausibly present at all.
    pub speech_plausible: bool,
}

impl FrameMeasures {
    pub fn silent(log_energy: f32) -> Self {
        Self {
            entropy: 0.0,
            log_energy,
            log_power: log_energy,
            vad: FrameClass::Silence,
            speech_plausible: false,
        }
    }
}

/// One incoming frame: the cepstral vector (trailing log-energy included)
/// together with its measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInput {
    pub cepstrum: Vec<f32>,
    pub measures: FrameMeasures,
}

impl FrameInput {
    pub fn new(cepstrum: Vec<f32>, measures: FrameMeasures) -> Self {
        Self { cepstrum, measures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trip_and_clamp() {
        assert_eq!(FrameClass::from_level(-3), FrameClass::Silence);
        assert_eq!(FrameClass::from_level(2), FrameClass::Mixed);
        assert_eq!(FrameClass::from_level(9), FrameClass::Voiced);
        assert_eq!(FrameClass::Voiced.raised(), FrameClass::Voiced);
        assert_eq!(FrameClass::Silence.lowered(), FrameClass::Silence);
        assert_eq!(FrameClass::Unvoiced.raised(), FrameClass::Mixed);
    }

    #[test]
    fn classes_are_ordered() {
        assert!(FrameClass::Silence < FrameClass::Unvoiced);
        assert!(FrameClass::Mixed < FrameClass::Voiced);
        assert_eq!(FrameClass::Unvoiced.max(FrameClass::Mixed), FrameClass::Mixed);
    }
}
