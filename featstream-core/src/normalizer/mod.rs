//! Feature normalization: per-class cepstral mean/variance normalization
//! plus log-energy gain control.
//!
//! Live and recursive modes rewrite each frame as it arrives. Batch modes
//! only accumulate; [`Normalizer::post_process`] applies the utterance
//! statistics once the utterance is complete.

pub mod agc;
pub mod cms;
pub mod seed;

use crate::config::{AgcMode, CmsMode, FeatureConfig};
use crate::error::Result;
use crate::frame::FrameClass;
use crate::numeric::Scalar;

pub use agc::GainControl;
pub use cms::CepstralNormalizer;
pub use seed::NormalizerSeed;

#[derive(Debug, Clone)]
pub struct Normalizer<S: Scalar = f32> {
    cms: CepstralNormalizer<S>,
    agc: GainControl<S>,
    dim_mfcc: usize,
    use_log_energy: bool,
}

impl<S: Scalar> Normalizer<S> {
    pub fn new(config: &FeatureConfig, seed: &NormalizerSeed) -> Result<Self> {
        seed.validate(config.dim_mfcc - 1)?;
        Ok(Self {
            cms: CepstralNormalizer::new(config, seed),
            agc: GainControl::new(config.agc, seed.max_log_energy, seed.min_log_energy),
            dim_mfcc: config.dim_mfcc,
            use_log_energy: config.use_log_energy,
        })
    }

    pub fn cms(&self) -> &CepstralNormalizer<S> {
        &self.cms
    }

    pub fn agc(&self) -> &GainControl<S> {
        &self.agc
    }

    pub fn begin_utterance(&mut self) {
        self.cms.begin_utterance();
        self.agc.begin_utterance();
    }

    /// Frame-synchronous stage over a full cepstral vector whose last
    /// element is the log-energy.
    pub fn process(&mut self, class: FrameClass, vector: &mut [S]) {
        let (cepstra, energy) = vector.split_at_mut(self.dim_mfcc - 1);
        self.agc.process(&mut energy[0]);
        self.cms.process(class, cepstra);
    }

    /// Folds this utterance's statistics into the persistent state.
    pub fn flush(&mut self) {
        self.cms.flush();
        self.agc.flush();
    }

    /// Batch second pass over one buffered output vector.
    pub fn post_process(&self, class: FrameClass, vector: &mut [S]) {
        let cepstra = self.dim_mfcc - 1;
        if self.cms.mode() == CmsMode::Batch {
            self.cms.apply_batch(class, &mut vector[..cepstra]);
        }
        if self.use_log_energy && self.agc.mode() == AgcMode::Batch {
            self.agc.apply_batch(&mut vector[cepstra]);
        }
    }

    /// Distance weights for variable-rate compression.
    pub fn voiced_inv_std(&self) -> &[S] {
        self.cms.voiced_inv_std()
    }

    /// Snapshot of the current state in persisted form.
    pub fn seed(&self) -> NormalizerSeed {
        let mut seed = NormalizerSeed::neutral(self.dim_mfcc - 1);
        self.cms.export(&mut seed);
        seed.max_log_energy = self.agc.max().to_f32();
        seed.min_log_energy = self.agc.min().to_f32();
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_config() -> FeatureConfig {
        FeatureConfig {
            dim_mfcc: 3,
            cms: CmsMode::Batch,
            cms_variance: true,
            agc: AgcMode::Batch,
            ..FeatureConfig::default()
        }
    }

    #[test]
    fn rejects_seed_of_wrong_dimension() {
        let seed = NormalizerSeed::neutral(5);
        assert!(Normalizer::<f32>::new(&batch_config(), &seed).is_err());
    }

    #[test]
    fn batch_post_pass_centres_each_class() {
        let config = batch_config();
        let mut norm =
            Normalizer::<f32>::new(&config, &NormalizerSeed::neutral(2)).expect("valid seed");
        norm.begin_utterance();
        let frames = [
            (FrameClass::Voiced, [1.0, 2.0, 20.0]),
            (FrameClass::Voiced, [3.0, 6.0, 18.0]),
            (FrameClass::Silence, [-1.0, 0.5, 12.0]),
            (FrameClass::Silence, [1.0, 0.5, 11.0]),
        ];
        let mut stored = Vec::new();
        for (class, f) in frames {
            let mut v = f.to_vec();
            norm.process(class, &mut v);
            stored.push((class, v));
        }
        norm.flush();
        for (class, v) in stored.iter_mut() {
            norm.post_process(*class, v);
        }
        let voiced_mean: f32 = (stored[0].1[0] + stored[1].1[0]) / 2.0;
        assert!(voiced_mean.abs() < 1e-5);
        // Unit variance after CMVN: (1-2)*1 and (3-2)*1.
        assert!((stored[1].1[0] - 1.0).abs() < 1e-4, "v={}", stored[1].1[0]);
        // Energy maps to 1 at the utterance max.
        assert!((stored[0].1[2] - 1.0).abs() < 1e-6);
        assert!((stored[3].1[2] - 0.1).abs() < 1e-5);
    }

    #[test]
    fn seed_reflects_flushed_state() {
        let config = FeatureConfig {
            dim_mfcc: 3,
            cms: CmsMode::Live,
            agc: AgcMode::Live,
            ..FeatureConfig::default()
        };
        let mut seed = NormalizerSeed::neutral(2);
        seed.max_log_energy = 15.0;
        let mut norm = Normalizer::<f32>::new(&config, &seed).expect("valid seed");
        let mut v = vec![0.0, 0.0, 19.0];
        norm.process(FrameClass::Voiced, &mut v);
        assert!((v[2] - 1.4).abs() < 1e-5);
        norm.flush();
        let out = norm.seed();
        assert_eq!(out.max_log_energy, 19.0);
        assert_eq!(out.min_log_energy, 4.0);
    }
}
