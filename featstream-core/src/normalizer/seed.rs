//! Persisted normalizer state.
//!
//! Binary layout (little-endian `f32`, `d` = cepstral dimension without the
//! log-energy term):
//!
//! ```text
//! mean_silence[d] mean_unvoiced[d] mean_voiced[d]
//! inv_std_silence[d] inv_std_unvoiced[d] inv_std_voiced[d]
//! max_log_energy min_log_energy
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FrontendError, Result};

const VECTORS: usize = 6;

/// Per-class cepstral means and inverse standard deviations plus the
/// log-energy range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizerSeed {
    pub mean_silence: Vec<f32>,
    pub mean_unvoiced: Vec<f32>,
    pub mean_voiced: Vec<f32>,
    pub inv_std_silence: Vec<f32>,
    pub inv_std_unvoiced: Vec<f32>,
    pub inv_std_voiced: Vec<f32>,
    pub max_log_energy: f32,
    pub min_log_energy: f32,
}

impl NormalizerSeed {
    /// Zero means, unit inverse deviations and a zero energy range.
    pub fn neutral(dim: usize) -> Self {
        Self {
            mean_silence: vec![0.0; dim],
            mean_unvoiced: vec![0.0; dim],
            mean_voiced: vec![0.0; dim],
            inv_std_silence: vec![1.0; dim],
            inv_std_unvoiced: vec![1.0; dim],
            inv_std_voiced: vec![1.0; dim],
            max_log_energy: 0.0,
            min_log_energy: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean_silence.len()
    }

    fn vectors(&self) -> [&Vec<f32>; VECTORS] {
        [
            &self.mean_silence,
            &self.mean_unvoiced,
            &self.mean_voiced,
            &self.inv_std_silence,
            &self.inv_std_unvoiced,
            &self.inv_std_voiced,
        ]
    }

    /// Checks lengths and values.
    pub fn validate(&self, dim: usize) -> Result<()> {
        let vectors = self.vectors();
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(FrontendError::SeedFormat(format!(
                    "vector {i} has length {}, expected {dim}",
                    v.len()
                )));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(FrontendError::SeedFormat(format!(
                    "vector {i} contains a non-finite value"
                )));
            }
        }
        if vectors[3..].iter().any(|v| v.iter().any(|&x| x <= 0.0)) {
            return Err(FrontendError::SeedFormat(
                "inverse deviations must be positive".into(),
            ));
        }
        if !self.max_log_energy.is_finite() || !self.min_log_energy.is_finite() {
            return Err(FrontendError::SeedFormat(
                "log-energy range must be finite".into(),
            ));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((VECTORS * self.dim() + 2) * 4);
        for v in self.vectors() {
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.max_log_energy.to_le_bytes());
        out.extend_from_slice(&self.min_log_energy.to_le_bytes());
        out
    }

    /// Parses the binary layout for cepstral dimension `dim`.
    pub fn from_bytes(bytes: &[u8], dim: usize) -> Result<Self> {
        let expected = (VECTORS * dim + 2) * 4;
        if bytes.len() != expected {
            return Err(FrontendError::SeedFormat(format!(
                "expected {expected} bytes for dimension {dim}, got {}",
                bytes.len()
            )));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let vector = |i: usize| values[i * dim..(i + 1) * dim].to_vec();
        let seed = Self {
            mean_silence: vector(0),
            mean_unvoiced: vector(1),
            mean_voiced: vector(2),
            inv_std_silence: vector(3),
            inv_std_unvoiced: vector(4),
            inv_std_voiced: vector(5),
            max_log_energy: values[VECTORS * dim],
            min_log_energy: values[VECTORS * dim + 1],
        };
        seed.validate(dim)?;
        Ok(seed)
    }

    pub fn load(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let seed = Self::from_bytes(&bytes, dim)?;
        info!(path = %path.display(), dim, "normalizer seed loaded");
        Ok(seed)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes())?;
        info!(path = %path.display(), dim = self.dim(), "normalizer seed saved");
        Ok(())
    }

    pub fn from_json_str(json: &str, dim: usize) -> Result<Self> {
        let seed: Self = serde_json::from_str(json)?;
        seed.validate(dim)?;
        Ok(seed)
    }

    pub fn load_json(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text, dim)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dim: usize) -> NormalizerSeed {
        let mut seed = NormalizerSeed::neutral(dim);
        seed.mean_voiced = (0..dim).map(|i| i as f32 * 0.5).collect();
        seed.inv_std_unvoiced = vec![0.25; dim];
        seed.max_log_energy = 21.5;
        seed.min_log_energy = 6.5;
        seed
    }

    #[test]
    fn binary_layout_is_field_ordered() {
        let seed = sample(2);
        let bytes = seed.to_bytes();
        assert_eq!(bytes.len(), (6 * 2 + 2) * 4);
        // Third vector is the voiced mean.
        assert_eq!(&bytes[16..20], &0.0f32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 8..bytes.len() - 4], &21.5f32.to_le_bytes());
        let back = NormalizerSeed::from_bytes(&bytes, 2).expect("valid seed");
        assert_eq!(back, seed);
    }

    #[test]
    fn rejects_truncated_bytes() {
        let bytes = sample(12).to_bytes();
        let err = NormalizerSeed::from_bytes(&bytes[..bytes.len() - 1], 12)
            .expect_err("truncated");
        assert!(matches!(err, FrontendError::SeedFormat(_)));
    }

    #[test]
    fn rejects_non_positive_inverse_deviation() {
        let mut seed = sample(3);
        seed.inv_std_voiced[1] = 0.0;
        assert!(seed.validate(3).is_err());
    }

    #[test]
    fn json_and_file_persistence() {
        let seed = sample(4);
        let dir = std::env::temp_dir();
        let bin = dir.join(format!("featstream-seed-{}.bin", std::process::id()));
        let json = dir.join(format!("featstream-seed-{}.json", std::process::id()));

        seed.save(&bin).expect("save binary");
        seed.save_json(&json).expect("save json");
        assert_eq!(NormalizerSeed::load(&bin, 4).expect("load binary"), seed);
        assert_eq!(NormalizerSeed::load_json(&json, 4).expect("load json"), seed);
        assert!(NormalizerSeed::load(&bin, 5).is_err());

        let _ = std::fs::remove_file(bin);
        let _ = std::fs::remove_file(json);
    }
}
