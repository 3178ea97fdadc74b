//! Single-byte feature quantization.
//!
//! Each output dimension is standardized with a trained mean and inverse
//! stdev and mapped onto one of `N` levels through a shared table of `N − 1`
//! ascending boundaries.
//!
//! Binary layout (little endian): `dim` f32 means, `dim` f32 inverse stdevs,
//! an i32 level count `N`, then `N − 1` f32 boundaries.

use std::path::Path;

use tracing::info;

use crate::error::{FrontendError, Result};
use crate::numeric::Scalar;

pub const MIN_LEVELS: usize = 2;
pub const MAX_LEVELS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Quantizer {
    mean: Vec<f32>,
    inv_std: Vec<f32>,
    boundaries: Vec<f32>,
}

impl Quantizer {
    pub fn new(mean: Vec<f32>, inv_std: Vec<f32>, boundaries: Vec<f32>) -> Result<Self> {
        if mean.len() != inv_std.len() {
            return Err(FrontendError::DimensionMismatch {
                expected: mean.len(),
                actual: inv_std.len(),
            });
        }
        let levels = boundaries.len() + 1;
        if !(MIN_LEVELS..=MAX_LEVELS).contains(&levels) {
            return Err(FrontendError::QuantizerFormat(format!(
                "level count {levels} outside {MIN_LEVELS}..={MAX_LEVELS}"
            )));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) || boundaries.iter().any(|b| !b.is_finite())
        {
            return Err(FrontendError::QuantizerFormat(
                "boundaries must be finite and strictly ascending".into(),
            ));
        }
        Ok(Self {
            mean,
            inv_std,
            boundaries,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn levels(&self) -> usize {
        self.boundaries.len() + 1
    }

    pub fn from_bytes(bytes: &[u8], dim: usize) -> Result<Self> {
        let mut reader = LeReader { bytes, at: 0 };
        let mean = reader.f32s(dim)?;
        let inv_std = reader.f32s(dim)?;
        let count = reader.i32()?;
        if !(MIN_LEVELS as i32..=MAX_LEVELS as i32).contains(&count) {
            return Err(FrontendError::QuantizerFormat(format!(
                "level count {count} outside {MIN_LEVELS}..={MAX_LEVELS}"
            )));
        }
        let boundaries = reader.f32s(count as usize - 1)?;
        if reader.at != bytes.len() {
            return Err(FrontendError::QuantizerFormat(format!(
                "{} trailing bytes",
                bytes.len() - reader.at
            )));
        }
        Self::new(mean, inv_std, boundaries)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((2 * self.dim() + self.levels()) * 4);
        for x in self.mean.iter().chain(&self.inv_std) {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out.extend_from_slice(&(self.levels() as i32).to_le_bytes());
        for x in &self.boundaries {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out
    }

    pub fn load(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let path = path.as_ref();
        let quantizer = Self::from_bytes(&std::fs::read(path)?, dim)?;
        info!(
            path = %path.display(),
            dim,
            levels = quantizer.levels(),
            "feature quantizer loaded"
        );
        Ok(quantizer)
    }

    /// Level of an already standardized value.
    ///
    /// An exact boundary hit returns that boundary's index; otherwise the
    /// number of boundaries below the value.
    pub fn level(&self, value: f32) -> u8 {
        let (mut lower, mut upper) = (0i32, self.boundaries.len() as i32 - 1);
        while lower <= upper {
            let mid = (lower + upper) >> 1;
            let boundary = self.boundaries[mid as usize];
            if value > boundary {
                lower = mid + 1;
            } else if value < boundary {
                upper = mid - 1;
            } else {
                return mid as u8;
            }
        }
        lower as u8
    }

    /// Standardizes and quantizes one output vector.
    pub fn quantize<S: Scalar>(&self, vector: &[S]) -> Vec<u8> {
        vector
            .iter()
            .zip(self.mean.iter().zip(&self.inv_std))
            .map(|(&x, (&m, &s))| self.level((x.to_f32() - m) * s))
            .collect()
    }
}

struct LeReader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl LeReader<'_> {
    fn take(&mut self) -> Result<[u8; 4]> {
        let chunk = self
            .bytes
            .get(self.at..self.at + 4)
            .ok_or_else(|| FrontendError::QuantizerFormat("truncated quantizer data".into()))?;
        self.at += 4;
        Ok([chunk[0], chunk[1], chunk[2], chunk[3]])
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn f32s(&mut self, n: usize) -> Result<Vec<f32>> {
        (0..n).map(|_| Ok(f32::from_le_bytes(self.take()?))).collect()
    }
}
