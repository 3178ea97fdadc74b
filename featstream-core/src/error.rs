use thiserror::Error;

/// All errors produced by featstream-core.
///
/// Only setup paths return these. Per-frame processing reports problems
/// through [`crate::stream::FrameStatus`] and never fails with an error.
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("malformed normalizer seed: {0}")]
    SeedFormat(String),

    #[error("malformed quantizer table: {0}")]
    QuantizerFormat(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FrontendError>;
