//! # featstream-core
//!
//! Streaming speech front-end: endpoint detection, cepstral normalization,
//! frame compression and derivative features.
//!
//! ## Architecture
//!
//! ```text
//! FrameInput ──► EndpointDetector ──► EpdFrame (state, class, start/end)
//!     │                                   │
//!     ▼                                   ▼
//! StreamBuffer ◄── Normalizer ◄── ingest   FeatureStream (replay / drain)
//!     │               │                   │
//!     │          FrameCompressor          ▼
//!     └──────────────────────────► DerivativeComputer
//!                                         │
//!                                [Quantizer] ──► FeatureOutputStream
//! ```
//!
//! Every frame is normalized and stored on arrival; vectors are finalized a
//! fixed delay behind the newest frame, once the detector's hindsight
//! decision about the frame is known.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod compress;
pub mod config;
pub mod delta;
pub mod epd;
pub mod error;
pub mod frame;
pub mod normalizer;
pub mod numeric;
pub mod quantizer;
pub mod session;
pub mod stream;

// Convenience re-exports for downstream crates
pub use config::{AgcMode, CmsMode, Compression, EpdConfig, FeatureConfig, FrontendConfig};
pub use epd::{EndpointDetector, EndpointState, EpdFrame, EpdStatus, LimitStatus, Loudness};
pub use error::{FrontendError, Result};
pub use frame::{FrameClass, FrameInput, FrameMeasures};
pub use normalizer::{Normalizer, NormalizerSeed};
pub use numeric::{Fixed, Scalar};
pub use quantizer::Quantizer;
pub use session::{DiagnosticsSnapshot, SeedStore, Session, SessionDiagnostics};
pub use stream::{FeatureFrame, FeatureStream, FrameStatus};
