//! Streaming feature conversion: the frame ring, the output stream and the
//! orchestrator that drives them from endpoint decisions.

pub mod buffer;
pub mod orchestrator;
pub mod output;

pub use buffer::{Cell, CellActivity, StreamBuffer};
pub use orchestrator::{FeatureStream, FrameStatus, StreamCounts};
pub use output::{FeatureFrame, FeatureOutputStream};
