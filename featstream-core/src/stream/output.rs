use serde::Serialize;
use tracing::warn;

use crate::frame::FrameClass;
use crate::numeric::Scalar;

/// One finalized feature vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFrame<S: Scalar = f32> {
    #[serde(skip)]
    pub vector: Vec<S>,
    pub class: FrameClass,
    /// Input frame this vector was derived from.
    pub frame_index: u64,
    /// Byte-quantized copy when quantization is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<u8>>,
}

/// Finalized vectors of the current utterance.
#[derive(Debug, Clone)]
pub struct FeatureOutputStream<S: Scalar = f32> {
    frames: Vec<FeatureFrame<S>>,
    max_frames: usize,
    /// Frames already handed out by [`take_pending`](Self::take_pending).
    delivered: usize,
}

impl<S: Scalar> FeatureOutputStream<S> {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_frames,
            delivered: 0,
        }
    }

    /// Appends a frame; returns `false` when the stream is full.
    pub fn push(&mut self, frame: FeatureFrame<S>) -> bool {
        if self.frames.len() >= self.max_frames {
            warn!(
                max_frames = self.max_frames,
                frame_index = frame.frame_index,
                "feature output full, vector rejected"
            );
            return false;
        }
        self.frames.push(frame);
        true
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn get(&self, i: usize) -> Option<&FeatureFrame<S>> {
        self.frames.get(i)
    }

    pub fn last(&self) -> Option<&FeatureFrame<S>> {
        self.frames.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureFrame<S>> {
        self.frames.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut FeatureFrame<S>> {
        self.frames.iter_mut()
    }

    /// Frames appended since the previous call.
    pub fn take_pending(&mut self) -> Vec<FeatureFrame<S>> {
        let start = self.delivered.min(self.frames.len());
        self.delivered = self.frames.len();
        self.frames[start..].to_vec()
    }

    /// Hands the whole utterance to the caller.
    pub fn drain(&mut self) -> Vec<FeatureFrame<S>> {
        self.delivered = 0;
        std::mem::take(&mut self.frames)
    }

    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
        self.delivered = self.delivered.min(len);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.delivered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(i: u64) -> FeatureFrame<f32> {
        FeatureFrame {
            vector: vec![i as f32],
            class: FrameClass::Voiced,
            frame_index: i,
            levels: None,
        }
    }

    #[test]
    fn rejects_beyond_capacity() {
        let mut out = FeatureOutputStream::new(2);
        assert!(out.push(frame(0)));
        assert!(out.push(frame(1)));
        assert!(!out.push(frame(2)));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn pending_frames_are_delivered_once() {
        let mut out = FeatureOutputStream::new(10);
        out.push(frame(0));
        out.push(frame(1));
        assert_eq!(out.take_pending().len(), 2);
        assert!(out.take_pending().is_empty());
        out.push(frame(2));
        let pending = out.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].frame_index, 2);
        out.truncate(1);
        out.push(frame(5));
        assert_eq!(out.take_pending()[0].frame_index, 5);
        assert_eq!(out.drain().len(), 2);
        assert!(out.is_empty());
    }

    #[test]
    fn serializes_metadata_only() {
        let mut f = frame(3);
        f.levels = Some(vec![1, 2]);
        let json = serde_json::to_value(&f).expect("serialize");
        assert_eq!(json["frameIndex"], 3);
        assert_eq!(json["class"], "voiced");
        assert!(json.get("vector").is_none());
    }
}
