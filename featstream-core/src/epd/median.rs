use std::cmp::Ordering;
use std::fmt;

use ringbuf::{traits::*, HeapRb};

use crate::numeric::Scalar;

/// Sliding median over the most recent `len` values.
///
/// Until the window has filled, the newest value is returned unchanged.
pub struct MedianWindow<S: Scalar = f32> {
    values: HeapRb<S>,
    scratch: Vec<S>,
}

impl<S: Scalar> MedianWindow<S> {
    /// `len` must be non-zero; configuration validation guarantees it.
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            values: HeapRb::new(len),
            scratch: Vec::with_capacity(len),
        }
    }

    pub fn push(&mut self, value: S) -> S {
        self.values.push_overwrite(value);
        if !self.values.is_full() {
            return value;
        }
        self.scratch.clear();
        self.scratch.extend(self.values.iter().copied());
        self.scratch
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        self.scratch[self.scratch.len() / 2]
    }

    pub fn len(&self) -> usize {
        self.values.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<S: Scalar> fmt::Debug for MedianWindow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MedianWindow")
            .field("len", &self.values.occupied_len())
            .field("capacity", &self.values.capacity())
            .finish()
    }
}
