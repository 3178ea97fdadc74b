use tracing::warn;

use crate::frame::FrameClass;
use crate::numeric::Scalar;

/// Activity tag of one ring cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CellActivity {
    /// Never written since the last reset.
    #[default]
    Null,
    Active,
    /// Removed by silence dropping.
    Dropped,
    /// Merged into a neighbour by frame compression.
    Skipped,
}

/// One slot of the stream ring.
#[derive(Debug, Clone)]
pub struct Cell<S: Scalar = f32> {
    /// Cepstral vector as received, used for derivatives and distances.
    pub raw: Vec<S>,
    /// After live normalization.
    pub norm: Vec<S>,
    /// After compression; the static block of the output.
    pub feat: Vec<S>,
    pub activity: CellActivity,
    /// Inside the current utterance.
    pub speech: bool,
    pub class: FrameClass,
    pub index: u64,
}

impl<S: Scalar> Cell<S> {
    fn empty(dim: usize) -> Self {
        Self {
            raw: vec![S::ZERO; dim],
            norm: vec![S::ZERO; dim],
            feat: vec![S::ZERO; dim],
            activity: CellActivity::Null,
            speech: false,
            class: FrameClass::Silence,
            index: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.activity == CellActivity::Active
    }
}

/// Fixed-capacity ring of cells addressed by absolute position.
///
/// Positions are signed so that a delayed cursor may point before the first
/// frame; such positions map onto never-written `Null` cells.
#[derive(Debug, Clone)]
pub struct StreamBuffer<S: Scalar = f32> {
    cells: Vec<Cell<S>>,
    written: i64,
    output: i64,
}

impl<S: Scalar> StreamBuffer<S> {
    pub fn new(capacity: usize, dim: usize) -> Self {
        Self {
            cells: (0..capacity.max(1)).map(|_| Cell::empty(dim)).collect(),
            written: 0,
            output: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn slot(&self, pos: i64) -> usize {
        pos.rem_euclid(self.cells.len() as i64) as usize
    }

    pub fn cell(&self, pos: i64) -> &Cell<S> {
        &self.cells[self.slot(pos)]
    }

    pub fn cell_mut(&mut self, pos: i64) -> &mut Cell<S> {
        let slot = self.slot(pos);
        &mut self.cells[slot]
    }

    /// Position the next frame will be written to.
    pub fn written(&self) -> i64 {
        self.written
    }

    /// Position of the next cell to finalize.
    pub fn output(&self) -> i64 {
        self.output
    }

    /// Position of the most recent frame.
    pub fn current(&self) -> i64 {
        self.written - 1
    }

    /// Cells written but not yet finalized.
    pub fn pending(&self) -> usize {
        (self.written - self.output).max(0) as usize
    }

    /// Oldest position still resident in the ring.
    pub fn oldest(&self) -> i64 {
        (self.written - self.cells.len() as i64).max(0)
    }

    /// Every resident cell is still waiting to be finalized; the next push
    /// would overwrite the cell at the output cursor.
    pub fn is_full(&self) -> bool {
        self.pending() >= self.cells.len()
    }

    /// Writes a frame into the next cell and returns its position.
    ///
    /// A full ring gives up its oldest pending cell: the output cursor moves
    /// past it before the slot is reused.
    pub fn push(&mut self, raw: &[S], class: FrameClass) -> i64 {
        if self.is_full() {
            warn!(
                frame = self.output,
                capacity = self.cells.len(),
                "stream ring full, oldest pending cell overwritten"
            );
            self.output = self.written - self.cells.len() as i64 + 1;
        }
        let pos = self.written;
        let cell = self.cell_mut(pos);
        cell.raw.clear();
        cell.raw.extend_from_slice(raw);
        cell.norm.clone_from(&cell.raw);
        cell.feat.clone_from(&cell.raw);
        cell.activity = CellActivity::Active;
        cell.speech = false;
        cell.class = class;
        cell.index = pos as u64;
        self.written += 1;
        pos
    }

    /// Moves the output cursor, clamped to the resident window
    /// `written - capacity ..= written`.
    pub fn set_output(&mut self, pos: i64) {
        let lowest = self.written - self.cells.len() as i64;
        let clamped = pos.clamp(lowest, self.written);
        if clamped != pos {
            warn!(
                requested = pos,
                written = self.written,
                capacity = self.cells.len(),
                "output cursor out of range, clamped"
            );
        }
        self.output = clamped;
    }

    pub fn clear_speech(&mut self) {
        self.cells.iter_mut().for_each(|c| c.speech = false);
    }

    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            cell.activity = CellActivity::Null;
            cell.speech = false;
            cell.class = FrameClass::Silence;
            cell.index = 0;
        }
        self.written = 0;
        self.output = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_wraps_and_keeps_positions() {
        let mut buf = StreamBuffer::<f32>::new(4, 2);
        for i in 0..6 {
            let pos = buf.push(&[i as f32, 0.0], FrameClass::Voiced);
            assert_eq!(pos, i);
        }
        assert_eq!(buf.cell(5).raw[0], 5.0);
        assert_eq!(buf.cell(1).raw[0], 5.0);
        assert_eq!(buf.cell(5).index, 5);
        assert_eq!(buf.oldest(), 2);
        // The unread cells 0 and 1 were overwritten.
        assert_eq!(buf.output(), 2);
        assert_eq!(buf.pending(), 4);
        assert!(buf.is_full());
    }

    #[test]
    fn output_cursor_stays_inside_the_ring() {
        let mut buf = StreamBuffer::<f32>::new(4, 1);
        for i in 0..10 {
            buf.push(&[i as f32], FrameClass::Voiced);
        }
        buf.set_output(1);
        assert_eq!(buf.output(), 6);
        assert_eq!(buf.pending(), 4);
        buf.set_output(12);
        assert_eq!(buf.output(), 10);
        assert_eq!(buf.pending(), 0);
        assert!(!buf.is_full());
    }

    #[test]
    fn negative_positions_map_to_null_cells() {
        let mut buf = StreamBuffer::<f32>::new(8, 1);
        buf.push(&[1.0], FrameClass::Voiced);
        assert_eq!(buf.cell(-1).activity, CellActivity::Null);
        assert!(!buf.cell(-2).speech);
    }

    #[test]
    fn output_cursor_is_clamped() {
        let mut buf = StreamBuffer::<f32>::new(8, 1);
        buf.push(&[1.0], FrameClass::Voiced);
        buf.set_output(1);
        assert_eq!(buf.pending(), 0);
        buf.reset();
        assert_eq!(buf.written(), 0);
        assert_eq!(buf.cell(0).activity, CellActivity::Null);
    }
}
