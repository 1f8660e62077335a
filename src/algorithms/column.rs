//! Columns: units of spatial competition.

use crate::algorithms::{Cell, Segment, SourceView};
use crate::types::{Permanence, Real, SegmentIdx, UInt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One column of the region grid.
///
/// A column owns a fixed array of cells and exactly one proximal segment
/// whose synapses terminate on external input bits. It competes with its
/// neighbors through its overlap score, tracks two duty-cycle moving
/// averages, and carries a boost factor (>= 1) that compensates for
/// under-firing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Column {
    cells: Vec<Cell>,
    proximal: Segment,
    is_active: bool,
    overlap: UInt,
    boost: Real,
    active_duty_cycle: Real,
    overlap_duty_cycle: Real,
    ix: UInt,
    iy: UInt,
    cx: UInt,
    cy: UInt,
}

impl Column {
    /// Creates a column at grid position `(cx, cy)` whose receptive field is
    /// centered on input position `(ix, iy)`.
    pub(crate) fn new(
        num_cells: usize,
        seg_active_threshold: UInt,
        ix: UInt,
        iy: UInt,
        cx: UInt,
        cy: UInt,
    ) -> Self {
        Self {
            cells: (0..num_cells).map(|_| Cell::new()).collect(),
            proximal: Segment::new(seg_active_threshold),
            is_active: false,
            overlap: 0,
            boost: 1.0,
            active_duty_cycle: 1.0,
            overlap_duty_cycle: 1.0,
            ix,
            iy,
            cx,
            cy,
        }
    }

    /// Input-space x of the column's receptive-field center.
    #[inline]
    pub fn ix(&self) -> UInt {
        self.ix
    }

    /// Input-space y of the column's receptive-field center.
    #[inline]
    pub fn iy(&self) -> UInt {
        self.iy
    }

    /// Column-grid x position.
    #[inline]
    pub fn cx(&self) -> UInt {
        self.cx
    }

    /// Column-grid y position.
    #[inline]
    pub fn cy(&self) -> UInt {
        self.cy
    }

    /// Whether the column won the inhibition step.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Last computed (boosted) overlap score.
    #[inline]
    pub fn overlap(&self) -> UInt {
        self.overlap
    }

    /// Current boost factor (>= 1).
    #[inline]
    pub fn boost(&self) -> Real {
        self.boost
    }

    /// Moving average of how often this column wins inhibition.
    #[inline]
    pub fn active_duty_cycle(&self) -> Real {
        self.active_duty_cycle
    }

    /// Moving average of how often this column clears min-overlap.
    #[inline]
    pub fn overlap_duty_cycle(&self) -> Real {
        self.overlap_duty_cycle
    }

    /// Number of cells in this column.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// The cell at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= num_cells()`.
    #[inline]
    pub fn cell(&self, index: usize) -> &Cell {
        &self.cells[index]
    }

    /// The cells, in index order.
    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// The proximal segment.
    #[inline]
    pub fn proximal(&self) -> &Segment {
        &self.proximal
    }

    /// Overlap as a fraction of the proximal synapse count.
    pub fn overlap_percentage(&self) -> Real {
        let num_syns = self.proximal.num_synapses().max(1);
        self.overlap as Real / num_syns as Real
    }

    pub(crate) fn cell_mut(&mut self, index: usize) -> &mut Cell {
        &mut self.cells[index]
    }

    pub(crate) fn proximal_mut(&mut self) -> &mut Segment {
        &mut self.proximal
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    /// Advances all cells (and their segments) one time step.
    pub(crate) fn advance_time_step(&mut self) {
        for cell in &mut self.cells {
            cell.advance_time_step();
        }
    }

    /// Spatial pooler phase 1: processes the proximal segment against the
    /// current input, then scores the overlap. Below `min_overlap` the score
    /// is floored to zero, otherwise it is scaled by the boost factor
    /// (truncated to an integer).
    pub(crate) fn compute_overlap(
        &mut self,
        view: &SourceView<'_>,
        connected_perm: Permanence,
        min_overlap: Real,
    ) {
        self.proximal.process(view, connected_perm);
        let raw = self.proximal.num_active_connected();

        self.overlap = if (raw as Real) < min_overlap {
            0
        } else {
            (raw as Real * self.boost) as UInt
        };
    }

    /// Spatial learning: adapt the proximal permanences toward the current
    /// input (active sources up, the rest down).
    pub(crate) fn update_permanences(
        &mut self,
        view: &SourceView<'_>,
        increment: Permanence,
        decrement: Permanence,
    ) {
        self.proximal.adapt_permanences(view, increment, decrement);
    }

    /// Increases every proximal permanence by `amount` (the overlap-starved
    /// column escape hatch).
    pub(crate) fn increase_permanences(&mut self, amount: Permanence) {
        self.proximal.increase_permanences(amount);
    }

    /// EMA update of the active duty cycle.
    pub(crate) fn update_active_duty_cycle(&mut self, alpha: Real) {
        let mut cycle = (1.0 - alpha) * self.active_duty_cycle;
        if self.is_active {
            cycle += alpha;
        }
        self.active_duty_cycle = cycle;
    }

    /// EMA update of the overlap duty cycle (indicator: overlap strictly
    /// above min-overlap).
    pub(crate) fn update_overlap_duty_cycle(&mut self, alpha: Real, min_overlap: Real) {
        let mut cycle = (1.0 - alpha) * self.overlap_duty_cycle;
        if self.overlap as Real > min_overlap {
            cycle += alpha;
        }
        self.overlap_duty_cycle = cycle;
    }

    /// The boost for the current duty cycle: 1.0 while the column fires often
    /// enough, a flat +5% compounding bump while it never fires, otherwise
    /// the ratio of the minimum desired rate to the actual rate.
    pub(crate) fn boost_function(&self, min_duty_cycle: Real) -> Real {
        if self.active_duty_cycle > min_duty_cycle {
            1.0
        } else if self.active_duty_cycle == 0.0 {
            self.boost * 1.05
        } else {
            min_duty_cycle / self.active_duty_cycle
        }
    }

    /// Spatial learning phase 3 for this column: refresh both duty cycles,
    /// recompute the boost, and bump all proximal permanences when the
    /// column's overlap duty cycle has fallen under the neighborhood minimum.
    pub(crate) fn perform_boosting(
        &mut self,
        min_duty_cycle: Real,
        alpha: Real,
        permanence_inc: Permanence,
        min_overlap: Real,
    ) {
        self.update_active_duty_cycle(alpha);
        self.boost = self.boost_function(min_duty_cycle);

        self.update_overlap_duty_cycle(alpha, min_overlap);
        if self.overlap_duty_cycle < min_duty_cycle {
            self.increase_permanences(permanence_inc);
        }
    }

    /// The cell with the best matching segment for `steps` (see
    /// [`Cell::best_matching_segment`]); falls back to the cell with the
    /// fewest segments (earliest index on ties) when nothing matches.
    pub(crate) fn best_matching_cell(
        &self,
        steps: u8,
        previous: bool,
        min_count: UInt,
    ) -> (usize, Option<SegmentIdx>) {
        let mut best_cell: Option<usize> = None;
        let mut best_seg: Option<SegmentIdx> = None;
        let mut best_count = 0;

        for (i, cell) in self.cells.iter().enumerate() {
            if let Some(seg_idx) = cell.best_matching_segment(steps, previous, min_count) {
                let seg = &cell.segments()[seg_idx as usize];
                let count = if previous {
                    seg.num_prev_active_all()
                } else {
                    seg.num_active_all()
                };
                if count > best_count {
                    best_cell = Some(i);
                    best_seg = Some(seg_idx);
                    best_count = count;
                }
            }
        }

        match best_cell {
            Some(i) => (i, best_seg),
            None => {
                let mut fewest = 0;
                for (i, cell) in self.cells.iter().enumerate().skip(1) {
                    if cell.num_segments() < self.cells[fewest].num_segments() {
                        fewest = i;
                    }
                }
                (fewest, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{CellState, SynapseSource};

    const CONNECTED: Permanence = 0.2;
    const ALPHA: Real = 0.005;

    fn input_view(input: &[u8]) -> SourceView<'_> {
        SourceView { states: &[], input }
    }

    fn column_with_proximal(sources: &[u32], perms: &[Permanence]) -> Column {
        let mut col = Column::new(2, 2, 0, 0, 0, 0);
        for (&src, &perm) in sources.iter().zip(perms) {
            col.proximal_mut().create_synapse(SynapseSource::Input(src), perm);
        }
        col
    }

    #[test]
    fn test_overlap_below_min_is_zero() {
        let mut col = column_with_proximal(&[0, 1, 2], &[0.3, 0.3, 0.3]);
        let input = [1, 0, 0];
        col.compute_overlap(&input_view(&input), CONNECTED, 2.0);
        assert_eq!(col.overlap(), 0);
    }

    #[test]
    fn test_overlap_scaled_by_boost() {
        let mut col = column_with_proximal(&[0, 1, 2], &[0.3, 0.3, 0.3]);
        let input = [1, 1, 0];
        col.compute_overlap(&input_view(&input), CONNECTED, 1.0);
        assert_eq!(col.overlap(), 2);

        col.boost = 2.5;
        col.compute_overlap(&input_view(&input), CONNECTED, 1.0);
        assert_eq!(col.overlap(), 5);
    }

    #[test]
    fn test_unconnected_synapses_do_not_overlap() {
        let mut col = column_with_proximal(&[0, 1], &[0.3, 0.1]);
        let input = [1, 1];
        col.compute_overlap(&input_view(&input), CONNECTED, 1.0);
        assert_eq!(col.overlap(), 1);
    }

    #[test]
    fn test_duty_cycles_stay_in_bounds() {
        let mut col = column_with_proximal(&[0], &[0.3]);
        col.set_active(true);
        col.overlap = 5;
        for _ in 0..2000 {
            col.update_active_duty_cycle(ALPHA);
            col.update_overlap_duty_cycle(ALPHA, 1.0);
            assert!((0.0..=1.0).contains(&col.active_duty_cycle()));
            assert!((0.0..=1.0).contains(&col.overlap_duty_cycle()));
        }
        // Always active, always overlapping: both cycles stay high.
        assert!(col.active_duty_cycle() > 0.9);
        assert!(col.overlap_duty_cycle() > 0.9);

        col.set_active(false);
        col.overlap = 0;
        for _ in 0..2000 {
            col.update_active_duty_cycle(ALPHA);
            col.update_overlap_duty_cycle(ALPHA, 1.0);
        }
        assert!(col.active_duty_cycle() < 0.01);
        assert!(col.overlap_duty_cycle() < 0.01);
    }

    #[test]
    fn test_boost_function_branches() {
        let mut col = column_with_proximal(&[0], &[0.3]);

        col.active_duty_cycle = 0.5;
        assert_eq!(col.boost_function(0.01), 1.0);

        // Starved column: +5% compounding.
        col.active_duty_cycle = 0.0;
        col.boost = 2.0;
        assert!((col.boost_function(0.01) - 2.1).abs() < 1e-6);

        // Under-firing column: ratio.
        col.active_duty_cycle = 0.005;
        assert!((col.boost_function(0.01) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_boost_under_starvation_strictly_grows() {
        let mut col = column_with_proximal(&[0], &[0.3]);
        col.active_duty_cycle = 0.0;
        col.set_active(false);

        let before = col.boost();
        col.perform_boosting(0.01, ALPHA, 0.015, 1.0);
        assert!((col.boost() - before * 1.05).abs() < 1e-6);
        assert!(col.boost() > before);
    }

    #[test]
    fn test_starved_overlap_bumps_permanences() {
        let mut col = column_with_proximal(&[0, 1], &[0.15, 0.15]);
        col.active_duty_cycle = 0.5;
        col.overlap_duty_cycle = 0.0;
        col.overlap = 0;

        let before: Vec<Permanence> =
            col.proximal().synapses().iter().map(|s| s.permanence()).collect();
        col.perform_boosting(0.01, ALPHA, 0.015, 1.0);
        for (syn, prev) in col.proximal().synapses().iter().zip(before) {
            assert!((syn.permanence() - (prev + 0.015)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_best_matching_cell_fallback_fewest_segments() {
        let mut col = Column::new(3, 1, 0, 0, 0, 0);
        col.cell_mut(0).create_segment(1);
        col.cell_mut(2).create_segment(1);

        let (cell, seg) = col.best_matching_cell(1, true, 1);
        assert_eq!(cell, 1);
        assert!(seg.is_none());
    }

    #[test]
    fn test_best_matching_cell_fallback_tie_breaks_first() {
        let col = Column::new(3, 1, 0, 0, 0, 0);
        let (cell, seg) = col.best_matching_cell(1, true, 1);
        assert_eq!(cell, 0);
        assert!(seg.is_none());
    }

    #[test]
    fn test_best_matching_cell_picks_most_active() {
        let mut states = vec![CellState::default(); 4];
        for s in &mut states {
            s.is_active = true;
        }
        let view = SourceView { states: &states, input: &[] };

        let mut col = Column::new(2, 4, 0, 0, 0, 0);
        for (cell_idx, sources) in [(0usize, vec![0u32, 1]), (1, vec![0, 1, 2])] {
            let cell = col.cell_mut(cell_idx);
            let seg_idx = cell.create_segment(4);
            let seg = &mut cell.segments_mut()[seg_idx as usize];
            seg.set_prediction_steps(1);
            for src in sources {
                seg.create_synapse(SynapseSource::Cell(src), 0.5);
            }
            seg.process(&view, CONNECTED);
        }
        for i in 0..2 {
            col.cell_mut(i).advance_time_step();
        }

        let (cell, seg) = col.best_matching_cell(1, true, 1);
        assert_eq!(cell, 1);
        assert_eq!(seg, Some(0));
    }
}
