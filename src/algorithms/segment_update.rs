//! Deferred segment updates.
//!
//! The temporal pooler never mutates permanences while it is still reading
//! activity: learning decisions are captured into [`SegmentUpdate`] records
//! queued on the owning cell, and committed (positively or negatively) or
//! discarded later, once the cell's fate for the step is known.

use ahash::AHashSet;

use crate::algorithms::{Segment, SourceView, SynapseSource};
use crate::types::{CellIdx, ColumnIdx, SegmentIdx, SynapseIdx};
use crate::utils::Random;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A deferred record of proposed changes to one segment of a cell.
///
/// Holds the target segment (or "new segment"), the synapse indices that were
/// connected-and-active at capture time, and the learning cells to attach as
/// new synapses if the update is applied positively. The captured synapse set
/// is frozen at construction: permanence changes between capture and
/// application do not alter it.
///
/// The target is identified by its index in the owning cell's segment list;
/// segment lists are append-only, so the handle stays valid until the update
/// is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentUpdate {
    segment: Option<SegmentIdx>,
    active_synapse_ids: Vec<SynapseIdx>,
    learning_cells: Vec<CellIdx>,
    add_new_synapses: bool,
    num_prediction_steps: u8,
}

impl SegmentUpdate {
    /// Captures an update for `target` (`None` means "create a new segment").
    ///
    /// The active synapse set is read from the current step, or the previous
    /// step when `previous` is true. When `add_new_synapses` is set, a random
    /// subset of the learning-cell pool is chosen: candidates from the cell's
    /// own column or already attached to the target segment are excluded, and
    /// the subset size is `new_synapse_count` minus the number of captured
    /// synapses (floored at zero, clamped to the eligible count).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn capture(
        target: Option<(SegmentIdx, &Segment)>,
        previous: bool,
        add_new_synapses: bool,
        own_column: ColumnIdx,
        cells_per_col: usize,
        learning_pool: &[CellIdx],
        new_synapse_count: usize,
        view: &SourceView<'_>,
        rng: &mut Random,
    ) -> Self {
        let active_synapse_ids = target
            .map(|(_, seg)| seg.active_synapse_ids(view, previous))
            .unwrap_or_default();

        let mut learning_cells = Vec::new();
        if add_new_synapses {
            // TODO restrict the candidate pool to locality_radius columns
            // once distal locality is supported.
            let wanted = new_synapse_count.saturating_sub(active_synapse_ids.len());
            if wanted > 0 && !learning_pool.is_empty() {
                let existing: AHashSet<CellIdx> = target
                    .map(|(_, seg)| {
                        seg.synapses()
                            .iter()
                            .filter_map(|syn| match syn.source() {
                                SynapseSource::Cell(id) => Some(id),
                                SynapseSource::Input(_) => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let eligible: Vec<CellIdx> = learning_pool
                    .iter()
                    .copied()
                    .filter(|&id| (id as usize / cells_per_col) as ColumnIdx != own_column)
                    .filter(|id| !existing.contains(id))
                    .collect();

                let wanted = wanted.min(eligible.len());
                if wanted > 0 {
                    learning_cells = rng.sample(eligible, wanted);
                }
            }
        }

        Self {
            segment: target.map(|(idx, _)| idx),
            active_synapse_ids,
            learning_cells,
            add_new_synapses,
            num_prediction_steps: 1,
        }
    }

    /// The target segment index, or `None` for "create a new segment".
    #[inline]
    pub fn segment(&self) -> Option<SegmentIdx> {
        self.segment
    }

    /// The frozen set of connected-and-active synapse indices.
    #[inline]
    pub fn active_synapse_ids(&self) -> &[SynapseIdx] {
        &self.active_synapse_ids
    }

    /// Learning cells selected for synapse growth.
    #[inline]
    pub fn learning_cells(&self) -> &[CellIdx] {
        &self.learning_cells
    }

    /// Whether this update grows new synapses when applied positively.
    #[inline]
    pub fn add_new_synapses(&self) -> bool {
        self.add_new_synapses
    }

    /// Prediction steps assigned to a newly created segment (defaults to 1).
    #[inline]
    pub fn num_prediction_steps(&self) -> u8 {
        self.num_prediction_steps
    }

    pub(crate) fn set_num_prediction_steps(&mut self, steps: u8) {
        self.num_prediction_steps = steps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::CellState;
    use crate::types::Permanence;

    const CONNECTED: Permanence = 0.2;

    fn learning_states(n: usize) -> Vec<CellState> {
        let mut states = vec![CellState::default(); n];
        for s in &mut states {
            s.was_active = true;
            s.was_learning = true;
        }
        states
    }

    #[test]
    fn test_capture_excludes_own_column() {
        // 3 columns x 2 cells; every cell was learning. An update for a cell
        // in column 1 must never pick cells 2 or 3.
        let states = learning_states(6);
        let view = SourceView { states: &states, input: &[] };
        let pool: Vec<CellIdx> = (0..6).collect();
        let mut rng = Random::new(7);

        for _ in 0..20 {
            let update = SegmentUpdate::capture(
                None, true, true, 1, 2, &pool, 4, &view, &mut rng,
            );
            for &cell in update.learning_cells() {
                assert!(cell / 2 != 1, "picked cell {cell} from own column");
            }
            assert!(update.learning_cells().len() <= 4);
        }
    }

    #[test]
    fn test_capture_excludes_existing_sources() {
        let states = learning_states(4);
        let view = SourceView { states: &states, input: &[] };
        let pool: Vec<CellIdx> = (0..4).collect();
        let mut rng = Random::new(7);

        // Segment on a cell in column 0 already connected to cell 2.
        let mut seg = Segment::new(1);
        seg.create_synapse(SynapseSource::Cell(2), 0.3);

        let update = SegmentUpdate::capture(
            Some((0, &seg)), true, true, 0, 1, &pool, 8, &view, &mut rng,
        );
        assert!(!update.learning_cells().contains(&2));
        // Cells 1 and 3 remain eligible (0 is the own column).
        assert_eq!(update.learning_cells().len(), 2);
    }

    #[test]
    fn test_capture_bounded_by_captured_actives() {
        // new_synapse_count 3 with 2 captured actives leaves room for 1.
        let mut states = learning_states(8);
        for s in &mut states {
            s.is_active = true;
        }
        let view = SourceView { states: &states, input: &[] };
        let pool: Vec<CellIdx> = (0..8).collect();
        let mut rng = Random::new(7);

        let mut seg = Segment::new(1);
        seg.create_synapse(SynapseSource::Cell(2), 0.5);
        seg.create_synapse(SynapseSource::Cell(3), 0.5);
        seg.process(&view, CONNECTED);

        let update = SegmentUpdate::capture(
            Some((0, &seg)), false, true, 0, 1, &pool, 3, &view, &mut rng,
        );
        assert_eq!(update.active_synapse_ids().len(), 2);
        assert_eq!(update.learning_cells().len(), 1);
    }

    #[test]
    fn test_zero_new_synapse_count_grows_nothing() {
        let states = learning_states(4);
        let view = SourceView { states: &states, input: &[] };
        let pool: Vec<CellIdx> = (0..4).collect();
        let mut rng = Random::new(7);

        let update = SegmentUpdate::capture(
            None, true, true, 0, 1, &pool, 0, &view, &mut rng,
        );
        assert!(update.learning_cells().is_empty());
    }

    #[test]
    fn test_capture_set_is_frozen() {
        let mut states = learning_states(2);
        states[0].is_active = true;
        states[1].is_active = false;
        let view = SourceView { states: &states, input: &[] };
        let mut rng = Random::new(7);

        let mut seg = Segment::new(1);
        seg.create_synapse(SynapseSource::Cell(0), 0.5);
        seg.create_synapse(SynapseSource::Cell(1), 0.5);
        seg.process(&view, CONNECTED);

        let update = SegmentUpdate::capture(
            Some((0, &seg)), false, false, 0, 1, &[], 0, &view, &mut rng,
        );
        assert_eq!(update.active_synapse_ids(), &[0]);

        // Later permanence changes do not alter the captured set.
        seg.increase_permanences(0.4);
        assert_eq!(update.active_synapse_ids(), &[0]);
    }
}
