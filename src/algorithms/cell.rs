//! Cells: per-column temporal context units.

use crate::algorithms::{Segment, SegmentUpdate, SynapseSource};
use crate::types::{Permanence, SegmentIdx, UInt, MAX_TIME_STEPS};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Activity flags for one cell, current and previous step.
///
/// Cell state lives in a flat region-owned array indexed by `CellIdx` so the
/// poolers can read any cell's activity while mutating another cell's
/// dendrites. `prediction_steps` is meaningful only while `is_predicting`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellState {
    /// Active this step.
    pub is_active: bool,
    /// Active in the previous step.
    pub was_active: bool,
    /// Predicting a near-future activation this step.
    pub is_predicting: bool,
    /// Was predicting in the previous step.
    pub was_predicted: bool,
    /// Chosen as a learning cell this step (implies active).
    pub is_learning: bool,
    /// Was a learning cell in the previous step.
    pub was_learning: bool,
    /// Fewest steps until the predicted activation, while predicting.
    pub prediction_steps: u8,
}

impl CellState {
    /// Shifts current flags into the previous-step flags and clears the
    /// current step.
    pub(crate) fn advance_time_step(&mut self) {
        self.was_active = self.is_active;
        self.was_predicted = self.is_predicting;
        self.was_learning = self.is_learning;
        self.is_active = false;
        self.is_predicting = false;
        self.is_learning = false;
    }
}

/// A cell's dendrites: a growable list of distal segments plus the queue of
/// pending segment updates.
///
/// Segment lists are append-only; a [`SegmentIdx`] issued for this cell stays
/// valid for the region's lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cell {
    segments: Vec<Segment>,
    pending: Vec<SegmentUpdate>,
}

impl Cell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of distal segments on this cell.
    #[inline]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// The segments, in creation order.
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of queued, not yet applied segment updates.
    #[inline]
    pub fn num_pending_updates(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// Segments whose prediction-step count equals `steps`
    /// (all segments when `steps` is 0).
    pub fn num_segments_with_steps(&self, steps: u8) -> usize {
        if steps == 0 {
            return self.segments.len();
        }
        self.segments
            .iter()
            .filter(|seg| seg.prediction_steps() == steps)
            .count()
    }

    /// Advances every owned segment one time step. The cell's own flags are
    /// advanced by the region alongside all other cell states.
    pub(crate) fn advance_time_step(&mut self) {
        for seg in &mut self.segments {
            seg.advance_time_step();
        }
    }

    /// The segment that was active in the previous step. Sequence segments
    /// are preferred; within the preferred class the segment with the most
    /// previously-active connected synapses wins, earliest index on ties.
    pub(crate) fn previous_active_segment(&self) -> Option<SegmentIdx> {
        let mut best: Option<SegmentIdx> = None;
        let mut best_count = 0;
        let mut found_sequence = false;

        for (i, seg) in self.segments.iter().enumerate() {
            if !seg.was_active() {
                continue;
            }
            let count = seg.num_prev_active_connected();
            let replaces = match (found_sequence, seg.is_sequence()) {
                (true, false) => false,
                (false, true) => true,
                _ => best.is_none() || count > best_count,
            };
            if replaces {
                best = Some(i as SegmentIdx);
                best_count = count;
                found_sequence = found_sequence || seg.is_sequence();
            }
        }

        best
    }

    /// Aggressive best-match: among segments predicting exactly `steps`
    /// ahead, the one with the most active synapses *regardless of
    /// connection* (previous or current step), provided the count strictly
    /// exceeds `min_count`. Permanences may be sub-threshold.
    pub(crate) fn best_matching_segment(
        &self,
        steps: u8,
        previous: bool,
        min_count: UInt,
    ) -> Option<SegmentIdx> {
        let mut best: Option<SegmentIdx> = None;
        let mut best_count = min_count;

        for (i, seg) in self.segments.iter().enumerate() {
            if seg.prediction_steps() != steps {
                continue;
            }
            let count = if previous {
                seg.num_prev_active_all()
            } else {
                seg.num_active_all()
            };
            if count > best_count {
                best_count = count;
                best = Some(i as SegmentIdx);
            }
        }

        best
    }

    /// Index of the first currently-active segment, if any.
    pub(crate) fn first_active_segment(&self) -> Option<SegmentIdx> {
        self.segments
            .iter()
            .position(Segment::is_active)
            .map(|i| i as SegmentIdx)
    }

    /// The fewest prediction steps over the currently-active segments,
    /// starting from [`MAX_TIME_STEPS`]. This becomes the cell's own
    /// prediction-step count when it enters the predicting state.
    pub(crate) fn min_active_prediction_steps(&self) -> u8 {
        let mut steps = MAX_TIME_STEPS;
        for seg in &self.segments {
            if seg.is_active() && seg.prediction_steps() < steps {
                steps = seg.prediction_steps();
            }
        }
        steps
    }

    pub(crate) fn queue_update(&mut self, update: SegmentUpdate) {
        self.pending.push(update);
    }

    /// Creates a new (empty) segment and returns its index.
    pub(crate) fn create_segment(&mut self, threshold: UInt) -> SegmentIdx {
        let idx = self.segments.len() as SegmentIdx;
        self.segments.push(Segment::new(threshold));
        idx
    }

    /// Applies every queued update and clears the queue.
    ///
    /// Positive application reinforces each update's captured synapses and
    /// decays the rest of the target segment, then grows new synapses (on the
    /// target, or on a freshly created segment carrying the update's
    /// prediction steps). Negative application only decays the captured
    /// synapses; nothing is grown.
    pub(crate) fn apply_pending_updates(
        &mut self,
        positive: bool,
        threshold: UInt,
        initial_permanence: Permanence,
        increment: Permanence,
        decrement: Permanence,
    ) {
        // Move the queue out so segment growth below can borrow freely; the
        // buffer is handed back afterwards to keep its capacity.
        let updates = std::mem::take(&mut self.pending);

        for update in &updates {
            if let Some(idx) = update.segment() {
                debug_assert!((idx as usize) < self.segments.len());
                let seg = &mut self.segments[idx as usize];
                if positive {
                    seg.reinforce(update.active_synapse_ids(), increment, decrement);
                } else {
                    seg.punish(update.active_synapse_ids(), decrement);
                }
            }

            if update.add_new_synapses() && positive && !update.learning_cells().is_empty() {
                let target = match update.segment() {
                    Some(idx) => idx,
                    None => {
                        let idx = self.create_segment(threshold);
                        self.segments[idx as usize]
                            .set_prediction_steps(update.num_prediction_steps());
                        idx
                    }
                };
                let seg = &mut self.segments[target as usize];
                for &cell in update.learning_cells() {
                    seg.create_synapse(SynapseSource::Cell(cell), initial_permanence);
                }
            }
        }

        self.pending = updates;
        self.pending.clear();
    }
}
