//! Dendrite segments: threshold detectors over a bag of synapses.

use smallvec::SmallVec;

use crate::algorithms::{SourceView, Synapse, SynapseSource};
use crate::types::{Permanence, SynapseIdx, UInt, MAX_TIME_STEPS};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single dendrite segment forming synapses to other cells or input bits.
///
/// A segment is active when at least `threshold` of its connected synapses
/// have active sources. Distal segments additionally carry a prediction-step
/// count: the number of time steps in the future the owning cell expects to
/// activate when this segment fires. A count of 1 marks a *sequence* segment
/// (direct next-step transition). Proximal segments never get a step count
/// and never become sequence segments.
///
/// Activity counts for the current and previous step are cached by
/// [`process`](Segment::process) / [`advance_time_step`](Segment::advance_time_step)
/// so that the temporal pooler phases can read them without rescanning.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    synapses: SmallVec<[Synapse; 8]>,
    threshold: UInt,
    prediction_steps: u8,
    is_sequence: bool,
    is_active: bool,
    was_active: bool,
    n_active_connected: UInt,
    n_prev_active_connected: UInt,
    n_active_all: UInt,
    n_prev_active_all: UInt,
}

impl Segment {
    /// Creates an empty segment with the given activation threshold.
    pub(crate) fn new(threshold: UInt) -> Self {
        Self {
            synapses: SmallVec::new(),
            threshold,
            prediction_steps: 0,
            is_sequence: false,
            is_active: false,
            was_active: false,
            n_active_connected: 0,
            n_prev_active_connected: 0,
            n_active_all: 0,
            n_prev_active_all: 0,
        }
    }

    /// Number of synapses on this segment.
    #[inline]
    pub fn num_synapses(&self) -> usize {
        self.synapses.len()
    }

    /// The synapses on this segment, in creation order.
    #[inline]
    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }

    /// The activation threshold.
    #[inline]
    pub fn threshold(&self) -> UInt {
        self.threshold
    }

    /// Prediction steps; 0 until assigned via
    /// [`set_prediction_steps`](Segment::set_prediction_steps).
    #[inline]
    pub fn prediction_steps(&self) -> u8 {
        self.prediction_steps
    }

    /// Whether this is a sequence segment (prediction steps == 1).
    #[inline]
    pub fn is_sequence(&self) -> bool {
        self.is_sequence
    }

    /// Whether the segment is active this step (set by `process`).
    #[inline]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Whether the segment was active in the previous step.
    #[inline]
    pub fn was_active(&self) -> bool {
        self.was_active
    }

    /// Connected synapses with active sources, current step.
    #[inline]
    pub fn num_active_connected(&self) -> UInt {
        self.n_active_connected
    }

    /// Connected synapses with active sources, previous step.
    #[inline]
    pub fn num_prev_active_connected(&self) -> UInt {
        self.n_prev_active_connected
    }

    /// Synapses with active sources regardless of connection, current step.
    #[inline]
    pub fn num_active_all(&self) -> UInt {
        self.n_active_all
    }

    /// Synapses with active sources regardless of connection, previous step.
    #[inline]
    pub fn num_prev_active_all(&self) -> UInt {
        self.n_prev_active_all
    }

    /// Rolls current-step state into previous-step state and resets the
    /// current step. Recurses into every synapse's connected flag.
    pub(crate) fn advance_time_step(&mut self) {
        self.was_active = self.is_active;
        self.is_active = false;
        self.n_prev_active_connected = self.n_active_connected;
        self.n_prev_active_all = self.n_active_all;
        self.n_active_connected = 0;
        self.n_active_all = 0;

        for syn in &mut self.synapses {
            syn.advance_time_step();
        }
    }

    /// Processes the segment for the current step: refreshes each synapse's
    /// connected flag from its permanence, counts active synapses (connected
    /// and total), and derives the segment's active state.
    ///
    /// An empty segment is never active; the threshold comparison is `>=`.
    pub(crate) fn process(&mut self, view: &SourceView<'_>, connected_perm: Permanence) {
        let mut connected = 0;
        let mut all = 0;
        for syn in &mut self.synapses {
            syn.refresh_connected(connected_perm);
            if view.is_active(syn.source()) {
                all += 1;
                if syn.is_connected() {
                    connected += 1;
                }
            }
        }

        self.n_active_connected = connected;
        self.n_active_all = all;
        self.is_active = !self.synapses.is_empty() && connected >= self.threshold;
    }

    /// Sets the prediction-step count, clamped to `[1, MAX_TIME_STEPS]`.
    /// The sequence flag follows: a segment is a sequence segment exactly
    /// when its step count is 1.
    pub(crate) fn set_prediction_steps(&mut self, steps: u8) {
        self.prediction_steps = steps.clamp(1, MAX_TIME_STEPS);
        self.is_sequence = self.prediction_steps == 1;
    }

    /// True if at least `threshold` synapses were active at t-1 from sources
    /// that were in the learning state. Recounted from the synapses; the
    /// cached previous counts do not distinguish learning sources.
    pub(crate) fn was_active_from_learning(&self, view: &SourceView<'_>) -> bool {
        let count = self
            .synapses
            .iter()
            .filter(|syn| syn.was_active_from_learning(view))
            .count();
        count as UInt >= self.threshold
    }

    /// Appends a new synapse; existing synapse indices are preserved.
    pub(crate) fn create_synapse(
        &mut self,
        source: SynapseSource,
        permanence: Permanence,
    ) -> SynapseIdx {
        let idx = self.synapses.len() as SynapseIdx;
        self.synapses.push(Synapse::new(source, permanence));
        idx
    }

    /// Indices of synapses that are connected and active (current step when
    /// `previous` is false, previous step otherwise), in synapse order.
    pub(crate) fn active_synapse_ids(
        &self,
        view: &SourceView<'_>,
        previous: bool,
    ) -> Vec<SynapseIdx> {
        self.synapses
            .iter()
            .enumerate()
            .filter(|(_, syn)| {
                if previous {
                    syn.was_active(view, true)
                } else {
                    syn.is_active(view, true)
                }
            })
            .map(|(i, _)| i as SynapseIdx)
            .collect()
    }

    /// Whether any synapse already reads from `source`.
    pub(crate) fn has_source(&self, source: SynapseSource) -> bool {
        self.synapses.iter().any(|syn| syn.source() == source)
    }

    /// Proximal learning rule: synapses with active sources are increased,
    /// all others decreased.
    pub(crate) fn adapt_permanences(
        &mut self,
        view: &SourceView<'_>,
        increment: Permanence,
        decrement: Permanence,
    ) {
        for syn in &mut self.synapses {
            if view.is_active(syn.source()) {
                syn.increase(increment);
            } else {
                syn.decrease(decrement);
            }
        }
    }

    /// Increases every synapse by `amount`.
    pub(crate) fn increase_permanences(&mut self, amount: Permanence) {
        for syn in &mut self.synapses {
            syn.increase(amount);
        }
    }

    /// Positive reinforcement: increase the captured synapses, decay every
    /// other synapse on the segment. `active_ids` must be sorted ascending.
    pub(crate) fn reinforce(
        &mut self,
        active_ids: &[SynapseIdx],
        increment: Permanence,
        decrement: Permanence,
    ) {
        let mut next = active_ids.iter().peekable();
        for (i, syn) in self.synapses.iter_mut().enumerate() {
            if next.peek().is_some_and(|&&id| id as usize == i) {
                syn.increase(increment);
                next.next();
            } else {
                syn.decrease(decrement);
            }
        }
    }

    /// Negative reinforcement: decrease the captured synapses only.
    pub(crate) fn punish(&mut self, active_ids: &[SynapseIdx], decrement: Permanence) {
        for &id in active_ids {
            if let Some(syn) = self.synapses.get_mut(id as usize) {
                syn.decrease(decrement);
            }
        }
    }

    /// Synapses whose permanence clears `connected_perm`, computed live from
    /// the permanence rather than the per-step cache.
    pub(crate) fn connected_synapses(
        &self,
        connected_perm: Permanence,
    ) -> impl Iterator<Item = &Synapse> {
        self.synapses
            .iter()
            .filter(move |syn| syn.permanence() >= connected_perm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::CellState;

    const CONNECTED: Permanence = 0.2;
    const INC: Permanence = 0.015;

    fn view_with<'a>(states: &'a [CellState], input: &'a [u8]) -> SourceView<'a> {
        SourceView { states, input }
    }

    fn active_states(n: usize) -> Vec<CellState> {
        let mut states = vec![CellState::default(); n];
        for s in &mut states {
            s.is_active = true;
        }
        states
    }

    #[test]
    fn test_empty_segment_never_active() {
        let mut seg = Segment::new(0);
        let view = view_with(&[], &[]);
        seg.process(&view, CONNECTED);
        assert!(!seg.is_active());
    }

    #[test]
    fn test_process_counts_and_threshold_boundary() {
        // One source at the connected threshold, one just below it.
        let states = active_states(2);
        let view = view_with(&states, &[]);

        let mut seg = Segment::new(2);
        seg.create_synapse(SynapseSource::Cell(0), CONNECTED);
        seg.create_synapse(SynapseSource::Cell(1), CONNECTED - INC);

        seg.process(&view, CONNECTED);
        assert_eq!(seg.num_active_connected(), 1);
        assert_eq!(seg.num_active_all(), 2);
        assert!(!seg.is_active());

        // Raising the weak synapse across the threshold activates the
        // segment on the next step.
        seg.increase_permanences(INC);
        seg.advance_time_step();
        seg.process(&view, CONNECTED);
        assert_eq!(seg.num_active_connected(), 2);
        assert!(seg.is_active());
    }

    #[test]
    fn test_advance_shifts_state() {
        let states = active_states(1);
        let view = view_with(&states, &[]);

        let mut seg = Segment::new(1);
        seg.create_synapse(SynapseSource::Cell(0), 0.5);
        seg.process(&view, CONNECTED);
        assert!(seg.is_active());
        assert_eq!(seg.num_active_all(), 1);

        seg.advance_time_step();
        assert!(seg.was_active());
        assert!(!seg.is_active());
        assert_eq!(seg.num_prev_active_connected(), 1);
        assert_eq!(seg.num_prev_active_all(), 1);
        assert_eq!(seg.num_active_connected(), 0);
        assert_eq!(seg.num_active_all(), 0);

        // Advancing again with no activity in between zeroes everything.
        seg.advance_time_step();
        assert!(!seg.was_active());
        assert_eq!(seg.num_prev_active_connected(), 0);
        assert_eq!(seg.num_prev_active_all(), 0);
    }

    #[test]
    fn test_prediction_steps_clamp() {
        let mut seg = Segment::new(1);

        for k in 1..=MAX_TIME_STEPS {
            seg.set_prediction_steps(k);
            assert_eq!(seg.prediction_steps(), k);
        }

        seg.set_prediction_steps(0);
        assert_eq!(seg.prediction_steps(), 1);
        assert!(seg.is_sequence());

        seg.set_prediction_steps(MAX_TIME_STEPS + 5);
        assert_eq!(seg.prediction_steps(), MAX_TIME_STEPS);
        assert!(!seg.is_sequence());
    }

    #[test]
    fn test_sequence_iff_one_step() {
        let mut seg = Segment::new(1);
        seg.set_prediction_steps(1);
        assert!(seg.is_sequence());
        seg.set_prediction_steps(2);
        assert!(!seg.is_sequence());
    }

    #[test]
    fn test_was_active_from_learning_needs_threshold() {
        // Both sources were active, only one was learning; threshold 2 fails
        // until both are learning sources.
        let mut states = vec![CellState::default(); 2];
        for s in &mut states {
            s.was_active = true;
        }
        states[0].was_learning = true;

        let mut seg = Segment::new(2);
        seg.create_synapse(SynapseSource::Cell(0), 0.5);
        seg.create_synapse(SynapseSource::Cell(1), 0.5);
        {
            let view = view_with(&states, &[]);
            // Connect, then roll so was_connected is set.
            for syn in &mut seg.synapses {
                syn.refresh_connected(CONNECTED);
                syn.advance_time_step();
            }
            assert!(!seg.was_active_from_learning(&view));
        }

        states[1].was_learning = true;
        let view = view_with(&states, &[]);
        assert!(seg.was_active_from_learning(&view));
    }

    #[test]
    fn test_reinforce_and_punish() {
        let states = active_states(3);
        let view = view_with(&states, &[]);

        let mut seg = Segment::new(1);
        seg.create_synapse(SynapseSource::Cell(0), 0.5);
        seg.create_synapse(SynapseSource::Cell(1), 0.5);
        seg.create_synapse(SynapseSource::Cell(2), 0.5);
        seg.process(&view, CONNECTED);

        seg.reinforce(&[0, 2], 0.1, 0.05);
        assert!((seg.synapses()[0].permanence() - 0.6).abs() < 1e-6);
        assert!((seg.synapses()[1].permanence() - 0.45).abs() < 1e-6);
        assert!((seg.synapses()[2].permanence() - 0.6).abs() < 1e-6);

        seg.punish(&[1], 0.05);
        assert!((seg.synapses()[1].permanence() - 0.4).abs() < 1e-6);
        // Non-captured synapses untouched by punishment.
        assert!((seg.synapses()[0].permanence() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_active_synapse_ids_connected_only() {
        let states = active_states(2);
        let view = view_with(&states, &[]);

        let mut seg = Segment::new(1);
        seg.create_synapse(SynapseSource::Cell(0), 0.5);
        seg.create_synapse(SynapseSource::Cell(1), 0.1); // below threshold
        seg.process(&view, CONNECTED);

        assert_eq!(seg.active_synapse_ids(&view, false), vec![0]);
    }
}
