//! Synapses and the activity view they are evaluated against.

use crate::types::{CellIdx, Permanence, UInt, MAX_PERMANENCE, MIN_PERMANENCE};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The input source a synapse reads its activity from.
///
/// A synapse never owns its source; this is a stable identifier into the
/// region-owned cell space or into the external input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SynapseSource {
    /// A cell inside the region (distal synapses).
    Cell(CellIdx),
    /// An external input bit (proximal synapses).
    Input(UInt),
}

/// Read-only view of source activity for the current step.
///
/// Segments and synapses are evaluated against this view rather than holding
/// references to cells, keeping all cross-entity reads explicit. Input bits
/// have no previous-step state and no learning state.
#[derive(Clone, Copy)]
pub(crate) struct SourceView<'a> {
    pub states: &'a [crate::algorithms::CellState],
    pub input: &'a [u8],
}

impl SourceView<'_> {
    #[inline]
    pub(crate) fn is_active(&self, source: SynapseSource) -> bool {
        match source {
            SynapseSource::Cell(id) => self.states[id as usize].is_active,
            SynapseSource::Input(i) => self.input[i as usize] == 1,
        }
    }

    #[inline]
    pub(crate) fn was_active(&self, source: SynapseSource) -> bool {
        match source {
            SynapseSource::Cell(id) => self.states[id as usize].was_active,
            SynapseSource::Input(_) => false,
        }
    }

    #[inline]
    pub(crate) fn was_learning(&self, source: SynapseSource) -> bool {
        match source {
            SynapseSource::Cell(id) => self.states[id as usize].was_learning,
            SynapseSource::Input(_) => false,
        }
    }
}

/// A single synapse: a permanence-weighted connection from an input source
/// to the segment that owns it.
///
/// The connected flags are caches: `is_connected` is refreshed by
/// [`Segment::process`](crate::algorithms::Segment::process) from the current
/// permanence, and rolled into `was_connected` when the owning segment
/// advances a time step.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Synapse {
    source: SynapseSource,
    permanence: Permanence,
    is_connected: bool,
    was_connected: bool,
}

impl Synapse {
    pub(crate) fn new(source: SynapseSource, permanence: Permanence) -> Self {
        Self {
            source,
            permanence: permanence.clamp(MIN_PERMANENCE, MAX_PERMANENCE),
            is_connected: false,
            was_connected: false,
        }
    }

    /// The input source this synapse reads from.
    #[inline]
    pub fn source(&self) -> SynapseSource {
        self.source
    }

    /// Current permanence in `[0, 1]`.
    #[inline]
    pub fn permanence(&self) -> Permanence {
        self.permanence
    }

    /// Whether the synapse was connected as of the last `process` pass.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Whether the synapse was connected in the previous time step.
    #[inline]
    pub fn was_connected(&self) -> bool {
        self.was_connected
    }

    pub(crate) fn refresh_connected(&mut self, connected_perm: Permanence) {
        self.is_connected = self.permanence >= connected_perm;
    }

    pub(crate) fn advance_time_step(&mut self) {
        self.was_connected = self.is_connected;
        self.is_connected = false;
    }

    /// Active for the current input: the source is active and the synapse is
    /// connected (unless `connected_only` is false).
    #[inline]
    pub(crate) fn is_active(&self, view: &SourceView<'_>, connected_only: bool) -> bool {
        view.is_active(self.source) && (self.is_connected || !connected_only)
    }

    /// Active for the previous input, using the previous-step connected flag.
    #[inline]
    pub(crate) fn was_active(&self, view: &SourceView<'_>, connected_only: bool) -> bool {
        view.was_active(self.source) && (self.was_connected || !connected_only)
    }

    /// Was active at t-1 while its source was in the learning state.
    #[inline]
    pub(crate) fn was_active_from_learning(&self, view: &SourceView<'_>) -> bool {
        self.was_active(view, true) && view.was_learning(self.source)
    }

    /// Increases permanence by `amount`, saturating at 1.0.
    pub(crate) fn increase(&mut self, amount: Permanence) {
        self.permanence = (self.permanence + amount).min(MAX_PERMANENCE);
    }

    /// Decreases permanence by `amount`, saturating at 0.0.
    pub(crate) fn decrease(&mut self, amount: Permanence) {
        self.permanence = (self.permanence - amount).max(MIN_PERMANENCE);
    }
}
