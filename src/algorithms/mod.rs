//! The CLA region and its dendrite substrate.
//!
//! Structure mirrors the region graph: a [`Region`] owns a grid of
//! [`Column`]s, each column owns its [`Cell`]s and one proximal [`Segment`],
//! each cell owns its distal segments and a queue of pending
//! [`SegmentUpdate`]s, and each segment owns its [`Synapse`]s.
//!
//! One call to [`Region::run_once`] advances all entity state one time step,
//! runs the spatial pooler (overlap, inhibition, boosting) and then the
//! temporal pooler (activation, prediction, deferred learning).

mod cell;
mod column;
mod region;
mod segment;
mod segment_update;
mod synapse;

pub use cell::{Cell, CellState};
pub use column::Column;
pub use region::{Region, RegionParams, RegionStats};
pub use segment::Segment;
pub use segment_update::SegmentUpdate;
pub use synapse::{Synapse, SynapseSource};

pub(crate) use synapse::SourceView;
