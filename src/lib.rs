//! # Veles - Cortical Learning Algorithm region in Rust
//!
//! Veles is an online, unsupervised sequence-learning engine over sparse
//! binary inputs, implementing the two-phase pooler design of Numenta's
//! Cortical Learning Algorithms (CLA).
//!
//! ## Overview
//!
//! A [`Region`](algorithms::Region) is a grid of columns, each owning a fixed
//! set of cells. Per time step the region:
//!
//! - **Spatial pooling**: sparsifies the input bit matrix into a small set of
//!   active columns (overlap + boosting + local inhibition), or maps input
//!   bits directly onto columns in hardcoded mode.
//! - **Temporal pooling**: learns transitions between the active column sets
//!   by growing distal dendrite segments on cells, whose synapses connect to
//!   cells that were active in earlier steps. Cells whose segments recognize
//!   the current activity enter a predicting state, tagged with how many
//!   steps out the activation is expected.
//!
//! ## Quick Start
//!
//! ```rust
//! use veles::prelude::*;
//!
//! // A 4x1 hardcoded region: input bits map 1:1 onto columns.
//! let mut region = Region::new(RegionParams {
//!     input_width: 4,
//!     input_height: 1,
//!     hardcoded_spatial: true,
//!     cells_per_col: 1,
//!     seg_active_threshold: 1,
//!     new_synapse_count: 2,
//!     temporal_learning: true,
//!     ..Default::default()
//! }).unwrap();
//!
//! // Feed a repeating two-step sequence.
//! for _ in 0..10 {
//!     region.set_input(&[1, 0, 1, 0]).unwrap();
//!     region.run_once();
//!     region.set_input(&[0, 1, 0, 1]).unwrap();
//!     region.run_once();
//! }
//!
//! let (activation_acc, prediction_acc) = region.last_accuracy();
//! assert!(activation_acc >= 0.0 && prediction_acc >= 0.0);
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): standard library support
//! - `serde`: serialization/deserialization derives on parameters and state

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod types;
pub mod algorithms;
pub mod utils;

/// Re-export of commonly used types for convenience.
pub mod prelude {
    pub use crate::types::{
        CellIdx, ColumnIdx, Permanence, Real, SegmentIdx, SynapseIdx, UInt,
        MAX_TIME_STEPS,
    };
    pub use crate::algorithms::{
        Region, RegionParams, RegionStats, Segment, Synapse, SynapseSource,
    };
    pub use crate::utils::Random;
    pub use crate::error::{Result, VelesError};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library.
pub mod error {
    use thiserror::Error;

    /// Main error type for veles operations.
    #[derive(Error, Debug)]
    pub enum VelesError {
        /// Invalid parameter value at region construction.
        #[error("Invalid parameter '{name}': {message}")]
        InvalidParameter {
            /// Name of the invalid parameter.
            name: &'static str,
            /// Description of the error.
            message: String,
        },

        /// A caller-supplied buffer does not match the region topology.
        #[error("Buffer length {actual} does not match expected length {expected}")]
        BufferSizeMismatch {
            /// The length the region expects.
            expected: usize,
            /// The length the caller supplied.
            actual: usize,
        },
    }

    /// Result type alias using [`VelesError`].
    pub type Result<T> = std::result::Result<T, VelesError>;
}

pub use error::{Result, VelesError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
