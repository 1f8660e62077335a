//! Core types for the region substrate.
//!
//! This module contains the primitive type aliases and the global constants
//! shared by the spatial and temporal poolers.

mod primitives;

pub use primitives::*;
