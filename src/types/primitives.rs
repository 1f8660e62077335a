//! Primitive type definitions for the CLA region.
//!
//! These aliases pin down the integer/float widths the substrate uses so the
//! state arrays stay compact and the arithmetic is explicit.

/// 32-bit floating point number.
pub type Real32 = f32;

/// 64-bit floating point number.
pub type Real64 = f64;

/// Default floating point type.
pub type Real = Real32;

/// Default unsigned integer type for counts and thresholds.
pub type UInt = u32;

/// Index of a column within the region's column grid (row-major).
pub type ColumnIdx = u32;

/// Flat index of a cell within the region
/// (`column_index * cells_per_col + cell_index`).
pub type CellIdx = u32;

/// Index of a segment within its owning cell's segment list.
///
/// Segment lists are append-only, so a `SegmentIdx` stays valid for the
/// lifetime of the region once issued.
pub type SegmentIdx = u16;

/// Index of a synapse within its owning segment's synapse list.
///
/// Synapse lists are append-only as well.
pub type SynapseIdx = u16;

/// Synapse permanence value (0.0 to 1.0).
pub type Permanence = Real32;

/// Minimum permanence value.
pub const MIN_PERMANENCE: Permanence = 0.0;

/// Maximum permanence value.
pub const MAX_PERMANENCE: Permanence = 1.0;

/// Epsilon for floating point comparisons.
pub const EPSILON: Permanence = 1e-6;

/// Most prediction steps a segment can represent.
///
/// A segment's prediction steps are clamped to `[1, MAX_TIME_STEPS]`; a cell
/// entering the predicting state starts its own step count here and lowers it
/// to the minimum over its active segments.
pub const MAX_TIME_STEPS: u8 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(core::mem::size_of::<CellIdx>(), 4);
        assert_eq!(core::mem::size_of::<ColumnIdx>(), 4);
        assert_eq!(core::mem::size_of::<SegmentIdx>(), 2);
        assert_eq!(core::mem::size_of::<SynapseIdx>(), 2);
        assert_eq!(core::mem::size_of::<Permanence>(), 4);
    }

    #[test]
    fn test_permanence_bounds() {
        assert!(MIN_PERMANENCE < MAX_PERMANENCE);
        assert!(EPSILON > 0.0);
        assert!(EPSILON < 0.001);
    }

    #[test]
    fn test_max_time_steps() {
        assert!(MAX_TIME_STEPS >= 1);
    }
}
