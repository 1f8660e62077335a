//! The region: column grid, parameters, and the per-step protocol.

use crate::algorithms::{CellState, Column, SegmentUpdate, SourceView, SynapseSource};
use crate::error::{Result, VelesError};
use crate::types::{CellIdx, ColumnIdx, Permanence, Real, UInt};
use crate::utils::{index_to_coordinates, GridRect, Random};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Input-bit radius bias peak for default proximal permanences.
const RAD_BIAS_PEAK: f64 = 0.8;
/// Input-bit radius standard deviation bias.
const RAD_BIAS_STD_DEV: f64 = 0.25;

/// Construction parameters for a [`Region`].
///
/// All of the tunables the poolers consult live here, including the
/// permanence arithmetic the learning rules use; a region copies what it
/// needs at construction and never reads global state.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionParams {
    /// Width of the input bit matrix.
    pub input_width: usize,
    /// Height of the input bit matrix.
    pub input_height: usize,
    /// Width of the column grid (ignored in hardcoded mode, where the grid
    /// mirrors the input shape).
    pub col_grid_width: usize,
    /// Height of the column grid (ignored in hardcoded mode).
    pub col_grid_height: usize,
    /// Fraction of the (local) input area each column grows proximal
    /// synapses for. Must lie in `(0, 1]`.
    pub pct_input_per_col: Real,
    /// Fraction of a column's proximal synapses that must see active input
    /// for the column to enter inhibition.
    pub pct_min_overlap: Real,
    /// Furthest distance (in columns) synapse connections may reach;
    /// 0 = unrestricted.
    pub locality_radius: usize,
    /// Approximate fraction of columns within the inhibition radius that win.
    pub pct_local_activity: Real,
    /// Temporal-context cells per column.
    pub cells_per_col: usize,
    /// Connected active synapses needed to activate a segment.
    pub seg_active_threshold: UInt,
    /// Distal synapses grown per learning event (at most).
    pub new_synapse_count: usize,
    /// Enable proximal (spatial) learning. Forced off in hardcoded mode.
    pub spatial_learning: bool,
    /// Enable distal (temporal) learning.
    pub temporal_learning: bool,
    /// Map input bits directly onto columns, skipping the spatial pooler.
    pub hardcoded_spatial: bool,
    /// Seed for the region's random generator; negative draws OS entropy.
    pub seed: i64,
    /// Initialize every proximal permanence at 1.0 instead of the gaussian
    /// around the connected threshold with a center-distance bias.
    pub full_default_spatial_permanence: bool,
    /// Permanence at or above which a synapse is connected.
    pub connected_perm: Permanence,
    /// Permanence assigned to newly grown distal synapses.
    pub initial_permanence: Permanence,
    /// Learning increment for permanences.
    pub permanence_inc: Permanence,
    /// Learning decrement for permanences (0.005 and 0.010 are the stock
    /// choices).
    pub permanence_dec: Permanence,
    /// Smoothing factor for the duty-cycle moving averages.
    pub ema_alpha: Real,
    /// Active-synapse count a segment must strictly exceed to qualify as a
    /// best match.
    pub min_synapse_match_threshold: UInt,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            input_width: 64,
            input_height: 64,
            col_grid_width: 32,
            col_grid_height: 32,
            pct_input_per_col: 0.05,
            pct_min_overlap: 0.1,
            locality_radius: 0,
            pct_local_activity: 0.02,
            cells_per_col: 4,
            seg_active_threshold: 3,
            new_synapse_count: 5,
            spatial_learning: true,
            temporal_learning: true,
            hardcoded_spatial: false,
            seed: 42,
            full_default_spatial_permanence: false,
            connected_perm: 0.2,
            initial_permanence: 0.3,
            permanence_inc: 0.015,
            permanence_dec: 0.005,
            ema_alpha: 0.005,
            min_synapse_match_threshold: 1,
        }
    }
}

/// Snapshot statistics for a region.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionStats {
    /// Distal segments across all cells.
    pub total_segments: usize,
    /// Distal segments with prediction steps == 1.
    pub sequence_segments: usize,
    /// Distal synapses across all segments.
    pub total_synapses: usize,
    /// Queued segment updates not yet applied or discarded.
    pub pending_updates: usize,
    /// Fraction of active columns that were predicted.
    pub activation_accuracy: Real,
    /// Fraction of sequence-predicted columns that became active.
    pub prediction_accuracy: Real,
}

/// An HTM region: a grid of columns over a matrix of input bits.
///
/// Drives one time step per [`run_once`](Region::run_once) call:
/// state advance, then spatial pooling, then temporal pooling. The caller
/// updates the input bits between steps via [`set_input`](Region::set_input)
/// and reads results through the inspection methods.
///
/// # Example
///
/// ```rust
/// use veles::prelude::*;
///
/// let mut region = Region::new(RegionParams {
///     input_width: 2,
///     input_height: 1,
///     hardcoded_spatial: true,
///     cells_per_col: 1,
///     seg_active_threshold: 1,
///     new_synapse_count: 1,
///     temporal_learning: true,
///     ..Default::default()
/// }).unwrap();
///
/// region.set_input(&[1, 0]).unwrap();
/// region.run_once();
/// assert!(region.column_active(0));
/// assert!(!region.column_active(1));
/// ```
#[derive(Debug)]
pub struct Region {
    input_width: usize,
    input_height: usize,
    width: usize,
    height: usize,
    cells_per_col: usize,
    locality_radius: usize,
    seg_active_threshold: UInt,
    new_synapse_count: usize,
    pct_input_per_col: Real,
    pct_min_overlap: Real,
    pct_local_activity: Real,
    spatial_learning: bool,
    temporal_learning: bool,
    hardcoded_spatial: bool,
    connected_perm: Permanence,
    initial_permanence: Permanence,
    permanence_inc: Permanence,
    permanence_dec: Permanence,
    ema_alpha: Real,
    min_synapse_match_threshold: UInt,
    x_space: f64,
    y_space: f64,
    min_overlap: Real,
    inhibition_radius: Real,
    desired_local_activity: usize,
    columns: Vec<Column>,
    cell_states: Vec<CellState>,
    input: Vec<u8>,
    learning_pool: Vec<CellIdx>,
    rng: Random,
    iters: u64,
}

impl Region {
    /// Constructs a region from `params`, in one of two flavors.
    ///
    /// *Hardcoded spatial* (`hardcoded_spatial = true`): the column grid
    /// mirrors the input shape, input bits activate columns directly, no
    /// proximal synapses are created and spatial learning is disabled.
    ///
    /// *Trained spatial*: columns are spread over the input plane, each
    /// growing a proximal segment over a random sample of (locally bounded)
    /// input positions, with permanences either all 1.0 or drawn from a
    /// gaussian around the connected threshold scaled by a center-distance
    /// bias.
    ///
    /// # Errors
    ///
    /// Returns [`VelesError::InvalidParameter`] when the topology is empty,
    /// `cells_per_col < 1`, `seg_active_threshold < 1`, or (trained flavor)
    /// `pct_input_per_col` is outside `(0, 1]`.
    pub fn new(params: RegionParams) -> Result<Self> {
        validate(&params)?;

        let mut region = if params.hardcoded_spatial {
            Self::new_hardcoded(&params)
        } else {
            Self::new_trained(&params)?
        };

        let num_cells = region.columns.len() * region.cells_per_col;
        region.cell_states = vec![CellState::default(); num_cells];

        log::debug!(
            "region created: grid={}x{} input={}x{} cells/col={} minOverlap={} \
             desiredLocalActivity={} inhibitionRadius={}",
            region.width,
            region.height,
            region.input_width,
            region.input_height,
            region.cells_per_col,
            region.min_overlap,
            region.desired_local_activity,
            region.inhibition_radius,
        );

        Ok(region)
    }

    fn new_hardcoded(params: &RegionParams) -> Self {
        let width = params.input_width;
        let height = params.input_height;
        let num_cols = width * height;

        let mut columns = Vec::with_capacity(num_cols);
        for cy in 0..height {
            for cx in 0..width {
                columns.push(Column::new(
                    params.cells_per_col,
                    params.seg_active_threshold,
                    cx as UInt,
                    cy as UInt,
                    cx as UInt,
                    cy as UInt,
                ));
            }
        }

        Self {
            input_width: width,
            input_height: height,
            width,
            height,
            cells_per_col: params.cells_per_col,
            locality_radius: params.locality_radius,
            seg_active_threshold: params.seg_active_threshold,
            new_synapse_count: params.new_synapse_count,
            pct_input_per_col: 1.0 / num_cols as Real,
            pct_min_overlap: 1.0,
            pct_local_activity: 1.0,
            spatial_learning: false,
            temporal_learning: params.temporal_learning,
            hardcoded_spatial: true,
            connected_perm: params.connected_perm,
            initial_permanence: params.initial_permanence,
            permanence_inc: params.permanence_inc,
            permanence_dec: params.permanence_dec,
            ema_alpha: params.ema_alpha,
            min_synapse_match_threshold: params.min_synapse_match_threshold,
            x_space: 1.0,
            y_space: 1.0,
            min_overlap: 1.0,
            inhibition_radius: 0.0,
            desired_local_activity: 1,
            columns,
            cell_states: Vec::new(),
            input: vec![0; num_cols],
            learning_pool: Vec::new(),
            rng: Random::new(params.seed),
            iters: 0,
        }
    }

    fn new_trained(params: &RegionParams) -> Result<Self> {
        let input_width = params.input_width;
        let input_height = params.input_height;
        let width = params.col_grid_width;
        let height = params.col_grid_height;

        // Columns are spread over the input plane; spacing maps grid
        // positions to receptive-field centers.
        let x_space = (input_width as f64 - 1.0) / 1.0_f64.max(width as f64 - 1.0);
        let y_space = (input_height as f64 - 1.0) / 1.0_f64.max(height as f64 - 1.0);

        let mut columns = Vec::with_capacity(width * height);
        for cy in 0..height {
            for cx in 0..width {
                let ix = (cx as f64 * x_space).round() as UInt;
                let iy = (cy as f64 * y_space).round() as UInt;
                columns.push(Column::new(
                    params.cells_per_col,
                    params.seg_active_threshold,
                    ix,
                    iy,
                    cx as UInt,
                    cy as UInt,
                ));
            }
        }

        // How far apart two columns are in input space bounds the reach of
        // proximal synapses when a locality radius is set.
        let input_radius_f = params.locality_radius as f64 * x_space;
        let synapses_per_segment = if params.locality_radius == 0 {
            ((input_width * input_height) as Real * params.pct_input_per_col).round() as usize
        } else {
            ((input_radius_f * input_radius_f) as Real * params.pct_input_per_col).round() as usize
        };
        let min_overlap = synapses_per_segment as Real * params.pct_min_overlap;

        let mut rng = Random::new(params.seed);
        let input_radius = input_radius_f.round() as usize;
        let longer_side = input_width.max(input_height) as f64;

        for col in &mut columns {
            let (min_x, max_x, min_y, max_y) = if params.locality_radius > 0 {
                (
                    (col.ix() as usize).saturating_sub(input_radius),
                    (input_width - 1).min(col.ix() as usize + input_radius),
                    (col.iy() as usize).saturating_sub(input_radius),
                    (input_height - 1).min(col.iy() as usize + input_radius),
                )
            } else {
                (0, input_width - 1, 0, input_height - 1)
            };

            let mut positions = Vec::with_capacity((max_x - min_x + 1) * (max_y - min_y + 1));
            for x in min_x..=max_x {
                for y in min_y..=max_y {
                    positions.push((x, y));
                }
            }

            for (x, y) in rng.sample(positions, synapses_per_segment) {
                let permanence = if params.full_default_spatial_permanence {
                    1.0
                } else {
                    let p = (f64::from(params.connected_perm)
                        + f64::from(params.permanence_inc) * rng.normal(0.0, 1.0))
                    .max(0.0);
                    let dx = col.ix() as f64 - x as f64;
                    let dy = col.iy() as f64 - y as f64;
                    let distance = (dx * dx + dy * dy).sqrt();
                    let ex = distance / (longer_side * RAD_BIAS_STD_DEV);
                    let locality_bias = (RAD_BIAS_PEAK / 0.4) * (-(ex * ex) / 2.0).exp();
                    (p * locality_bias) as Permanence
                };

                let source = SynapseSource::Input((y * input_width + x) as UInt);
                col.proximal_mut().create_synapse(source, permanence);
            }
        }

        let inhibition_radius = average_receptive_field_radius(
            &columns,
            params.connected_perm,
            input_width,
            x_space,
        );

        let dla = if params.locality_radius == 0 {
            inhibition_radius * params.pct_local_activity
        } else {
            (params.locality_radius * params.locality_radius) as Real
                * params.pct_local_activity
        };
        let desired_local_activity = (dla.round() as usize).max(2);

        Ok(Self {
            input_width,
            input_height,
            width,
            height,
            cells_per_col: params.cells_per_col,
            locality_radius: params.locality_radius,
            seg_active_threshold: params.seg_active_threshold,
            new_synapse_count: params.new_synapse_count,
            pct_input_per_col: params.pct_input_per_col,
            pct_min_overlap: params.pct_min_overlap,
            pct_local_activity: params.pct_local_activity,
            spatial_learning: params.spatial_learning,
            temporal_learning: params.temporal_learning,
            hardcoded_spatial: false,
            connected_perm: params.connected_perm,
            initial_permanence: params.initial_permanence,
            permanence_inc: params.permanence_inc,
            permanence_dec: params.permanence_dec,
            ema_alpha: params.ema_alpha,
            min_synapse_match_threshold: params.min_synapse_match_threshold,
            x_space,
            y_space,
            min_overlap,
            inhibition_radius,
            desired_local_activity,
            columns,
            cell_states: Vec::new(),
            input: vec![0; input_width * input_height],
            learning_pool: Vec::new(),
            rng,
            iters: 0,
        })
    }

    // ========================================================================
    // External interface
    // ========================================================================

    /// Copies `bits` into the region's input buffer.
    ///
    /// # Errors
    ///
    /// Returns [`VelesError::BufferSizeMismatch`] when `bits` does not match
    /// the input topology (`input_width * input_height`, which equals the
    /// column count in hardcoded mode).
    pub fn set_input(&mut self, bits: &[u8]) -> Result<()> {
        if bits.len() != self.input.len() {
            return Err(VelesError::BufferSizeMismatch {
                expected: self.input.len(),
                actual: bits.len(),
            });
        }
        self.input.copy_from_slice(bits);
        Ok(())
    }

    /// Runs one time step: advance all cell and segment state, spatial pool,
    /// temporal pool, bump the iteration counter.
    pub fn run_once(&mut self) {
        self.advance_time_step();
        self.perform_spatial_pooling();
        self.perform_temporal_pooling();
        self.iters += 1;
    }

    /// Enables or disables proximal learning (ignored in hardcoded mode).
    pub fn set_spatial_learning(&mut self, learn: bool) {
        self.spatial_learning = learn && !self.hardcoded_spatial;
    }

    /// Enables or disables distal learning.
    pub fn set_temporal_learning(&mut self, learn: bool) {
        self.temporal_learning = learn;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Column grid width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Column grid height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Input matrix width.
    pub fn input_width(&self) -> usize {
        self.input_width
    }

    /// Input matrix height.
    pub fn input_height(&self) -> usize {
        self.input_height
    }

    /// Locality radius (0 = unrestricted).
    pub fn locality_radius(&self) -> usize {
        self.locality_radius
    }

    /// Fraction of the input area each column connects to.
    pub fn pct_input_per_col(&self) -> Real {
        self.pct_input_per_col
    }

    /// Fraction of proximal synapses required for inhibition entry.
    pub fn pct_min_overlap(&self) -> Real {
        self.pct_min_overlap
    }

    /// Target winner fraction within an inhibition neighborhood.
    pub fn pct_local_activity(&self) -> Real {
        self.pct_local_activity
    }

    /// Spacing between neighboring column centers on the input plane.
    pub fn input_spacing(&self) -> (f64, f64) {
        (self.x_space, self.y_space)
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Cells per column.
    pub fn cells_per_col(&self) -> usize {
        self.cells_per_col
    }

    /// Number of cells in the region.
    pub fn num_cells(&self) -> usize {
        self.cell_states.len()
    }

    /// Completed time steps.
    pub fn iterations(&self) -> u64 {
        self.iters
    }

    /// Current inhibition radius (column-grid units).
    pub fn inhibition_radius(&self) -> Real {
        self.inhibition_radius
    }

    /// Number of winners targeted within an inhibition neighborhood.
    pub fn desired_local_activity(&self) -> usize {
        self.desired_local_activity
    }

    /// Minimum proximal overlap for a column to enter inhibition.
    pub fn min_overlap(&self) -> Real {
        self.min_overlap
    }

    /// The column at flat index `i` (row-major).
    ///
    /// # Panics
    ///
    /// Panics if `i >= num_columns()`.
    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    /// The columns, in row-major grid order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Whether column `i` is active this step.
    ///
    /// # Panics
    ///
    /// Panics if `i >= num_columns()`.
    pub fn column_active(&self, i: usize) -> bool {
        self.columns[i].is_active()
    }

    /// Whether cell `cell` of column `col` is active this step.
    ///
    /// # Panics
    ///
    /// Panics if the indices are out of range.
    pub fn cell_active(&self, col: usize, cell: usize) -> bool {
        self.cell_states[self.cell_index(col, cell)].is_active
    }

    /// Whether cell `cell` of column `col` is predicting this step.
    ///
    /// # Panics
    ///
    /// Panics if the indices are out of range.
    pub fn cell_predicting(&self, col: usize, cell: usize) -> bool {
        self.cell_states[self.cell_index(col, cell)].is_predicting
    }

    /// Whether cell `cell` of column `col` is a learning cell this step.
    ///
    /// # Panics
    ///
    /// Panics if the indices are out of range.
    pub fn cell_learning(&self, col: usize, cell: usize) -> bool {
        self.cell_states[self.cell_index(col, cell)].is_learning
    }

    /// The soonest predicted activation for column `col`, in steps:
    /// 1 means next step, 0 means the column is making no prediction.
    ///
    /// # Panics
    ///
    /// Panics if `col >= num_columns()`.
    pub fn column_prediction_steps(&self, col: usize) -> u8 {
        let base = col * self.cells_per_col;
        self.cell_states[base..base + self.cells_per_col]
            .iter()
            .filter(|s| s.is_predicting)
            .map(|s| s.prediction_steps)
            .min()
            .unwrap_or(0)
    }

    /// Activation and prediction accuracy of the most recent step.
    ///
    /// Activation accuracy is the fraction of active columns that were
    /// predicted for this step (at t-1, via a sequence segment); prediction
    /// accuracy is the fraction of such predicted columns that did become
    /// active. Either fraction is 0 when its denominator is 0.
    pub fn last_accuracy(&self) -> (Real, Real) {
        let mut sum_a = 0usize;
        let mut sum_p = 0usize;
        let mut sum_ap = 0usize;

        for (ci, col) in self.columns.iter().enumerate() {
            if col.is_active() {
                sum_a += 1;
            }
            for i in 0..self.cells_per_col {
                if !self.cell_states[ci * self.cells_per_col + i].was_predicted {
                    continue;
                }
                let sequence_predicted = col
                    .cell(i)
                    .segments()
                    .iter()
                    .any(|seg| seg.was_active() && seg.is_sequence());
                if sequence_predicted {
                    sum_p += 1;
                    if col.is_active() {
                        sum_ap += 1;
                    }
                    break;
                }
            }
        }

        let activation = if sum_a > 0 {
            sum_ap as Real / sum_a as Real
        } else {
            0.0
        };
        let prediction = if sum_p > 0 {
            sum_ap as Real / sum_p as Real
        } else {
            0.0
        };
        (activation, prediction)
    }

    /// Counts distal segments whose prediction steps equal `steps`
    /// (all segments when `steps` is 0).
    pub fn num_segments(&self, steps: u8) -> usize {
        self.columns
            .iter()
            .flat_map(Column::cells)
            .map(|cell| cell.num_segments_with_steps(steps))
            .sum()
    }

    /// Writes the region output: one byte per cell, 1 where the cell is
    /// active or predicting, 0 elsewhere. Cells are ordered by flat cell
    /// index (`column * cells_per_col + cell`).
    ///
    /// # Errors
    ///
    /// Returns [`VelesError::BufferSizeMismatch`] when `out` is not
    /// `num_cells()` long.
    pub fn write_output(&self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.cell_states.len() {
            return Err(VelesError::BufferSizeMismatch {
                expected: self.cell_states.len(),
                actual: out.len(),
            });
        }
        for (byte, state) in out.iter_mut().zip(&self.cell_states) {
            *byte = u8::from(state.is_active || state.is_predicting);
        }
        Ok(())
    }

    /// Snapshot statistics: segment/synapse census, queued updates, and the
    /// accuracies of the most recent step.
    pub fn stats(&self) -> RegionStats {
        let mut total_segments = 0;
        let mut sequence_segments = 0;
        let mut total_synapses = 0;
        let mut pending_updates = 0;

        for col in &self.columns {
            for cell in col.cells() {
                total_segments += cell.num_segments();
                pending_updates += cell.num_pending_updates();
                for seg in cell.segments() {
                    if seg.is_sequence() {
                        sequence_segments += 1;
                    }
                    total_synapses += seg.num_synapses();
                }
            }
        }

        let (activation_accuracy, prediction_accuracy) = self.last_accuracy();
        RegionStats {
            total_segments,
            sequence_segments,
            total_synapses,
            pending_updates,
            activation_accuracy,
            prediction_accuracy,
        }
    }

    #[inline]
    fn cell_index(&self, col: usize, cell: usize) -> usize {
        assert!(col < self.columns.len() && cell < self.cells_per_col);
        col * self.cells_per_col + cell
    }

    // ========================================================================
    // Time step protocol
    // ========================================================================

    /// Pushes every cell's and segment's current state back to its
    /// previous-step state, and rebuilds the pool of cells that were in the
    /// learning state (the candidates for new distal synapses this step).
    fn advance_time_step(&mut self) {
        for state in &mut self.cell_states {
            state.advance_time_step();
        }
        for col in &mut self.columns {
            col.advance_time_step();
        }

        self.learning_pool.clear();
        for (i, state) in self.cell_states.iter().enumerate() {
            if state.was_learning {
                self.learning_pool.push(i as CellIdx);
            }
        }
    }

    // ========================================================================
    // Spatial pooling
    // ========================================================================

    fn perform_spatial_pooling(&mut self) {
        // Hardcoded: input bits are the active columns.
        if self.hardcoded_spatial {
            for (col, &bit) in self.columns.iter_mut().zip(&self.input) {
                col.set_active(bit == 1);
            }
            return;
        }

        // Phase 1: per-column input overlap.
        let connected = self.connected_perm;
        let min_overlap = self.min_overlap;
        let view = SourceView { states: &self.cell_states, input: &self.input };
        for col in &mut self.columns {
            col.compute_overlap(&view, connected, min_overlap);
        }

        // Phase 2: winners after local inhibition. Reads neighbor overlaps,
        // so the decisions are settled before any active flag changes.
        let decisions: Vec<bool> = (0..self.columns.len())
            .map(|i| {
                let col = &self.columns[i];
                col.overlap() > 0 && col.overlap() >= self.kth_score(col.cx(), col.cy())
            })
            .collect();
        for (col, active) in self.columns.iter_mut().zip(decisions) {
            col.set_active(active);
        }

        // Phase 3: learning and boosting.
        if self.spatial_learning {
            let inc = self.permanence_inc;
            let dec = self.permanence_dec;
            let view = SourceView { states: &self.cell_states, input: &self.input };
            for col in &mut self.columns {
                if col.is_active() {
                    col.update_permanences(&view, inc, dec);
                }
            }

            // Boosting reads neighborhood duty cycles; compute every
            // column's floor first, then apply.
            let min_duties: Vec<Real> = (0..self.columns.len())
                .map(|i| {
                    let col = &self.columns[i];
                    0.01 * self.max_neighbor_duty_cycle(col.cx(), col.cy())
                })
                .collect();
            let alpha = self.ema_alpha;
            let min_overlap = self.min_overlap;
            for (col, min_duty) in self.columns.iter_mut().zip(min_duties) {
                col.perform_boosting(min_duty, alpha, inc, min_overlap);
            }

            self.inhibition_radius = average_receptive_field_radius(
                &self.columns,
                self.connected_perm,
                self.input_width,
                self.x_space,
            );
        }
    }

    /// The neighborhood rectangle of a column under the current inhibition
    /// radius.
    fn neighborhood(&self, cx: UInt, cy: UInt) -> GridRect {
        GridRect::around(
            cx as usize,
            cy as usize,
            self.inhibition_radius.round() as usize,
            self.width,
            self.height,
        )
    }

    /// The k'th highest overlap among a column's neighbors, with
    /// `k = desired_local_activity`. Returns 0 for an empty neighborhood.
    fn kth_score(&self, cx: UInt, cy: UInt) -> UInt {
        let rect = self.neighborhood(cx, cy);
        let mut overlaps: Vec<UInt> = rect
            .iter_indices(self.width)
            .map(|i| self.columns[i].overlap())
            .collect();
        if overlaps.is_empty() {
            return 0;
        }
        overlaps.sort_unstable();
        overlaps[overlaps.len().saturating_sub(self.desired_local_activity)]
    }

    /// Largest active duty cycle among a column's neighbors.
    fn max_neighbor_duty_cycle(&self, cx: UInt, cy: UInt) -> Real {
        let rect = self.neighborhood(cx, cy);
        rect.iter_indices(self.width)
            .map(|i| self.columns[i].active_duty_cycle())
            .fold(0.0, Real::max)
    }

    // ========================================================================
    // Temporal pooling
    // ========================================================================

    fn perform_temporal_pooling(&mut self) {
        self.temporal_phase1();
        self.temporal_phase2();
        if self.temporal_learning {
            self.temporal_phase3();
        }
    }

    /// Phase 1 (active columns): cells correctly predicted by a sequence
    /// segment become active (and learning, when that segment matched
    /// learning sources); an unpredicted column bursts all its cells; and
    /// when no learning cell emerged, the best matching cell is drafted and
    /// a sequence update queued for it.
    fn temporal_phase1(&mut self) {
        let learning = self.temporal_learning;
        let cells_per_col = self.cells_per_col;
        let min_match = self.min_synapse_match_threshold;
        let new_synapse_count = self.new_synapse_count;
        let view = SourceView { states: &self.cell_states, input: &self.input };
        let rng = &mut self.rng;
        let pool = &self.learning_pool;

        let mut activate: Vec<CellIdx> = Vec::new();
        let mut mark_learning: Vec<CellIdx> = Vec::new();

        for (ci, col) in self.columns.iter_mut().enumerate() {
            if !col.is_active() {
                continue;
            }
            let base = (ci * cells_per_col) as CellIdx;
            let mut bu_predicted = false;
            let mut learning_cell_chosen = false;

            for i in 0..cells_per_col {
                let id = base + i as CellIdx;
                if !view.states[id as usize].was_predicted {
                    continue;
                }
                let cell = col.cell(i);
                if let Some(seg_idx) = cell.previous_active_segment() {
                    let seg = &cell.segments()[seg_idx as usize];
                    if seg.is_sequence() {
                        bu_predicted = true;
                        activate.push(id);
                        if learning && seg.was_active_from_learning(&view) {
                            learning_cell_chosen = true;
                            mark_learning.push(id);
                        }
                    }
                }
            }

            if !bu_predicted {
                for i in 0..cells_per_col {
                    activate.push(base + i as CellIdx);
                }
            }

            if learning && !learning_cell_chosen {
                let (best_cell, best_seg) = col.best_matching_cell(1, true, min_match);
                // A learning cell is always an active cell, even when the
                // column was predicted through other cells.
                activate.push(base + best_cell as CellIdx);
                mark_learning.push(base + best_cell as CellIdx);

                let mut update = {
                    let cell = col.cell(best_cell);
                    let target = best_seg.map(|s| (s, &cell.segments()[s as usize]));
                    SegmentUpdate::capture(
                        target,
                        true,
                        true,
                        ci as ColumnIdx,
                        cells_per_col,
                        pool,
                        new_synapse_count,
                        &view,
                        rng,
                    )
                };
                update.set_num_prediction_steps(1);
                col.cell_mut(best_cell).queue_update(update);
            }
        }

        for id in activate {
            self.cell_states[id as usize].is_active = true;
        }
        for id in mark_learning {
            self.cell_states[id as usize].is_learning = true;
        }
    }

    /// Phase 2 (all cells): process every segment against the fresh activity,
    /// move cells with an active segment into the predicting state, and queue
    /// reinforcement for the active segment plus a (possibly new) segment
    /// that could have predicted this activation one step further out.
    fn temporal_phase2(&mut self) {
        let learning = self.temporal_learning;
        let cells_per_col = self.cells_per_col;
        let connected = self.connected_perm;
        let min_match = self.min_synapse_match_threshold;
        let new_synapse_count = self.new_synapse_count;
        let view = SourceView { states: &self.cell_states, input: &self.input };
        let rng = &mut self.rng;
        let pool = &self.learning_pool;

        let mut predictions: Vec<(CellIdx, u8)> = Vec::new();

        for (ci, col) in self.columns.iter_mut().enumerate() {
            for i in 0..cells_per_col {
                let id = (ci * cells_per_col + i) as CellIdx;

                {
                    let cell = col.cell_mut(i);
                    for seg in cell.segments_mut() {
                        seg.process(&view, connected);
                    }
                }

                let cell = col.cell(i);
                let Some(active_idx) = cell.first_active_segment() else {
                    continue;
                };
                let steps = cell.min_active_prediction_steps();
                predictions.push((id, steps));

                if learning {
                    let active_update = SegmentUpdate::capture(
                        Some((active_idx, &cell.segments()[active_idx as usize])),
                        false,
                        false,
                        ci as ColumnIdx,
                        cells_per_col,
                        pool,
                        new_synapse_count,
                        &view,
                        rng,
                    );

                    let pred_steps = steps.saturating_add(1);
                    let pred_target = cell.best_matching_segment(pred_steps, true, min_match);
                    let mut pred_update = SegmentUpdate::capture(
                        pred_target.map(|s| (s, &cell.segments()[s as usize])),
                        true,
                        true,
                        ci as ColumnIdx,
                        cells_per_col,
                        pool,
                        new_synapse_count,
                        &view,
                        rng,
                    );
                    if pred_target.is_none() {
                        pred_update.set_num_prediction_steps(pred_steps);
                    }

                    let cell = col.cell_mut(i);
                    cell.queue_update(active_update);
                    cell.queue_update(pred_update);
                }
            }
        }

        for (id, steps) in predictions {
            let state = &mut self.cell_states[id as usize];
            state.is_predicting = true;
            state.prediction_steps = steps;
        }
    }

    /// Phase 3 (all cells): commit queued updates positively on learning
    /// cells, negatively on cells that just stopped predicting; everything
    /// else keeps its queue for a later drain.
    fn temporal_phase3(&mut self) {
        let cells_per_col = self.cells_per_col;
        let threshold = self.seg_active_threshold;
        let initial = self.initial_permanence;
        let inc = self.permanence_inc;
        let dec = self.permanence_dec;

        for (ci, col) in self.columns.iter_mut().enumerate() {
            for i in 0..cells_per_col {
                let state = &self.cell_states[ci * cells_per_col + i];
                if state.is_learning {
                    col.cell_mut(i).apply_pending_updates(true, threshold, initial, inc, dec);
                } else if !state.is_predicting && state.was_predicted {
                    col.cell_mut(i).apply_pending_updates(false, threshold, initial, inc, dec);
                }
            }
        }
    }
}

fn validate(params: &RegionParams) -> Result<()> {
    if params.input_width == 0 || params.input_height == 0 {
        return Err(VelesError::InvalidParameter {
            name: "input_width/input_height",
            message: "input topology must be non-empty".to_string(),
        });
    }
    if params.cells_per_col < 1 {
        return Err(VelesError::InvalidParameter {
            name: "cells_per_col",
            message: "must be >= 1".to_string(),
        });
    }
    if params.seg_active_threshold < 1 {
        return Err(VelesError::InvalidParameter {
            name: "seg_active_threshold",
            message: "must be >= 1".to_string(),
        });
    }
    if !params.hardcoded_spatial {
        if params.col_grid_width == 0 || params.col_grid_height == 0 {
            return Err(VelesError::InvalidParameter {
                name: "col_grid_width/col_grid_height",
                message: "column grid must be non-empty".to_string(),
            });
        }
        if params.pct_input_per_col <= 0.0 || params.pct_input_per_col > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "pct_input_per_col",
                message: "must be in (0, 1]".to_string(),
            });
        }
    }
    Ok(())
}

/// Average radius of the connected proximal receptive fields, in column-grid
/// units. Connectivity is judged live from the permanences, so this works
/// both at construction time and after learning. Returns 0 with no connected
/// synapses.
fn average_receptive_field_radius(
    columns: &[Column],
    connected_perm: Permanence,
    input_width: usize,
    x_space: f64,
) -> Real {
    let spacing = if x_space > 0.0 { x_space } else { 1.0 };
    let mut n = 0usize;
    let mut sum = 0.0f64;

    for col in columns {
        for syn in col.proximal().connected_synapses(connected_perm) {
            if let SynapseSource::Input(idx) = syn.source() {
                let (sx, sy) = index_to_coordinates(idx as usize, input_width);
                let dx = col.ix() as f64 - sx as f64;
                let dy = col.iy() as f64 - sy as f64;
                sum += (dx * dx + dy * dy).sqrt() / spacing;
                n += 1;
            }
        }
    }

    if n == 0 {
        0.0
    } else {
        (sum / n as f64) as Real
    }
}
