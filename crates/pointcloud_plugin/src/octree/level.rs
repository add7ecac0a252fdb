//! Per-depth shared geometry, computed once when the tree is initialized.
//!
//! Every node at the same depth shares the same half-extent, bounding-sphere
//! radius and virtual-grid scale factors, so they are stored once per depth
//! instead of per node. Depth d+1 has exactly half the extent of depth d.

/// Shared geometry for one depth of the tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct LevelData {
  /// Uniform half-extent of every node at this depth.
  pub extent: f32,
  /// Bounding-sphere radius of a node (sqrt(3) * extent).
  pub radius: f32,
  /// Squared bounding-sphere radius.
  pub radius_sq: f32,
  /// Edge length of one virtual-grid cell.
  pub grid_cell_size: f32,
  /// Multiplier mapping an extent-offset local position into grid space.
  pub normalization: f32,
}

impl LevelData {
  /// Compute the shared data for a node half-extent and grid resolution.
  pub fn new(extent: f32, grid_resolution: usize) -> Self {
    let radius = extent * 3.0_f32.sqrt();
    let size = extent * 2.0;
    Self {
      extent,
      radius,
      radius_sq: radius * radius,
      grid_cell_size: size / grid_resolution as f32,
      normalization: grid_resolution as f32 / size,
    }
  }
}
