//! Per-viewport and per-instance selection inputs.

use glam::Vec3;

use crate::octree::{Aabb, Frustum};

/// One viewport's worth of camera data for a frame.
#[derive(Clone, Copy, Debug)]
pub struct ViewData {
  /// Camera position in world space.
  pub origin: Vec3,
  /// Unit view direction.
  pub direction: Vec3,
  pub frustum: Frustum,
  /// Projection-dependent multiplier turning `radius^2 / dist^2` into a
  /// screen-size metric comparable across viewports.
  pub screen_size_factor: f32,
  /// Orthographic views are exempt from the minimum screen size floor;
  /// distance does not shrink their nodes.
  pub ortho: bool,
}

/// Per-instance LOD tuning.
#[derive(Clone, Debug)]
pub struct InstanceConfig {
  /// Depths below this always qualify, keeping a coarse silhouette even
  /// for distant clouds.
  pub min_depth: u8,
  /// Depths above this are never selected. `u8::MAX` means unlimited.
  pub max_depth: u8,
  /// Multiplier on node bounds during culling, trading accuracy for
  /// pop-in resistance.
  pub bounds_scale: f32,
  /// Nodes projecting smaller than this are skipped along with their
  /// subtree.
  pub min_screen_size: f32,
  /// Discounts densely branching regions in virtual depth computation.
  pub point_size_bias: f32,
  /// Compute per-node virtual depth for adaptive point sizing.
  pub adaptive_point_size: bool,
  /// Score against a single viewport by index instead of all of them.
  /// Out-of-range indices leave the instance unselected.
  pub viewport: Option<usize>,
  /// Blend screen-size scores toward nodes near the view center, in
  /// [0, 1]. Zero scores by projected size alone.
  pub screen_center_importance: f32,
  pub clipping: Vec<ClippingVolume>,
}

impl Default for InstanceConfig {
  fn default() -> Self {
    Self {
      min_depth: 0,
      max_depth: u8::MAX,
      bounds_scale: 1.0,
      min_screen_size: 0.0001,
      point_size_bias: 0.035,
      adaptive_point_size: true,
      viewport: None,
      screen_center_importance: 0.0,
      clipping: Vec::new(),
    }
  }
}

/// Which side of a clipping volume is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipMode {
  /// Everything outside the volume is clipped.
  ClipOutside,
  /// Everything inside the volume is clipped.
  ClipInside,
}

/// World-space clipping volume applied during node selection.
#[derive(Clone, Debug)]
pub struct ClippingVolume {
  pub bounds: Aabb,
  pub mode: ClipMode,
  /// Higher priority volumes override lower ones.
  pub priority: i32,
}

/// Sort volumes into application order: ascending priority, and at equal
/// priority outside-clips apply before inside-clips so inside-clips win
/// the tie.
pub(crate) fn sorted_for_application(volumes: &[ClippingVolume]) -> Vec<&ClippingVolume> {
  let mut sorted: Vec<&ClippingVolume> = volumes.iter().collect();
  sorted.sort_by_key(|volume| {
    (
      volume.priority,
      match volume.mode {
        ClipMode::ClipOutside => 0,
        ClipMode::ClipInside => 1,
      },
    )
  });
  sorted
}

/// Conservative node-level clipping test.
///
/// Volumes are applied in order, later ones overriding earlier ones. A
/// node is only culled when its bounds are decisively on the clipped
/// side; a straddling node survives and leaves fine clipping to deeper
/// nodes.
pub(crate) fn node_is_clipped(
  volumes: &[&ClippingVolume],
  center: Vec3,
  half_extent: Vec3,
) -> bool {
  let node = Aabb::from_center_extent(center, half_extent);
  let mut clipped = false;
  for volume in volumes {
    match volume.mode {
      ClipMode::ClipOutside => {
        if !volume.bounds.overlaps(&node) {
          clipped = true;
        } else {
          clipped = false;
        }
      }
      ClipMode::ClipInside => {
        if volume.bounds.contains_aabb(&node) {
          clipped = true;
        }
      }
    }
  }
  clipped
}

#[cfg(test)]
#[path = "view_test.rs"]
mod view_test;
