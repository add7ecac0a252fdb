//! Bulk visibility and color edits.
//!
//! Edits walk the tree once, pruning nodes outside the target volume and
//! skipping nodes whose visibility state already matches. Nodes fully
//! inside the volume take a fast path that flips every point without
//! per-point containment tests. Any node whose flags changed is re-sorted
//! visible-first so prefix-based consumers stay correct.

use glam::Vec3;

use super::bounds::{Aabb, Sphere};
use super::query::QueryShape;
use super::Octree;

impl Octree {
  /// Show or hide every point inside a sphere.
  pub fn set_visibility_in_sphere(&mut self, sphere: &Sphere, visible: bool) {
    let sphere = *sphere;
    self.set_visibility_where(sphere, |center, radius| {
      sphere.contains_sphere(&Sphere::new(center, radius))
    }, visible);
  }

  /// Show or hide every point inside a box.
  pub fn set_visibility_in_box(&mut self, aabb: &Aabb, visible: bool) {
    let aabb = *aabb;
    self.set_visibility_where(aabb, |center, radius| {
      aabb.contains_aabb(&Aabb::from_center_extent(center, Vec3::splat(radius)))
    }, visible);
  }

  /// Hide every point in the cloud.
  pub fn hide_all(&mut self) {
    self.set_visibility_all(false);
  }

  /// Show every point in the cloud.
  pub fn unhide_all(&mut self) {
    self.set_visibility_all(true);
  }

  fn set_visibility_all(&mut self, visible: bool) {
    for id in self.node_ids() {
      let node = self.node(id);
      if node.has_data() && !node.is_visibility_dirty() {
        let uniform = if visible {
          node.num_visible_points() == node.num_points()
        } else {
          node.num_visible_points() == 0
        };
        if uniform {
          continue;
        }
      }
      let node = self.node_mut(id);
      let mut changed = false;
      if let Some(points) = node.points_mut() {
        for point in points {
          if point.is_visible() != visible {
            point.set_visible(visible);
            changed = true;
          }
        }
      }
      if changed || node.is_visibility_dirty() {
        node.sort_visible_points();
      }
    }
  }

  fn set_visibility_where<S: QueryShape>(
    &mut self,
    shape: S,
    fully_contains: impl Fn(Vec3, f32) -> bool,
    visible: bool,
  ) {
    for id in self.node_ids() {
      let node = self.node(id);
      let level = *self.level(node.depth);
      let center = node.center;
      if !shape.test_node(center, level.extent, level.radius) {
        continue;
      }
      if node.has_data() && !node.is_visibility_dirty() {
        let uniform = if visible {
          node.num_visible_points() == node.num_points()
        } else {
          node.num_visible_points() == 0
        };
        if uniform {
          continue;
        }
      }

      let full = fully_contains(center, level.radius);
      let node = self.node_mut(id);
      let mut changed = false;
      if let Some(points) = node.points_mut() {
        for point in points {
          if (full || shape.test_point(point.position)) && point.is_visible() != visible {
            point.set_visible(visible);
            changed = true;
          }
        }
      }
      if changed {
        node.sort_visible_points();
      }
    }
  }

  /// Recolor every point inside a sphere.
  pub fn apply_color_in_sphere(&mut self, color: [u8; 4], sphere: &Sphere, visible_only: bool) {
    self.apply_color_where(*sphere, color, visible_only);
  }

  /// Recolor every point inside a box.
  pub fn apply_color_in_box(&mut self, color: [u8; 4], aabb: &Aabb, visible_only: bool) {
    self.apply_color_where(*aabb, color, visible_only);
  }

  fn apply_color_where<S: QueryShape>(&mut self, shape: S, color: [u8; 4], visible_only: bool) {
    for id in self.node_ids() {
      let node = self.node(id);
      let level = *self.level(node.depth);
      if !shape.test_node(node.center, level.extent, level.radius) {
        continue;
      }
      if let Some(points) = self.node_mut(id).points_mut() {
        for point in points {
          if visible_only && !point.is_visible() {
            continue;
          }
          if shape.test_point(point.position) {
            point.color = color;
          }
        }
      }
    }
  }

  /// Restore visible-first order on every node that needs it.
  pub fn sort_all_visible_points(&mut self) {
    for id in self.node_ids() {
      if self.node(id).is_visibility_dirty() {
        self.node_mut(id).sort_visible_points();
      }
    }
  }
}

#[cfg(test)]
#[path = "visibility_test.rs"]
mod visibility_test;
