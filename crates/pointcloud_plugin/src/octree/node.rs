//! OctreeNode - one octant of the spatial index.
//!
//! Nodes live in a slab arena owned by the [`Octree`](super::Octree) and
//! reference each other by [`NodeId`] index, never by pointer. A node owns
//! its point buffer only while the buffer is resident; the authoritative
//! point count survives eviction so LOD selection can score non-resident
//! nodes.

use glam::Vec3;

use super::bounds::{Aabb, Sphere};
use super::level::LevelData;
use crate::point::PointCloudPoint;

/// Index of a node inside the tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
  /// Raw arena index, usable as a bulk-store key.
  pub fn index(&self) -> usize {
    self.0
  }
}

/// One octant of the index.
///
/// Holds at most one point per occupied virtual-grid cell plus any padding
/// that did not warrant a split.
#[derive(Debug)]
pub struct OctreeNode {
  /// Depth in the tree, 0 = root.
  pub depth: u8,
  /// Which octant of the parent this node covers (0-7, by sign of each
  /// axis relative to the parent center).
  pub location_in_parent: u8,
  /// Center in cloud-local space.
  pub center: Vec3,
  /// Sparse child slots, indexed by octant.
  pub children: [Option<NodeId>; 8],

  /// Resident point buffer; None while evicted.
  points: Option<Vec<PointCloudPoint>>,
  /// Authoritative point count, valid even while non-resident.
  num_points: u32,
  /// Count of visible points; trustworthy only while not visibility-dirty.
  num_visible: u32,
  /// Visibility flags changed since the last visible-first sort.
  visibility_dirty: bool,

  /// Buffer modified since it was last saved to the bulk store.
  pub(crate) buffer_dirty: bool,
  /// An async load has been requested but has not completed.
  pub(crate) pending: bool,
  /// Never evicted by the streaming backend, only by a full unload.
  pub(crate) persistent: bool,
  /// Expiry timestamp (seconds); the node may be evicted after this.
  pub(crate) lifetime: f64,
}

impl OctreeNode {
  /// Create an empty node.
  pub fn new(depth: u8, location_in_parent: u8, center: Vec3) -> Self {
    Self {
      depth,
      location_in_parent,
      center,
      children: [None; 8],
      points: Some(Vec::new()),
      num_points: 0,
      num_visible: 0,
      visibility_dirty: false,
      buffer_dirty: false,
      pending: false,
      persistent: false,
      lifetime: 0.0,
    }
  }

  /// Child id covering the given octant, if created.
  #[inline]
  pub fn child_at(&self, octant: u8) -> Option<NodeId> {
    self.children[octant as usize]
  }

  /// Center of the child octant, given this node's level data.
  pub fn child_center(&self, octant: u8, level: &LevelData) -> Vec3 {
    let offset = Vec3::new(
      if octant & 4 != 0 { 0.5 } else { -0.5 },
      if octant & 2 != 0 { 0.5 } else { -0.5 },
      if octant & 1 != 0 { 0.5 } else { -0.5 },
    );
    self.center + offset * level.extent
  }

  /// Octant a local position falls into, by sign relative to the center.
  #[inline]
  pub fn octant_for(&self, position: Vec3) -> u8 {
    let rel = position - self.center;
    (if rel.x > 0.0 { 4 } else { 0 })
      + (if rel.y > 0.0 { 2 } else { 0 })
      + (if rel.z > 0.0 { 1 } else { 0 })
  }

  /// Bounding box of this node.
  pub fn bounds(&self, level: &LevelData) -> Aabb {
    Aabb::from_center_extent(self.center, Vec3::splat(level.extent))
  }

  /// Bounding sphere of this node.
  pub fn sphere_bounds(&self, level: &LevelData) -> Sphere {
    Sphere::new(self.center, level.radius)
  }

  /// True while the point buffer is resident.
  #[inline]
  pub fn has_data(&self) -> bool {
    self.points.is_some()
  }

  /// Authoritative point count (survives eviction).
  #[inline]
  pub fn num_points(&self) -> u32 {
    self.num_points
  }

  /// Visible point count as of the last visibility sort. A non-resident
  /// node reports zero - it cannot contribute points until reloaded.
  #[inline]
  pub fn num_visible_points(&self) -> u32 {
    if self.points.is_some() {
      self.num_visible
    } else {
      0
    }
  }

  /// Last-known visible count, kept across eviction. May lag behind
  /// visibility edits that have not been re-sorted yet.
  #[inline]
  pub(crate) fn num_visible_raw(&self) -> u32 {
    self.num_visible
  }

  /// Resident points, if any.
  #[inline]
  pub fn points(&self) -> Option<&[PointCloudPoint]> {
    self.points.as_deref()
  }

  /// Mutable resident points; marks the buffer dirty for write-back.
  #[inline]
  pub fn points_mut(&mut self) -> Option<&mut Vec<PointCloudPoint>> {
    if self.points.is_some() {
      self.buffer_dirty = true;
    }
    self.points.as_mut()
  }

  /// Whether the visible-first order is stale.
  #[inline]
  pub fn is_visibility_dirty(&self) -> bool {
    self.visibility_dirty
  }

  /// Mark the visible-first order stale after external visibility edits.
  pub fn mark_visibility_dirty(&mut self) {
    self.visibility_dirty = true;
  }

  /// Restore the visible-first point order and recount visible points.
  ///
  /// Queries with `visible_only` rely on visible points being a prefix of
  /// the buffer so they can stop at `num_visible`.
  pub fn sort_visible_points(&mut self) {
    if let Some(points) = self.points.as_mut() {
      points.sort_by_key(|point| !point.is_visible());
      self.num_visible = points.iter().take_while(|point| point.is_visible()).count() as u32;
      self.buffer_dirty = true;
    }
    self.visibility_dirty = false;
  }

  /// Replace the resident buffer (insertion and streaming completion).
  pub(crate) fn set_points(&mut self, points: Vec<PointCloudPoint>) {
    self.num_points = points.len() as u32;
    self.num_visible = points.iter().filter(|point| point.is_visible()).count() as u32;
    self.points = Some(points);
    self.visibility_dirty = true;
    self.buffer_dirty = true;
    self.pending = false;
  }

  /// Take the resident buffer, leaving the node non-resident but keeping
  /// the authoritative count.
  pub(crate) fn take_points(&mut self) -> Option<Vec<PointCloudPoint>> {
    self.points.take()
  }

  /// Drop the resident buffer without touching counts.
  pub(crate) fn release_points(&mut self) {
    self.points = None;
    self.pending = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn octant_encoding_matches_child_centers() {
    let level = LevelData::new(10.0, 96);
    let node = OctreeNode::new(0, 0, Vec3::ZERO);

    for octant in 0..8u8 {
      let center = node.child_center(octant, &level);
      assert_eq!(node.octant_for(center), octant);
    }
  }

  #[test]
  fn visible_sort_places_visible_first() {
    let mut node = OctreeNode::new(0, 0, Vec3::ZERO);
    let mut points = Vec::new();
    for i in 0..10 {
      let mut point = PointCloudPoint::new(Vec3::splat(i as f32), [0; 4]);
      point.set_visible(i % 2 == 0);
      points.push(point);
    }
    node.set_points(points);
    node.sort_visible_points();

    assert_eq!(node.num_visible_points(), 5);
    let points = node.points().unwrap();
    assert!(points[..5].iter().all(|p| p.is_visible()));
    assert!(points[5..].iter().all(|p| !p.is_visible()));
  }

  #[test]
  fn non_resident_node_reports_zero_visible() {
    let mut node = OctreeNode::new(0, 0, Vec3::ZERO);
    node.set_points(vec![PointCloudPoint::new(Vec3::ZERO, [0; 4])]);
    node.sort_visible_points();
    assert_eq!(node.num_visible_points(), 1);

    node.release_points();
    assert_eq!(node.num_points(), 1);
    assert_eq!(node.num_visible_points(), 0);
  }
}
