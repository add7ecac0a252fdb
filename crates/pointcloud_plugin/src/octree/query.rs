//! Lazy spatial queries over resident points.
//!
//! Queries walk the tree breadth-first, pruning nodes whose bounding
//! volume misses the shape, and yield references without copying. Only
//! resident buffers are visited; callers that need evicted data load it
//! first through the streaming interface.

use std::collections::VecDeque;

use glam::{Affine3A, Vec3};

use super::bounds::{Aabb, Containment, Frustum, Ray, Sphere};
use super::node::NodeId;
use super::Octree;
use crate::point::PointCloudPoint;

/// A volume that can prune nodes and test individual points.
pub trait QueryShape {
  /// Conservative test against a node's bounds. False positives are
  /// harmless, false negatives lose points.
  fn test_node(&self, center: Vec3, half_extent: f32, radius: f32) -> bool;
  /// Exact test for one point.
  fn test_point(&self, position: Vec3) -> bool;
}

impl QueryShape for Sphere {
  fn test_node(&self, center: Vec3, half_extent: f32, _radius: f32) -> bool {
    self.overlaps_aabb(&Aabb::from_center_extent(center, Vec3::splat(half_extent)))
  }

  fn test_point(&self, position: Vec3) -> bool {
    self.contains_point(position)
  }
}

impl QueryShape for Aabb {
  fn test_node(&self, center: Vec3, half_extent: f32, _radius: f32) -> bool {
    self.overlaps(&Aabb::from_center_extent(center, Vec3::splat(half_extent)))
  }

  fn test_point(&self, position: Vec3) -> bool {
    self.contains_point(position)
  }
}

impl QueryShape for Frustum {
  fn test_node(&self, center: Vec3, _half_extent: f32, radius: f32) -> bool {
    self.classify_sphere(center, radius) != Containment::Outside
  }

  fn test_point(&self, position: Vec3) -> bool {
    self.contains_point(position)
  }
}

/// A ray thickened to a cylinder of the given radius.
#[derive(Clone, Copy, Debug)]
pub struct RadiusRay {
  pub ray: Ray,
  pub radius: f32,
}

impl RadiusRay {
  pub fn new(ray: Ray, radius: f32) -> Self {
    Self { ray, radius }
  }
}

impl QueryShape for RadiusRay {
  fn test_node(&self, center: Vec3, _half_extent: f32, radius: f32) -> bool {
    let reach = radius + self.radius;
    self.ray.distance_squared_to_point(center) <= reach * reach
  }

  fn test_point(&self, position: Vec3) -> bool {
    self.ray.distance_squared_to_point(position) <= self.radius * self.radius
  }
}

/// Iterator over points matching a [`QueryShape`].
pub struct QueryIter<'a, S: QueryShape> {
  octree: &'a Octree,
  shape: S,
  visible_only: bool,
  queue: VecDeque<NodeId>,
  current: Option<(&'a [PointCloudPoint], usize)>,
}

impl<'a, S: QueryShape> QueryIter<'a, S> {
  fn new(octree: &'a Octree, shape: S, visible_only: bool) -> Self {
    let mut queue = VecDeque::new();
    queue.push_back(octree.root_id());
    Self {
      octree,
      shape,
      visible_only,
      queue,
      current: None,
    }
  }

  fn advance_node(&mut self) -> bool {
    while let Some(id) = self.queue.pop_front() {
      let node = self.octree.node(id);
      let level = self.octree.level(node.depth);
      if !self.shape.test_node(node.center, level.extent, level.radius) {
        continue;
      }
      for child in node.children.iter().flatten() {
        self.queue.push_back(*child);
      }
      if let Some(points) = node.points() {
        // With a clean visible-first order the visible points are a
        // prefix, so the per-point flag test can be skipped.
        let slice = if self.visible_only && !node.is_visibility_dirty() {
          &points[..node.num_visible_points() as usize]
        } else {
          points
        };
        if !slice.is_empty() {
          self.current = Some((slice, 0));
          return true;
        }
      }
    }
    false
  }
}

impl<'a, S: QueryShape> Iterator for QueryIter<'a, S> {
  type Item = &'a PointCloudPoint;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if let Some((slice, index)) = &mut self.current {
        let slice: &'a [PointCloudPoint] = slice;
        while *index < slice.len() {
          let point = &slice[*index];
          *index += 1;
          if self.visible_only && !point.is_visible() {
            continue;
          }
          if self.shape.test_point(point.position) {
            return Some(point);
          }
        }
        self.current = None;
      }
      if !self.advance_node() {
        return None;
      }
    }
  }
}

impl Octree {
  /// Iterate points inside a sphere.
  pub fn points_in_sphere(&self, sphere: Sphere, visible_only: bool) -> QueryIter<'_, Sphere> {
    QueryIter::new(self, sphere, visible_only)
  }

  /// Iterate points inside a box.
  pub fn points_in_box(&self, aabb: Aabb, visible_only: bool) -> QueryIter<'_, Aabb> {
    QueryIter::new(self, aabb, visible_only)
  }

  /// Iterate points inside a frustum.
  pub fn points_in_frustum(&self, frustum: Frustum, visible_only: bool) -> QueryIter<'_, Frustum> {
    QueryIter::new(self, frustum, visible_only)
  }

  /// Iterate points within `radius` of a ray.
  pub fn raycast(&self, ray: Ray, radius: f32, visible_only: bool) -> QueryIter<'_, RadiusRay> {
    QueryIter::new(self, RadiusRay::new(ray, radius), visible_only)
  }

  /// Closest hit (by distance along the ray origin) within `radius`.
  pub fn raycast_single(
    &self,
    ray: Ray,
    radius: f32,
    visible_only: bool,
  ) -> Option<PointCloudPoint> {
    self
      .raycast(ray, radius, visible_only)
      .min_by(|a, b| {
        let da = ray.origin.distance_squared(a.position);
        let db = ray.origin.distance_squared(b.position);
        da.total_cmp(&db)
      })
      .copied()
  }

  /// Copy matching points, optionally transforming them into world space.
  pub fn copy_points<S: QueryShape>(
    &self,
    shape: S,
    visible_only: bool,
    transform: Option<&Affine3A>,
  ) -> Vec<PointCloudPoint> {
    let iter = QueryIter::new(self, shape, visible_only);
    match transform {
      Some(transform) => iter.map(|point| point.transformed(transform)).collect(),
      None => iter.copied().collect(),
    }
  }

  /// True if any point matches the shape.
  pub fn has_points_in<S: QueryShape>(&self, shape: S, visible_only: bool) -> bool {
    QueryIter::new(self, shape, visible_only).next().is_some()
  }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
