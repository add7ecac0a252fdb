//! Grid-based insertion, deduplication and point removal.
//!
//! Each node samples an R^3 virtual grid over its bounds and keeps at most
//! one point per occupied cell, preferring the point closest to the cell
//! center. Points that lose their cell flow into per-octant overflow
//! buckets; a bucket larger than `max_bucket_size` becomes a child node,
//! smaller buckets are absorbed as padding. Insertion is two-phase: the
//! incoming batch is first deduplicated against itself, then merged with
//! the resident buffer, so batch-internal duplicates obey the same policy
//! as batch-vs-resident ones.

use std::collections::HashMap;

use glam::Vec3;

use super::bounds::{Aabb, Sphere};
use super::level::LevelData;
use super::node::{NodeId, OctreeNode};
use super::Octree;
use crate::error::{PointCloudError, Result};
use crate::point::{DuplicateHandling, PointCloudPoint};

/// Placement of one point on a node's virtual grid.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GridCell {
  /// Flattened cell index (x * R^2 + y * R + z).
  pub index: u32,
  /// Squared distance from the point to the cell center.
  pub dist_sq: f32,
  /// Octant the point falls into, for overflow routing.
  pub octant: u8,
}

/// Compute the grid placement of a local-space position within a node.
pub(crate) fn grid_cell_data(
  position: Vec3,
  node_center: Vec3,
  level: &LevelData,
  grid_resolution: usize,
) -> GridCell {
  let r = grid_resolution as f32;
  let local = (position - node_center + Vec3::splat(level.extent)) * level.normalization;
  let grid = local.clamp(Vec3::ZERO, Vec3::splat(r - 1.0)).floor();

  let cell_center = node_center - Vec3::splat(level.extent)
    + (grid + Vec3::splat(0.5)) * level.grid_cell_size;

  let res = grid_resolution as u32;
  let index = grid.x as u32 * res * res + grid.y as u32 * res + grid.z as u32;

  let rel = position - node_center;
  let octant = (if rel.x > 0.0 { 4 } else { 0 })
    + (if rel.y > 0.0 { 2 } else { 0 })
    + (if rel.z > 0.0 { 1 } else { 0 });

  GridCell {
    index,
    dist_sq: position.distance_squared(cell_center),
    octant,
  }
}

/// Outcome of pitting an incoming point against a cell occupant.
enum CellContest {
  /// Incoming point takes the cell; the occupant is displaced.
  IncomingWins,
  /// Occupant keeps the cell; the incoming point is displaced.
  OccupantWins,
  /// Incoming point is a duplicate dropped by policy.
  IncomingDropped,
  /// Incoming point replaces a duplicate occupant; the occupant is gone.
  OccupantDropped,
}

/// Resolve a cell collision between an occupant and an incoming point.
///
/// Points within the duplicate distance are settled by policy alone. For
/// distinct points the one nearer the cell center wins, ties favoring the
/// incoming point.
fn contest_cell(
  occupant: &PointCloudPoint,
  occupant_dist_sq: f32,
  incoming: &PointCloudPoint,
  incoming_dist_sq: f32,
  duplicate_handling: DuplicateHandling,
  max_duplicate_dist_sq: f32,
) -> CellContest {
  if occupant.position.distance_squared(incoming.position) <= max_duplicate_dist_sq {
    return match duplicate_handling {
      DuplicateHandling::Ignore => CellContest::IncomingDropped,
      DuplicateHandling::SelectFirst => CellContest::IncomingDropped,
      DuplicateHandling::SelectBrighter => {
        if incoming.luma() > occupant.luma() {
          CellContest::OccupantDropped
        } else {
          CellContest::IncomingDropped
        }
      }
    };
  }

  if incoming_dist_sq <= occupant_dist_sq {
    CellContest::IncomingWins
  } else {
    CellContest::OccupantWins
  }
}

impl Octree {
  /// Insert a batch of points, deduplicating on the virtual grid.
  ///
  /// `translation` is added to every point position before placement,
  /// letting callers feed world-space batches into a re-centered cloud.
  /// Fails if the tree has not been initialized with a valid extent.
  #[cfg_attr(
    feature = "tracing",
    tracing::instrument(skip(self, points), fields(count = points.len()))
  )]
  pub fn insert_points(
    &mut self,
    points: &[PointCloudPoint],
    duplicate_handling: DuplicateHandling,
    translation: Vec3,
  ) -> Result<()> {
    if !self.is_initialized() {
      return Err(PointCloudError::InvalidBounds(self.extent()));
    }

    let translated: Vec<PointCloudPoint> = points
      .iter()
      .filter(|point| point.position.is_finite())
      .map(|point| {
        let mut p = *point;
        p.position += translation;
        p
      })
      .collect();

    if translated.is_empty() {
      return Ok(());
    }

    self.insert_points_at(self.root_id(), translated, duplicate_handling);
    self.invalidate_traversals();
    Ok(())
  }

  fn insert_points_at(
    &mut self,
    id: NodeId,
    incoming: Vec<PointCloudPoint>,
    duplicate_handling: DuplicateHandling,
  ) {
    let settings = *self.settings();
    let depth = self.node(id).depth;
    let center = self.node(id).center;
    let level = *self.level(depth);
    let max_dup_sq = settings.max_distance_for_duplicate * settings.max_distance_for_duplicate;

    let mut buckets: [Vec<PointCloudPoint>; 8] = Default::default();

    // Phase 1: deduplicate the batch against itself, one winner per cell.
    let mut slots: HashMap<u32, (PointCloudPoint, f32)> = HashMap::new();
    for point in incoming {
      let cell = grid_cell_data(point.position, center, &level, settings.grid_resolution);
      match slots.entry(cell.index) {
        std::collections::hash_map::Entry::Vacant(entry) => {
          entry.insert((point, cell.dist_sq));
        }
        std::collections::hash_map::Entry::Occupied(mut entry) => {
          let (occupant, occupant_dist_sq) = *entry.get();
          match contest_cell(
            &occupant,
            occupant_dist_sq,
            &point,
            cell.dist_sq,
            duplicate_handling,
            max_dup_sq,
          ) {
            CellContest::IncomingWins => {
              entry.insert((point, cell.dist_sq));
              buckets[occupant_octant(occupant.position, center)].push(occupant);
            }
            CellContest::OccupantWins => {
              buckets[cell.octant as usize].push(point);
            }
            CellContest::IncomingDropped => {}
            CellContest::OccupantDropped => {
              entry.insert((point, cell.dist_sq));
            }
          }
        }
      }
    }

    // Phase 2: merge the surviving slots into the resident buffer.
    let mut current = self.node_mut(id).take_points().unwrap_or_default();
    let old_len = current.len();

    let mut occupied: HashMap<u32, (usize, f32)> = HashMap::with_capacity(current.len());
    for (i, point) in current.iter().enumerate() {
      let cell = grid_cell_data(point.position, center, &level, settings.grid_resolution);
      match occupied.entry(cell.index) {
        std::collections::hash_map::Entry::Vacant(entry) => {
          entry.insert((i, cell.dist_sq));
        }
        std::collections::hash_map::Entry::Occupied(mut entry) => {
          // Padding shares cells with grid winners; track the closest.
          if cell.dist_sq < entry.get().1 {
            entry.insert((i, cell.dist_sq));
          }
        }
      }
    }

    for (cell_index, (point, dist_sq)) in slots {
      match occupied.get(&cell_index).copied() {
        None => {
          occupied.insert(cell_index, (current.len(), dist_sq));
          current.push(point);
        }
        Some((occupant_index, occupant_dist_sq)) => {
          let occupant = current[occupant_index];
          match contest_cell(
            &occupant,
            occupant_dist_sq,
            &point,
            dist_sq,
            duplicate_handling,
            max_dup_sq,
          ) {
            CellContest::IncomingWins => {
              current[occupant_index] = point;
              occupied.insert(cell_index, (occupant_index, dist_sq));
              buckets[occupant_octant(occupant.position, center)].push(occupant);
            }
            CellContest::OccupantWins => {
              buckets[occupant_octant(point.position, center)].push(point);
            }
            CellContest::IncomingDropped => {}
            CellContest::OccupantDropped => {
              current[occupant_index] = point;
              occupied.insert(cell_index, (occupant_index, dist_sq));
            }
          }
        }
      }
    }

    // Route the overflow: recurse into existing children, split buckets
    // that outgrew the threshold, absorb the rest as padding.
    let mut recurse: Vec<(NodeId, Vec<PointCloudPoint>)> = Vec::new();
    let can_split = depth < settings.max_depth;

    for (octant, bucket) in buckets.into_iter().enumerate() {
      if bucket.is_empty() {
        continue;
      }
      if let Some(child) = self.node(id).child_at(octant as u8) {
        recurse.push((child, bucket));
      } else if can_split && bucket.len() > settings.max_bucket_size {
        let child_center = self.node(id).child_center(octant as u8, &level);
        let child = self.arena_insert(OctreeNode::new(depth + 1, octant as u8, child_center));
        self.node_mut(id).children[octant as usize] = Some(child);
        self.add_node_count(depth + 1, 1);
        recurse.push((child, bucket));
      } else {
        current.extend(bucket);
      }
    }

    let delta = current.len() as i64 - old_len as i64;
    self.node_mut(id).set_points(current);
    self.add_point_count(depth, delta);

    for (child, bucket) in recurse {
      self.insert_points_at(child, bucket, duplicate_handling);
    }
  }

  /// Remove a single point by identity, walking the octant path its
  /// position addresses. Padding can sit anywhere along the path, so
  /// every node on the way down is searched. No-op when the point is
  /// not found or its node is not resident.
  pub fn remove_point(&mut self, position: Vec3) -> bool {
    let mut id = self.root_id();
    loop {
      let hit = self
        .node(id)
        .points()
        .and_then(|points| points.iter().position(|point| point.position == position));
      if let Some(index) = hit {
        let depth = self.node(id).depth;
        let mut points = self.node_mut(id).take_points().unwrap_or_default();
        points.remove(index);
        self.node_mut(id).set_points(points);
        self.add_point_count(depth, -1);
        self.invalidate_traversals();
        return true;
      }
      let octant = self.node(id).octant_for(position);
      match self.node(id).child_at(octant) {
        Some(child) => id = child,
        None => return false,
      }
    }
  }

  /// Remove every point inside a sphere. Returns the number removed.
  pub fn remove_points_in_sphere(&mut self, sphere: &Sphere, visible_only: bool) -> usize {
    self.remove_points_where(
      |node_bounds| sphere.overlaps_aabb(node_bounds),
      |point| {
        sphere.contains_point(point.position) && (!visible_only || point.is_visible())
      },
    )
  }

  /// Remove every point inside a box. Returns the number removed.
  pub fn remove_points_in_box(&mut self, aabb: &Aabb, visible_only: bool) -> usize {
    self.remove_points_where(
      |node_bounds| aabb.overlaps(node_bounds),
      |point| aabb.contains_point(point.position) && (!visible_only || point.is_visible()),
    )
  }

  /// Permanently remove all hidden points. Returns the number removed.
  pub fn remove_hidden_points(&mut self) -> usize {
    self.remove_points_where(|_| true, |point| !point.is_visible())
  }

  fn remove_points_where(
    &mut self,
    mut node_filter: impl FnMut(&Aabb) -> bool,
    mut point_filter: impl FnMut(&PointCloudPoint) -> bool,
  ) -> usize {
    let mut removed = 0;
    for id in self.node_ids() {
      let depth = self.node(id).depth;
      let bounds = self.node(id).bounds(self.level(depth));
      if !node_filter(&bounds) {
        continue;
      }
      let Some(mut points) = self.node_mut(id).take_points() else {
        continue;
      };
      let before = points.len();
      points.retain(|point| !point_filter(point));
      let delta = before - points.len();
      if delta > 0 {
        removed += delta;
        self.add_point_count(depth, -(delta as i64));
      }
      self.node_mut(id).set_points(points);
    }
    if removed > 0 {
      self.invalidate_traversals();
    }
    removed
  }

  fn arena_insert(&mut self, node: OctreeNode) -> NodeId {
    NodeId(self.arena_mut().insert(node))
  }
}

#[inline]
fn occupant_octant(position: Vec3, center: Vec3) -> usize {
  let rel = position - center;
  ((if rel.x > 0.0 { 4 } else { 0 })
    + (if rel.y > 0.0 { 2 } else { 0 })
    + (if rel.z > 0.0 { 1 } else { 0 })) as usize
}

#[cfg(test)]
#[path = "insert_test.rs"]
mod insert_test;
