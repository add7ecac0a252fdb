//! World-space traversal snapshots.
//!
//! LOD selection never walks the mutable octree directly. It walks a
//! [`TraversalOctree`], a flat, immutable snapshot of the node hierarchy
//! transformed into world space at build time. Snapshots register with
//! their source tree and carry a validity flag; any structural mutation
//! flips the flag and the next frame rebuilds the snapshot instead of
//! reading stale geometry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{Affine3A, Vec3};
use smallvec::SmallVec;

use crate::octree::{NodeId, Octree};

/// One node of the snapshot, fully resolved into world space.
#[derive(Clone, Debug)]
pub struct TraversalNode {
  /// Source node in the octree arena.
  pub source: NodeId,
  pub depth: u8,
  /// World-space center.
  pub center: Vec3,
  /// Authoritative point count at snapshot time.
  pub num_points: u32,
  /// Last-known visible count; survives eviction of the buffer.
  pub num_visible: u32,
  /// Whether the buffer was resident at snapshot time.
  pub resident: bool,
  /// Indices of child snapshot nodes.
  pub children: SmallVec<[u32; 8]>,
  /// Index of the parent snapshot node; None for the root.
  pub parent: Option<u32>,
}

/// Flat world-space snapshot of an octree.
pub struct TraversalOctree {
  valid: AtomicBool,
  nodes: Vec<TraversalNode>,
  num_lods: u8,
  /// Per-depth share of the total point count.
  level_weights: Vec<f32>,
  /// Per-depth world half-extents; depth d+1 is half of depth d.
  extents: Vec<Vec3>,
  /// Per-depth squared bounding-sphere radii in world units.
  radii_sq: Vec<f32>,
  /// Maps a tree depth onto the 0-255 virtual depth scale.
  vd_multiplier: f32,
}

impl TraversalOctree {
  /// Snapshot an octree under a local-to-world transform and register
  /// the result for invalidation.
  pub fn build(octree: &Octree, local_to_world: &Affine3A) -> Arc<Self> {
    let num_lods = octree.num_lods().max(1);
    let vd_multiplier = 255.0 / num_lods as f32;

    let counts = octree.point_counts_per_depth();
    let total: i64 = counts.iter().sum();
    let level_weights: Vec<f32> = counts
      .iter()
      .take(num_lods as usize)
      .map(|&count| {
        if total > 0 {
          count as f32 / total as f32
        } else {
          0.0
        }
      })
      .collect();

    let root_extent = octree.grid_bounds().half_extent();
    let mut extents = Vec::with_capacity(num_lods as usize);
    let mut radii_sq = Vec::with_capacity(num_lods as usize);
    for depth in 0..num_lods {
      let extent = if depth == 0 {
        world_extent(local_to_world, root_extent)
      } else {
        extents[depth as usize - 1] * 0.5
      };
      extents.push(extent);
      radii_sq.push(extent.length_squared());
    }

    let mut nodes = Vec::with_capacity(octree.num_nodes() as usize);
    let mut queue = VecDeque::new();
    queue.push_back((octree.root_id(), None::<u32>));
    while let Some((id, parent)) = queue.pop_front() {
      let source = octree.node(id);
      let index = nodes.len() as u32;
      if let Some(parent) = parent {
        let parent_node: &mut TraversalNode = &mut nodes[parent as usize];
        parent_node.children.push(index);
      }
      nodes.push(TraversalNode {
        source: id,
        depth: source.depth,
        center: local_to_world.transform_point3(source.center),
        num_points: source.num_points(),
        num_visible: source.num_visible_raw(),
        resident: source.has_data(),
        children: SmallVec::new(),
        parent,
      });
      for child in source.children.iter().flatten() {
        queue.push_back((*child, Some(index)));
      }
    }

    let traversal = Arc::new(Self {
      valid: AtomicBool::new(true),
      nodes,
      num_lods,
      level_weights,
      extents,
      radii_sq,
      vd_multiplier,
    });
    octree.register_traversal(&traversal);
    traversal
  }

  /// Mark the snapshot stale. Called by the source tree on mutation.
  pub fn invalidate(&self) {
    self.valid.store(false, Ordering::Release);
  }

  /// Whether the snapshot still mirrors the source tree.
  pub fn is_valid(&self) -> bool {
    self.valid.load(Ordering::Acquire)
  }

  /// All snapshot nodes, root first in breadth-first order.
  pub fn nodes(&self) -> &[TraversalNode] {
    &self.nodes
  }

  pub fn node(&self, index: u32) -> &TraversalNode {
    &self.nodes[index as usize]
  }

  pub fn num_lods(&self) -> u8 {
    self.num_lods
  }

  /// World half-extent of nodes at a depth.
  pub fn extent(&self, depth: u8) -> Vec3 {
    self.extents[depth as usize]
  }

  /// Squared world bounding-sphere radius of nodes at a depth.
  pub fn radius_sq(&self, depth: u8) -> f32 {
    self.radii_sq[depth as usize]
  }

  /// World bounding-sphere radius of nodes at a depth.
  pub fn radius(&self, depth: u8) -> f32 {
    self.radii_sq[depth as usize].sqrt()
  }

  /// Compute the virtual depth of a node for adaptive point sizing,
  /// quantized onto the 0-255 scale.
  ///
  /// The result is the point-weighted mean depth over the node's
  /// still-resident descendants; evicted subtrees stop contributing the
  /// moment a fresh snapshot sees them. A positive `point_size_bias`
  /// discounts densely branching regions, shrinking points where
  /// siblings crowd each other.
  pub fn calculate_virtual_depth(&self, start: u32, point_size_bias: f32) -> u8 {
    let mut vd_factor = 0.0f32;
    let mut queue = VecDeque::new();
    queue.push_back(start);
    while let Some(index) = queue.pop_front() {
      let node = &self.nodes[index as usize];
      for &child in &node.children {
        if self.nodes[child as usize].resident {
          queue.push_back(child);
        }
      }

      let weight = self.level_weights[node.depth as usize];
      let mut local = node.depth as f32 * node.num_points as f32 * weight;
      if index != start && point_size_bias > 0.0 {
        if let Some(parent) = node.parent {
          let siblings = self.nodes[parent as usize].children.len() as f32;
          local /= (siblings - 1.0) * point_size_bias + 1.0;
        }
      }
      vd_factor += local;
    }

    let mut weighted_points = 0.0f32;
    queue.push_back(start);
    while let Some(index) = queue.pop_front() {
      let node = &self.nodes[index as usize];
      for &child in &node.children {
        if self.nodes[child as usize].resident {
          queue.push_back(child);
        }
      }
      weighted_points += node.num_points as f32 * self.level_weights[node.depth as usize];
    }

    if weighted_points <= 0.0 {
      return (self.nodes[start as usize].depth as f32 * self.vd_multiplier) as u8;
    }
    (vd_factor / weighted_points * self.vd_multiplier).clamp(0.0, 255.0) as u8
  }
}

/// Transform a local half-extent by the rotation/scale part of an affine.
fn world_extent(transform: &Affine3A, extent: Vec3) -> Vec3 {
  let m = transform.matrix3;
  Vec3::from(m.x_axis.abs()) * extent.x
    + Vec3::from(m.y_axis.abs()) * extent.y
    + Vec3::from(m.z_axis.abs()) * extent.z
}

#[cfg(test)]
#[path = "traversal_test.rs"]
mod traversal_test;
