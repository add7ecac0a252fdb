//! Per-frame node selection under the global point budget.
//!
//! Selection walks each instance's traversal snapshot, scores visible
//! nodes by projected screen size, then fills the budget greedily from
//! the globally best node down. The walk prunes subtrees that are
//! frustum-culled, clipped, too deep, or projecting below the minimum
//! screen size; a fully contained ancestor spares its descendants the
//! frustum tests.

use std::collections::VecDeque;

use glam::Vec3;

use super::view::{node_is_clipped, sorted_for_application, InstanceConfig, ViewData};
use crate::octree::bounds::{Aabb, Containment};
use crate::octree::NodeId;
use crate::traversal::TraversalOctree;

/// Screen-size stand-in for nodes containing the camera. Decays with
/// depth so enclosing coarse nodes outrank fine ones.
const CAMERA_INSIDE_PRIORITY: f32 = 1.0e9;

/// Added to the score of depths below an instance's floor so its coarse
/// silhouette survives budget contention against other instances.
const MIN_DEPTH_PRIORITY: f32 = 1.0e6;

/// One instance's inputs to selection.
pub struct SelectionInput<'a> {
  pub traversal: &'a TraversalOctree,
  pub config: &'a InstanceConfig,
}

/// A node accepted for rendering this frame.
#[derive(Clone, Debug)]
pub struct RenderNode {
  /// Index into the instance list given to [`select_nodes`].
  pub instance: usize,
  /// Index into that instance's traversal snapshot.
  pub traversal_index: u32,
  /// Source node in the octree arena.
  pub node: NodeId,
  pub depth: u8,
  pub num_points: u32,
  /// Whether the point buffer was resident at snapshot time. Non-resident
  /// nodes still consume budget; they render once streamed in.
  pub resident: bool,
  /// Quantized virtual depth for adaptive point sizing.
  pub virtual_depth: u8,
  /// World-space node center.
  pub center: Vec3,
}

/// The selection result for one frame.
#[derive(Default)]
pub struct RenderFrame {
  /// Accepted nodes, best screen size first.
  pub nodes: Vec<RenderNode>,
  /// Points accepted, never above the budget.
  pub total_points: u32,
  /// Points selection wanted before the budget cut.
  pub demand: u32,
}

struct Candidate {
  instance: usize,
  index: u32,
  screen_size: f32,
  num_points: u32,
}

/// Select nodes across all instances under a shared point budget.
#[cfg_attr(
  feature = "tracing",
  tracing::instrument(skip_all, fields(instances = instances.len(), budget))
)]
pub fn select_nodes(instances: &[SelectionInput<'_>], views: &[ViewData], budget: u32) -> RenderFrame {
  let mut candidates = Vec::new();
  let mut demand: u64 = 0;

  for (instance_index, input) in instances.iter().enumerate() {
    collect_candidates(instance_index, input, views, &mut candidates, &mut demand);
  }

  candidates.sort_by(|a, b| b.screen_size.total_cmp(&a.screen_size));

  let mut total: u32 = 0;
  let mut accepted: Vec<Candidate> = Vec::new();

  for candidate in candidates {
    match total.checked_add(candidate.num_points) {
      Some(next) if next <= budget => {
        total = next;
        accepted.push(candidate);
      }
      _ => {}
    }
  }

  let nodes = accepted
    .into_iter()
    .map(|candidate| {
      let input = &instances[candidate.instance];
      let node = input.traversal.node(candidate.index);
      let virtual_depth = if input.config.adaptive_point_size {
        input
          .traversal
          .calculate_virtual_depth(candidate.index, input.config.point_size_bias)
      } else {
        (node.depth as f32 * 255.0 / input.traversal.num_lods() as f32) as u8
      };
      RenderNode {
        instance: candidate.instance,
        traversal_index: candidate.index,
        node: node.source,
        depth: node.depth,
        num_points: node.num_points,
        resident: node.resident,
        virtual_depth,
        center: node.center,
      }
    })
    .collect();

  RenderFrame {
    nodes,
    total_points: total,
    demand: demand.min(u32::MAX as u64) as u32,
  }
}

fn collect_candidates(
  instance_index: usize,
  input: &SelectionInput<'_>,
  views: &[ViewData],
  candidates: &mut Vec<Candidate>,
  demand: &mut u64,
) {
  let traversal = input.traversal;
  let config = input.config;
  let clipping = sorted_for_application(&config.clipping);

  let views: Vec<&ViewData> = match config.viewport {
    Some(viewport) => views.get(viewport).into_iter().collect(),
    None => views.iter().collect(),
  };

  let mut queue = VecDeque::new();
  queue.push_back((0u32, false));
  while let Some((index, ancestor_inside)) = queue.pop_front() {
    let node = traversal.node(index);
    if node.depth > config.max_depth {
      continue;
    }

    let radius = traversal.radius(node.depth) * config.bounds_scale;
    let half_extent = traversal.extent(node.depth) * config.bounds_scale;

    let mut inside = ancestor_inside;
    let mut visible = ancestor_inside;
    if !visible {
      for view in &views {
        match view.frustum.classify_sphere(node.center, radius) {
          Containment::Inside => {
            inside = true;
            visible = true;
            break;
          }
          Containment::Intersecting => visible = true,
          Containment::Outside => {}
        }
      }
    }
    if !visible {
      continue;
    }

    if node_is_clipped(&clipping, node.center, half_extent) {
      continue;
    }

    let node_bounds = Aabb::from_center_extent(node.center, half_extent);
    let camera_inside = views.iter().any(|view| node_bounds.contains_point(view.origin));

    let mut screen_size = 0.0f32;
    let mut ortho_visible = false;
    if camera_inside {
      screen_size = CAMERA_INSIDE_PRIORITY / (node.depth as f32 + 1.0);
    } else {
      let radius_sq = radius * radius;
      for view in &views {
        let s = if view.ortho {
          ortho_visible = true;
          view.screen_size_factor * radius_sq
        } else {
          let dist_sq = view.origin.distance_squared(node.center).max(1.0e-6);
          let mut s = view.screen_size_factor * radius_sq / dist_sq;
          if config.screen_center_importance > 0.0 {
            let to_node = (node.center - view.origin).normalize_or_zero();
            let alignment = to_node.dot(view.direction).max(0.0);
            s *= 1.0 - config.screen_center_importance
              + config.screen_center_importance * alignment;
          }
          s
        };
        screen_size = screen_size.max(s);
      }
    }
    if node.depth < config.min_depth {
      screen_size += MIN_DEPTH_PRIORITY;
    }

    // The minimum screen size prunes the subtree, but never below the
    // floor depth and never for orthographic views.
    if node.depth >= config.min_depth
      && !camera_inside
      && !ortho_visible
      && screen_size < config.min_screen_size
    {
      continue;
    }

    // Nodes without visible points never earn budget; their subtree can
    // still contribute.
    if node.num_points > 0 && node.num_visible > 0 {
      *demand += node.num_points as u64;
      candidates.push(Candidate {
        instance: instance_index,
        index,
        screen_size,
        num_points: node.num_points,
      });
    }

    for &child in &node.children {
      queue.push_back((child, inside));
    }
  }
}

#[cfg(test)]
#[path = "selection_test.rs"]
mod selection_test;
