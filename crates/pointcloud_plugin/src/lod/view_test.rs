use glam::Vec3;

use super::{node_is_clipped, sorted_for_application, ClipMode, ClippingVolume};
use crate::octree::Aabb;

fn volume(min: f32, max: f32, mode: ClipMode, priority: i32) -> ClippingVolume {
  ClippingVolume {
    bounds: Aabb::new(Vec3::splat(min), Vec3::splat(max)),
    mode,
    priority,
  }
}

#[test]
fn volumes_sort_by_priority_then_mode() {
  let volumes = vec![
    volume(0.0, 1.0, ClipMode::ClipInside, 5),
    volume(0.0, 1.0, ClipMode::ClipOutside, 5),
    volume(0.0, 1.0, ClipMode::ClipInside, 1),
  ];
  let sorted = sorted_for_application(&volumes);

  assert_eq!(sorted[0].priority, 1);
  assert_eq!(sorted[1].mode, ClipMode::ClipOutside);
  assert_eq!(sorted[2].mode, ClipMode::ClipInside);
}

#[test]
fn clip_outside_culls_disjoint_nodes() {
  let volumes = vec![volume(-10.0, 10.0, ClipMode::ClipOutside, 0)];
  let sorted = sorted_for_application(&volumes);

  assert!(node_is_clipped(&sorted, Vec3::splat(50.0), Vec3::splat(5.0)));
  assert!(!node_is_clipped(&sorted, Vec3::ZERO, Vec3::splat(5.0)));
  // Straddling the boundary keeps the node.
  assert!(!node_is_clipped(&sorted, Vec3::splat(10.0), Vec3::splat(5.0)));
}

#[test]
fn clip_inside_culls_contained_nodes_only() {
  let volumes = vec![volume(-10.0, 10.0, ClipMode::ClipInside, 0)];
  let sorted = sorted_for_application(&volumes);

  assert!(node_is_clipped(&sorted, Vec3::ZERO, Vec3::splat(5.0)));
  assert!(!node_is_clipped(&sorted, Vec3::splat(8.0), Vec3::splat(5.0)));
  assert!(!node_is_clipped(&sorted, Vec3::splat(50.0), Vec3::splat(5.0)));
}

#[test]
fn inside_clip_wins_ties_against_outside_clip() {
  // Same priority, same region: the inside-clip applies second.
  let volumes = vec![
    volume(-10.0, 10.0, ClipMode::ClipInside, 0),
    volume(-10.0, 10.0, ClipMode::ClipOutside, 0),
  ];
  let sorted = sorted_for_application(&volumes);
  assert!(node_is_clipped(&sorted, Vec3::ZERO, Vec3::splat(5.0)));
}

#[test]
fn higher_priority_outside_clip_restores_clipped_region() {
  // A low-priority inside-clip removes the region, but a higher-priority
  // outside-clip over the same region re-includes overlapping nodes.
  let volumes = vec![
    volume(-10.0, 10.0, ClipMode::ClipInside, 0),
    volume(-10.0, 10.0, ClipMode::ClipOutside, 1),
  ];
  let sorted = sorted_for_application(&volumes);
  assert!(!node_is_clipped(&sorted, Vec3::ZERO, Vec3::splat(5.0)));
}
