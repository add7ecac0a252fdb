use glam::Vec3;

use crate::octree::bounds::{Aabb, Sphere};
use crate::octree::{Octree, OctreeSettings};
use crate::point::{DuplicateHandling, PointCloudPoint};

fn grid_tree() -> Octree {
  let mut octree = Octree::new(OctreeSettings::default());
  octree.initialize(Vec3::splat(100.0)).unwrap();
  let mut points = Vec::new();
  for x in -4..=4 {
    for y in -4..=4 {
      points.push(PointCloudPoint::new(
        Vec3::new(x as f32 * 10.0, y as f32 * 10.0, 0.0),
        [128, 128, 128, 255],
      ));
    }
  }
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();
  octree
}

#[test]
fn hide_in_sphere_updates_visible_counts() {
  let mut octree = grid_tree();
  let total = octree.num_points();
  assert_eq!(octree.num_visible_points(), total);

  octree.set_visibility_in_sphere(&Sphere::new(Vec3::ZERO, 12.0), false);

  // The sphere of radius 12 covers the origin and its 4 axis neighbors;
  // the diagonal neighbors sit at distance ~14.1 and stay visible.
  assert_eq!(octree.num_visible_points(), total - 5);
}

#[test]
fn hidden_points_sort_behind_visible_ones() {
  let mut octree = grid_tree();
  octree.set_visibility_in_box(&Aabb::new(Vec3::splat(-5.0), Vec3::splat(5.0)), false);

  for id in octree.node_ids() {
    let node = octree.node(id);
    assert!(!node.is_visibility_dirty());
    if let Some(points) = node.points() {
      let visible = node.num_visible_points() as usize;
      assert!(points[..visible].iter().all(|p| p.is_visible()));
      assert!(points[visible..].iter().all(|p| !p.is_visible()));
    }
  }
}

#[test]
fn hide_all_then_unhide_all_round_trips() {
  let mut octree = grid_tree();
  let total = octree.num_points();

  octree.hide_all();
  assert_eq!(octree.num_visible_points(), 0);

  octree.unhide_all();
  assert_eq!(octree.num_visible_points(), total);
}

#[test]
fn unhide_is_idempotent() {
  let mut octree = grid_tree();
  let total = octree.num_points();
  octree.unhide_all();
  octree.unhide_all();
  assert_eq!(octree.num_visible_points(), total);
}

#[test]
fn apply_color_in_sphere_respects_visible_only() {
  let mut octree = grid_tree();
  octree.set_visibility_in_sphere(&Sphere::new(Vec3::ZERO, 1.0), false);
  octree.apply_color_in_sphere([255, 0, 0, 255], &Sphere::new(Vec3::ZERO, 12.0), true);

  let mut recolored = 0;
  let mut untouched_hidden = 0;
  for id in octree.node_ids() {
    if let Some(points) = octree.node(id).points() {
      for point in points {
        if point.color == [255, 0, 0, 255] {
          recolored += 1;
        }
        if !point.is_visible() && point.color == [128, 128, 128, 255] {
          untouched_hidden += 1;
        }
      }
    }
  }
  // 4 axis neighbors recolored; the hidden origin point kept its color.
  assert_eq!(recolored, 4);
  assert_eq!(untouched_hidden, 1);
}
