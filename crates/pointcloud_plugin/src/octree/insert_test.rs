use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::grid_cell_data;
use crate::error::PointCloudError;
use crate::octree::bounds::Sphere;
use crate::octree::level::LevelData;
use crate::octree::{Octree, OctreeSettings};
use crate::point::{DuplicateHandling, PointCloudPoint};

fn tree(settings: OctreeSettings, extent: f32) -> Octree {
  let mut octree = Octree::new(settings);
  octree.initialize(Vec3::splat(extent)).unwrap();
  octree
}

fn random_points(count: usize, extent: f32, seed: u64) -> Vec<PointCloudPoint> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..count)
    .map(|_| {
      PointCloudPoint::new(
        Vec3::new(
          rng.random_range(-extent..extent),
          rng.random_range(-extent..extent),
          rng.random_range(-extent..extent),
        ),
        [255, 255, 255, 255],
      )
    })
    .collect()
}

#[test]
fn grid_cell_index_and_clamping() {
  let level = LevelData::new(10.0, 4);
  let center = Vec3::ZERO;

  // Cell size is 5; a point at (-9, -9, -9) falls into cell (0, 0, 0).
  let low = grid_cell_data(Vec3::splat(-9.0), center, &level, 4);
  assert_eq!(low.index, 0);

  // The far corner clamps into the last cell instead of overflowing.
  let high = grid_cell_data(Vec3::splat(10.0), center, &level, 4);
  assert_eq!(high.index, 3 * 16 + 3 * 4 + 3);

  // Distance is measured to the cell center: cell (0,0,0) centers at -7.5.
  let expected = Vec3::splat(-9.0).distance_squared(Vec3::splat(-7.5));
  assert!((low.dist_sq - expected).abs() < 1e-5);
}

#[test]
fn insert_requires_initialization() {
  let mut octree = Octree::new(OctreeSettings::default());
  let points = [PointCloudPoint::new(Vec3::ZERO, [0; 4])];
  let err = octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap_err();
  assert!(matches!(err, PointCloudError::InvalidBounds(_)));
}

#[test]
fn distinct_points_are_conserved() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let points = random_points(5_000, 100.0, 7);
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();

  assert_eq!(octree.num_points(), 5_000);
}

#[test]
fn duplicates_are_dropped_with_ignore() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let a = PointCloudPoint::new(Vec3::splat(1.0), [10, 10, 10, 255]);
  let b = PointCloudPoint::new(Vec3::splat(1.0), [200, 200, 200, 255]);

  octree
    .insert_points(&[a, b], DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();
  assert_eq!(octree.num_points(), 1);
}

#[test]
fn select_brighter_keeps_the_brighter_duplicate() {
  for order in [[50u8, 200u8], [200u8, 50u8]] {
    let mut octree = tree(OctreeSettings::default(), 100.0);
    let points: Vec<PointCloudPoint> = order
      .iter()
      .map(|&c| PointCloudPoint::new(Vec3::splat(1.0), [c, c, c, 255]))
      .collect();

    octree
      .insert_points(&points, DuplicateHandling::SelectBrighter, Vec3::ZERO)
      .unwrap();

    assert_eq!(octree.num_points(), 1);
    let root = octree.node(octree.root_id());
    assert_eq!(root.points().unwrap()[0].color[0], 200);
  }
}

#[test]
fn select_first_keeps_the_earlier_duplicate() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let a = PointCloudPoint::new(Vec3::splat(1.0), [50, 50, 50, 255]);
  let b = PointCloudPoint::new(Vec3::splat(1.0), [200, 200, 200, 255]);

  octree
    .insert_points(&[a], DuplicateHandling::SelectFirst, Vec3::ZERO)
    .unwrap();
  octree
    .insert_points(&[b], DuplicateHandling::SelectFirst, Vec3::ZERO)
    .unwrap();

  assert_eq!(octree.num_points(), 1);
  let root = octree.node(octree.root_id());
  assert_eq!(root.points().unwrap()[0].color[0], 50);
}

#[test]
fn overflow_buckets_become_children() {
  // A coarse grid forces heavy cell contention so buckets overflow.
  let settings = OctreeSettings {
    grid_resolution: 8,
    max_bucket_size: 200,
    ..OctreeSettings::default()
  };
  let mut octree = tree(settings, 100.0);
  let points = random_points(10_000, 100.0, 13);
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();

  assert!(octree.num_lods() >= 2, "expected child nodes to be created");
  assert_eq!(octree.num_points(), 10_000);
  assert!(octree.num_nodes() > 1);

  // The root keeps one point per occupied grid cell plus at most one
  // sub-threshold bucket of padding per octant; everything else must
  // have overflowed into children.
  let root_points = octree.node(octree.root_id()).num_points() as usize;
  assert!(root_points <= 8 * 8 * 8 + 8 * settings.max_bucket_size);
}

#[test]
fn max_depth_zero_absorbs_everything_into_root() {
  let settings = OctreeSettings {
    grid_resolution: 8,
    max_bucket_size: 10,
    max_depth: 0,
    ..OctreeSettings::default()
  };
  let mut octree = tree(settings, 100.0);
  let points = random_points(2_000, 100.0, 99);
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();

  assert_eq!(octree.num_lods(), 1);
  assert_eq!(octree.num_points(), 2_000);
  assert_eq!(octree.node(octree.root_id()).num_points(), 2_000);
}

#[test]
fn translation_is_applied_before_placement() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let point = PointCloudPoint::new(Vec3::new(150.0, 0.0, 0.0), [0; 4]);
  octree
    .insert_points(&[point], DuplicateHandling::Ignore, Vec3::new(-150.0, 0.0, 0.0))
    .unwrap();

  let root = octree.node(octree.root_id());
  assert_eq!(root.points().unwrap()[0].position, Vec3::ZERO);
}

#[test]
fn non_finite_positions_are_skipped() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let bad = PointCloudPoint::new(Vec3::new(f32::NAN, 0.0, 0.0), [0; 4]);
  let good = PointCloudPoint::new(Vec3::ONE, [0; 4]);

  octree
    .insert_points(&[bad, good], DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();
  assert_eq!(octree.num_points(), 1);
}

#[test]
fn remove_point_matches_by_identity() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let points = random_points(1_000, 100.0, 21);
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();

  let target = points[500].position;
  assert!(octree.remove_point(target));
  assert_eq!(octree.num_points(), 999);

  // Already gone, and a nearby miss is a no-op too.
  assert!(!octree.remove_point(target));
  assert!(!octree.remove_point(target + Vec3::splat(1.0e-3)));
  assert_eq!(octree.num_points(), 999);
}

#[test]
fn remove_points_in_sphere_updates_counters() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let points = vec![
    PointCloudPoint::new(Vec3::ZERO, [0; 4]),
    PointCloudPoint::new(Vec3::splat(1.0), [0; 4]),
    PointCloudPoint::new(Vec3::splat(50.0), [0; 4]),
  ];
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();

  let removed = octree.remove_points_in_sphere(&Sphere::new(Vec3::ZERO, 5.0), false);
  assert_eq!(removed, 2);
  assert_eq!(octree.num_points(), 1);
}

#[test]
fn remove_hidden_points_only_touches_hidden() {
  let mut octree = tree(OctreeSettings::default(), 100.0);
  let mut points = random_points(100, 100.0, 3);
  for (i, point) in points.iter_mut().enumerate() {
    point.set_visible(i % 4 != 0);
  }
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();

  let removed = octree.remove_hidden_points();
  assert_eq!(removed, 25);
  assert_eq!(octree.num_points(), 75);
}
