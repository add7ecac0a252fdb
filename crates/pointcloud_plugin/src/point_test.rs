use glam::{Affine3A, Vec3};

use super::{PackedNormal, PointCloudPoint};

#[test]
fn point_is_20_bytes() {
  assert_eq!(std::mem::size_of::<PointCloudPoint>(), 20);
}

#[test]
fn new_points_are_visible_and_unclassified() {
  let point = PointCloudPoint::new(Vec3::ZERO, [10, 20, 30, 255]);
  assert!(point.is_visible());
  assert!(!point.is_selected());
  assert_eq!(point.classification(), 0);
  assert!(!point.normal.is_set());
}

#[test]
fn flags_are_independent() {
  let mut point = PointCloudPoint::new(Vec3::ZERO, [0; 4]);

  point.set_classification(17);
  point.set_selected(true);
  assert!(point.is_visible());
  assert!(point.is_selected());
  assert_eq!(point.classification(), 17);

  point.set_visible(false);
  assert!(!point.is_visible());
  assert!(point.is_selected());
  assert_eq!(point.classification(), 17);
}

#[test]
fn classification_truncates_to_5_bits() {
  let mut point = PointCloudPoint::new(Vec3::ZERO, [0; 4]);
  point.set_classification(255);
  assert_eq!(point.classification(), 31);
}

#[test]
fn luma_follows_bt709_weights() {
  let white = PointCloudPoint::new(Vec3::ZERO, [255, 255, 255, 255]);
  assert!((white.luma() - 255.0).abs() < 0.1);

  let green = PointCloudPoint::new(Vec3::ZERO, [0, 255, 0, 255]);
  let red = PointCloudPoint::new(Vec3::ZERO, [255, 0, 0, 255]);
  let blue = PointCloudPoint::new(Vec3::ZERO, [0, 0, 255, 255]);
  assert!(green.luma() > red.luma());
  assert!(red.luma() > blue.luma());
}

#[test]
fn packed_normal_quantizes_directions() {
  let n = PackedNormal::from_vec3(Vec3::new(0.0, 0.0, 1.0));
  let unpacked = n.unpack().unwrap();
  assert!((unpacked - Vec3::Z).length() < 0.02);

  let diag = PackedNormal::from_vec3(Vec3::new(1.0, 1.0, 1.0));
  let unpacked = diag.unpack().unwrap();
  assert!((unpacked - Vec3::splat(1.0).normalize()).length() < 0.02);
}

#[test]
fn transformed_moves_position_and_normal() {
  let mut point = PointCloudPoint::new(Vec3::new(1.0, 0.0, 0.0), [0; 4]);
  point.normal = PackedNormal::from_vec3(Vec3::X);

  // Quarter turn around Z plus translation.
  let xf = Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0))
    * Affine3A::from_rotation_z(std::f32::consts::FRAC_PI_2);
  let moved = point.transformed(&xf);

  assert!((moved.position - Vec3::new(10.0, 1.0, 0.0)).length() < 1e-5);
  assert!((moved.normal.unpack().unwrap() - Vec3::Y).length() < 0.02);
}
