//! PointCloudPoint - the fixed-size sample stored inside octree nodes.
//!
//! Packed for cache density: 12 bytes position, 4 bytes color, 1 byte of
//! flags (visibility, selection, 5-bit classification) and a 3-byte
//! quantized normal, 20 bytes total. Points are owned by value inside the
//! node that currently holds them - no cross-node aliasing.

use glam::{Affine3A, Vec3};

/// How colliding points within the duplicate tolerance are resolved during
/// insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateHandling {
  /// Keep the resident point; the incoming duplicate is dropped.
  Ignore,
  /// Keep the point that arrived first (same outcome as `Ignore`; the
  /// two exist for caller intent and asset round-tripping).
  SelectFirst,
  /// Keep the point with the higher luma.
  SelectBrighter,
}

/// Quantized unit normal with an explicit unset state.
///
/// Components are stored as i8 in [-127, 127]; the all-zero pattern means
/// "no normal assigned yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackedNormal {
  x: i8,
  y: i8,
  z: i8,
}

impl PackedNormal {
  /// The unset normal.
  pub const NONE: Self = Self { x: 0, y: 0, z: 0 };

  /// Quantize a direction. The input does not need to be normalized.
  pub fn from_vec3(v: Vec3) -> Self {
    let n = v.normalize_or_zero();
    Self {
      x: (n.x * 127.0).round() as i8,
      y: (n.y * 127.0).round() as i8,
      z: (n.z * 127.0).round() as i8,
    }
  }

  /// True if a normal has been assigned.
  #[inline]
  pub fn is_set(&self) -> bool {
    *self != Self::NONE
  }

  /// Unpack to a unit vector, or None if unset.
  pub fn unpack(&self) -> Option<Vec3> {
    if self.is_set() {
      Some(
        Vec3::new(self.x as f32, self.y as f32, self.z as f32).normalize_or_zero(),
      )
    } else {
      None
    }
  }
}

const FLAG_VISIBLE: u8 = 1 << 0;
const FLAG_SELECTED: u8 = 1 << 1;
const CLASSIFICATION_SHIFT: u8 = 3;
const CLASSIFICATION_MAX: u8 = 0x1f;

/// A single point sample.
///
/// Equality is structural (all fields).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointCloudPoint {
  /// Position relative to the cloud's local origin.
  pub position: Vec3,
  /// RGBA color / intensity.
  pub color: [u8; 4],
  /// Packed visibility, selection and 5-bit classification id.
  flags: u8,
  /// Optional surface normal.
  pub normal: PackedNormal,
}

impl PointCloudPoint {
  /// Create a visible, unclassified point.
  pub fn new(position: Vec3, color: [u8; 4]) -> Self {
    Self {
      position,
      color,
      flags: FLAG_VISIBLE,
      normal: PackedNormal::NONE,
    }
  }

  /// Create a point with explicit visibility and classification.
  pub fn with_attributes(
    position: Vec3,
    color: [u8; 4],
    visible: bool,
    classification: u8,
  ) -> Self {
    let mut point = Self::new(position, color);
    point.set_visible(visible);
    point.set_classification(classification);
    point
  }

  /// Whether the point participates in rendering and visible-only queries.
  #[inline]
  pub fn is_visible(&self) -> bool {
    self.flags & FLAG_VISIBLE != 0
  }

  /// Set the visibility flag.
  #[inline]
  pub fn set_visible(&mut self, visible: bool) {
    if visible {
      self.flags |= FLAG_VISIBLE;
    } else {
      self.flags &= !FLAG_VISIBLE;
    }
  }

  /// Whether the point is part of the current editor selection.
  #[inline]
  pub fn is_selected(&self) -> bool {
    self.flags & FLAG_SELECTED != 0
  }

  /// Set the selection flag.
  #[inline]
  pub fn set_selected(&mut self, selected: bool) {
    if selected {
      self.flags |= FLAG_SELECTED;
    } else {
      self.flags &= !FLAG_SELECTED;
    }
  }

  /// 5-bit classification id (0-31).
  #[inline]
  pub fn classification(&self) -> u8 {
    self.flags >> CLASSIFICATION_SHIFT
  }

  /// Set the classification id. Values above 31 are truncated.
  #[inline]
  pub fn set_classification(&mut self, classification: u8) {
    self.flags = (self.flags & !(CLASSIFICATION_MAX << CLASSIFICATION_SHIFT))
      | ((classification & CLASSIFICATION_MAX) << CLASSIFICATION_SHIFT);
  }

  /// Perceived brightness per BT.709.
  #[inline]
  pub fn luma(&self) -> f32 {
    0.2126 * self.color[0] as f32 + 0.7152 * self.color[1] as f32 + 0.0722 * self.color[2] as f32
  }

  /// Copy of this point with the position (and normal) mapped to world space.
  pub fn transformed(&self, local_to_world: &Affine3A) -> Self {
    let mut point = *self;
    point.position = local_to_world.transform_point3(self.position);
    if let Some(normal) = self.normal.unpack() {
      point.normal = PackedNormal::from_vec3(local_to_world.transform_vector3(normal));
    }
    point
  }
}

#[cfg(test)]
#[path = "point_test.rs"]
mod point_test;
