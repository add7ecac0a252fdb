//! Bounding primitives used by insertion, queries and LOD culling.

use glam::{Mat4, Vec3};

/// Result of testing a volume against a frustum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
  /// Entirely outside - the whole subtree can be pruned.
  Outside,
  /// Partially inside - children still need testing.
  Intersecting,
  /// Fully inside - deeper tests can be skipped.
  Inside,
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
  /// Minimum corner (inclusive).
  pub min: Vec3,
  /// Maximum corner (inclusive).
  pub max: Vec3,
}

impl Aabb {
  /// Create a new AABB from min and max corners.
  pub fn new(min: Vec3, max: Vec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "AABB min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Create a new AABB from center and half-extents.
  pub fn from_center_extent(center: Vec3, half_extent: Vec3) -> Self {
    Self {
      min: center - half_extent,
      max: center + half_extent,
    }
  }

  /// Smallest box containing both corners of an empty range; grown per point.
  pub fn empty() -> Self {
    Self {
      min: Vec3::splat(f32::INFINITY),
      max: Vec3::splat(f32::NEG_INFINITY),
    }
  }

  /// Grow to include a point.
  #[inline]
  pub fn extend(&mut self, point: Vec3) {
    self.min = self.min.min(point);
    self.max = self.max.max(point);
  }

  /// Center of the box.
  #[inline]
  pub fn center(&self) -> Vec3 {
    (self.min + self.max) * 0.5
  }

  /// Half-extents of the box.
  #[inline]
  pub fn half_extent(&self) -> Vec3 {
    (self.max - self.min) * 0.5
  }

  /// Check if this AABB contains a point (boundary inclusive).
  #[inline]
  pub fn contains_point(&self, point: Vec3) -> bool {
    point.x >= self.min.x
      && point.x <= self.max.x
      && point.y >= self.min.y
      && point.y <= self.max.y
      && point.z >= self.min.z
      && point.z <= self.max.z
  }

  /// Check if this AABB overlaps another.
  #[inline]
  pub fn overlaps(&self, other: &Aabb) -> bool {
    self.min.x <= other.max.x
      && self.max.x >= other.min.x
      && self.min.y <= other.max.y
      && self.max.y >= other.min.y
      && self.min.z <= other.max.z
      && self.max.z >= other.min.z
  }

  /// Check if `other` lies entirely inside this box.
  #[inline]
  pub fn contains_aabb(&self, other: &Aabb) -> bool {
    self.contains_point(other.min) && self.contains_point(other.max)
  }
}

/// Bounding sphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
  pub center: Vec3,
  pub radius: f32,
}

impl Sphere {
  pub fn new(center: Vec3, radius: f32) -> Self {
    Self { center, radius }
  }

  #[inline]
  pub fn contains_point(&self, point: Vec3) -> bool {
    self.center.distance_squared(point) <= self.radius * self.radius
  }

  /// Check if `other` lies entirely inside this sphere.
  #[inline]
  pub fn contains_sphere(&self, other: &Sphere) -> bool {
    if other.radius > self.radius {
      return false;
    }
    let margin = self.radius - other.radius;
    self.center.distance_squared(other.center) <= margin * margin
  }

  /// Sphere vs AABB overlap via closest-point distance.
  #[inline]
  pub fn overlaps_aabb(&self, aabb: &Aabb) -> bool {
    let closest = self.center.clamp(aabb.min, aabb.max);
    self.center.distance_squared(closest) <= self.radius * self.radius
  }
}

/// Ray with unit direction.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
  pub origin: Vec3,
  pub direction: Vec3,
}

impl Ray {
  /// Create a ray; the direction is normalized.
  pub fn new(origin: Vec3, direction: Vec3) -> Self {
    Self {
      origin,
      direction: direction.normalize_or_zero(),
    }
  }

  /// Slab test against an AABB.
  pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
    let inv = self.direction.recip();
    let t0 = (aabb.min - self.origin) * inv;
    let t1 = (aabb.max - self.origin) * inv;
    let t_min = t0.min(t1);
    let t_max = t0.max(t1);
    let near = t_min.max_element();
    let far = t_max.min_element();
    far >= near.max(0.0)
  }

  /// Squared distance from a point to the ray (clamped to the origin side).
  #[inline]
  pub fn distance_squared_to_point(&self, point: Vec3) -> f32 {
    let to_point = point - self.origin;
    let t = to_point.dot(self.direction).max(0.0);
    (to_point - self.direction * t).length_squared()
  }
}

/// Plane in normal/distance form: `dot(normal, p) + d = 0`.
#[derive(Clone, Copy, Debug)]
pub struct Plane {
  pub normal: Vec3,
  pub d: f32,
}

impl Plane {
  /// Signed distance from a point to the plane (positive on the normal side).
  #[inline]
  pub fn signed_distance(&self, point: Vec3) -> f32 {
    self.normal.dot(point) + self.d
  }

  fn normalized(normal: Vec3, d: f32) -> Self {
    let len = normal.length();
    Self {
      normal: normal / len,
      d: d / len,
    }
  }
}

/// View frustum as six inward-facing half-spaces.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
  planes: [Plane; 6],
}

impl Frustum {
  /// Extract planes from a view-projection matrix (Gribb/Hartmann).
  pub fn from_view_projection(view_proj: &Mat4) -> Self {
    let r0 = view_proj.row(0);
    let r1 = view_proj.row(1);
    let r2 = view_proj.row(2);
    let r3 = view_proj.row(3);

    let extract = |row: glam::Vec4, sign: f32| {
      let v = r3 + row * sign;
      Plane::normalized(Vec3::new(v.x, v.y, v.z), v.w)
    };

    Self {
      planes: [
        extract(r0, 1.0),  // left
        extract(r0, -1.0), // right
        extract(r1, 1.0),  // bottom
        extract(r1, -1.0), // top
        extract(r2, 1.0),  // near
        extract(r2, -1.0), // far
      ],
    }
  }

  /// Build from explicit planes (used by tests and custom viewports).
  pub fn from_planes(planes: [Plane; 6]) -> Self {
    Self { planes }
  }

  /// Classify a sphere against the frustum.
  pub fn classify_sphere(&self, center: Vec3, radius: f32) -> Containment {
    let mut inside = true;
    for plane in &self.planes {
      let distance = plane.signed_distance(center);
      if distance < -radius {
        return Containment::Outside;
      }
      if distance < radius {
        inside = false;
      }
    }
    if inside {
      Containment::Inside
    } else {
      Containment::Intersecting
    }
  }

  /// True if a point lies inside all six planes.
  pub fn contains_point(&self, point: Vec3) -> bool {
    self
      .planes
      .iter()
      .all(|plane| plane.signed_distance(point) >= 0.0)
  }
}

#[cfg(test)]
#[path = "bounds_test.rs"]
mod bounds_test;
