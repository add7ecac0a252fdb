//! Collision mesh storage.
//!
//! The index does not triangulate point data itself; the hosting
//! application supplies a builder and the resulting mesh is stored
//! alongside the tree for physics queries.

use glam::Vec3;

/// An indexed triangle mesh produced by an external collision builder.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
  pub vertices: Vec<Vec3>,
  pub triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
  pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
    Self {
      vertices,
      triangles,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.triangles.is_empty()
  }

  pub fn num_triangles(&self) -> usize {
    self.triangles.len()
  }
}
