//! The point cloud asset.
//!
//! A [`PointCloud`] owns one octree behind a reader-writer lock and a
//! bulk store for evicted buffers. Long-running whole-cloud operations
//! (imports, merges, normal estimation) additionally take a processing
//! lock: a second such operation fails fast with
//! [`PointCloudError::Busy`] instead of queueing behind the first.
//! Frame-critical readers use the try variants and skip a frame rather
//! than stall.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::Vec3;
use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::collision::TriangleMesh;
use crate::error::{PointCloudError, Result};
use crate::normals::NormalsConfig;
use crate::octree::{Aabb, BulkStore, MemoryStore, Octree, OctreeSettings};
use crate::point::{DuplicateHandling, PointCloudPoint};

/// Points inserted per write-lock acquisition, letting readers interleave
/// with a long import.
const INSERT_BATCH: usize = 65_536;

static NEXT_CLOUD_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique cloud identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloudId(u64);

impl CloudId {
  fn next() -> Self {
    Self(NEXT_CLOUD_ID.fetch_add(1, Ordering::Relaxed))
  }
}

/// An out-of-core point cloud.
pub struct PointCloud {
  id: CloudId,
  octree: RwLock<Octree>,
  store: Arc<dyn BulkStore>,
  processing: Mutex<()>,
}

impl std::fmt::Debug for PointCloud {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PointCloud").field("id", &self.id).finish_non_exhaustive()
  }
}

impl PointCloud {
  /// Create an empty cloud backed by an in-memory store.
  pub fn new(settings: OctreeSettings) -> Self {
    Self::with_store(settings, Arc::new(MemoryStore::new()))
  }

  /// Create an empty cloud with a caller-supplied bulk store.
  pub fn with_store(settings: OctreeSettings, store: Arc<dyn BulkStore>) -> Self {
    Self {
      id: CloudId::next(),
      octree: RwLock::new(Octree::new(settings)),
      store,
      processing: Mutex::new(()),
    }
  }

  /// Build a cloud from a loose point set.
  ///
  /// Bounds are computed from the data and the cloud is re-centered
  /// around them, recording the shift as the location offset.
  pub fn from_points(points: &[PointCloudPoint], settings: OctreeSettings) -> Result<Self> {
    let cloud = Self::new(settings);

    let mut bounds = Aabb::empty();
    let mut any = false;
    for point in points {
      if point.position.is_finite() {
        bounds.extend(point.position);
        any = true;
      }
    }
    if !any {
      return Err(PointCloudError::InvalidBounds(Vec3::ZERO));
    }

    let center = bounds.center();
    // Degenerate axes still need a positive extent for the node grid.
    let extent = bounds.half_extent().max(Vec3::splat(1.0e-3));

    {
      let mut octree = cloud.write();
      octree.initialize(extent)?;
      octree.set_location_offset(center);
    }
    cloud.insert_points(points, DuplicateHandling::Ignore, None)?;
    Ok(cloud)
  }

  pub fn id(&self) -> CloudId {
    self.id
  }

  /// The bulk store backing this cloud's streaming.
  pub fn store(&self) -> &Arc<dyn BulkStore> {
    &self.store
  }

  pub fn read(&self) -> RwLockReadGuard<'_, Octree> {
    self.octree.read().unwrap()
  }

  /// Non-blocking read access; None when a writer holds the tree.
  pub fn try_read(&self) -> Option<RwLockReadGuard<'_, Octree>> {
    self.octree.try_read().ok()
  }

  pub fn write(&self) -> RwLockWriteGuard<'_, Octree> {
    self.octree.write().unwrap()
  }

  /// Non-blocking write access; None when the tree is in use.
  pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, Octree>> {
    self.octree.try_write().ok()
  }

  /// Initialize the octree for a known extent.
  pub fn initialize(&self, extent: Vec3) -> Result<()> {
    self.write().initialize(extent)
  }

  fn try_processing(&self) -> Result<MutexGuard<'_, ()>> {
    self.processing.try_lock().map_err(|_| PointCloudError::Busy)
  }

  /// Insert points, batched so readers interleave with the import.
  ///
  /// Positions are interpreted in the cloud's original coordinate frame;
  /// the stored location offset is compensated automatically. On
  /// cancellation the cloud is emptied but remains initialized and
  /// usable.
  pub fn insert_points(
    &self,
    points: &[PointCloudPoint],
    duplicate_handling: DuplicateHandling,
    token: Option<&CancellationToken>,
  ) -> Result<()> {
    let _processing = self.try_processing()?;
    self.insert_batches(points, duplicate_handling, token)
  }

  fn insert_batches(
    &self,
    points: &[PointCloudPoint],
    duplicate_handling: DuplicateHandling,
    token: Option<&CancellationToken>,
  ) -> Result<()> {
    let filtered: Vec<PointCloudPoint> = points
      .par_iter()
      .copied()
      .filter(|point| point.position.is_finite())
      .collect();

    for batch in filtered.chunks(INSERT_BATCH) {
      if let Some(token) = token {
        if token.is_cancelled() {
          self.write().empty(true);
          return Err(PointCloudError::Cancelled);
        }
      }
      let mut octree = self.write();
      let translation = -octree.location_offset();
      octree.insert_points(batch, duplicate_handling, translation)?;
    }
    Ok(())
  }

  /// Merge another cloud's points into this one.
  ///
  /// The node grid is fixed at initialization, so the merged result is
  /// rebuilt over the union bounds: both clouds are fully loaded, their
  /// points gathered in their original frames, and everything re-inserted
  /// into a re-initialized tree.
  pub fn merge(
    &self,
    other: &PointCloud,
    duplicate_handling: DuplicateHandling,
    token: Option<&CancellationToken>,
  ) -> Result<()> {
    let _processing = self.try_processing()?;

    let mut points = self.gather_world_points()?;
    points.extend(other.gather_world_points()?);

    let mut bounds = Aabb::empty();
    for point in &points {
      bounds.extend(point.position);
    }
    let extent = bounds.half_extent().max(Vec3::splat(1.0e-3));

    {
      let mut octree = self.write();
      octree.initialize(extent)?;
      octree.set_location_offset(bounds.center());
    }
    self.insert_batches(&points, duplicate_handling, token)
  }

  /// All points of this cloud, loaded and shifted back into the original
  /// coordinate frame.
  fn gather_world_points(&self) -> Result<Vec<PointCloudPoint>> {
    let mut octree = self.write();
    octree.load_all_nodes(self.store.as_ref())?;
    let offset = octree.location_offset();
    Ok(
      octree
        .node_ids()
        .iter()
        .flat_map(|&id| octree.node(id).points().unwrap_or(&[]).to_vec())
        .map(|mut point| {
          point.position += offset;
          point
        })
        .collect(),
    )
  }

  /// Estimate normals for every point in the cloud.
  pub fn calculate_normals(
    &self,
    config: &NormalsConfig,
    token: Option<&CancellationToken>,
  ) -> Result<()> {
    let _processing = self.try_processing()?;
    let mut octree = self.write();
    octree.load_all_nodes(self.store.as_ref())?;
    octree.calculate_normals(config, token)
  }

  /// Build and store a collision mesh through an external builder.
  pub fn build_collision_with<F>(
    &self,
    accuracy: f32,
    visible_only: bool,
    builder: F,
  ) -> Result<()>
  where
    F: FnOnce(&Octree, f32, bool) -> TriangleMesh,
  {
    let _processing = self.try_processing()?;
    let mut octree = self.write();
    octree.load_all_nodes(self.store.as_ref())?;
    octree.build_collision_with(accuracy, visible_only, builder);
    Ok(())
  }

  /// Total point count.
  pub fn num_points(&self) -> i64 {
    self.read().num_points()
  }

  /// World-frame bounds of the stored data.
  pub fn bounds(&self) -> Aabb {
    let octree = self.read();
    let offset = octree.location_offset();
    Aabb::from_center_extent(offset, octree.extent())
  }
}

#[cfg(test)]
#[path = "cloud_test.rs"]
mod cloud_test;
