//! Disk-backed sparse octree for massive point-cloud datasets.
//!
//! The tree stores at most one point per occupied virtual-grid cell per
//! node, giving an implicit, distance-fair LOD at every depth. Nodes live
//! in a slab arena and are addressed by [`NodeId`]; per-depth geometry is
//! shared through [`LevelData`] and per-depth atomic counters answer
//! count/size queries without a full walk.
//!
//! # Module Structure
//!
//! - [`bounds`]: culling primitives (AABB, sphere, ray, frustum)
//! - [`level`]: per-depth shared geometry
//! - [`node`]: `OctreeNode` and the arena id type
//! - [`insert`]: grid-based insertion and deduplication
//! - [`query`]: lazy spatial query iterators
//! - [`visibility`]: visibility/color edits with visible-first ordering
//! - [`streaming`]: bulk-store backend and node lifetime management

pub mod bounds;
pub mod insert;
pub mod level;
pub mod node;
pub mod query;
pub mod streaming;
pub mod visibility;

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Mutex, Weak};

use glam::Vec3;

use crate::collision::TriangleMesh;
use crate::error::{PointCloudError, Result};
use crate::traversal::TraversalOctree;

pub use bounds::{Aabb, Containment, Frustum, Plane, Ray, Sphere};
pub use level::LevelData;
pub use node::{NodeId, OctreeNode};
pub use streaming::{BulkStore, MemoryStore, StreamingStage};

use slab::Slab;

/// Tuning knobs shared by every node of one tree.
#[derive(Clone, Copy, Debug)]
pub struct OctreeSettings {
  /// Deepest allowed node depth.
  pub max_depth: u8,
  /// Overflow-bucket size above which a child node is created.
  pub max_bucket_size: usize,
  /// Virtual grid resolution R (each node samples an R^3 lattice).
  pub grid_resolution: usize,
  /// Two points closer than this are considered duplicates.
  pub max_distance_for_duplicate: f32,
}

impl Default for OctreeSettings {
  fn default() -> Self {
    Self {
      max_depth: 31,
      max_bucket_size: 200,
      grid_resolution: 96,
      max_distance_for_duplicate: 0.01,
    }
  }
}

/// The octree container.
///
/// Owns the node arena, per-depth shared geometry, per-depth atomic
/// counters, the streaming backend bookkeeping and the registry of live
/// traversal snapshots. Structural mutation happens through `&mut self`;
/// concurrent access is serialized by the owning asset's data lock.
pub struct Octree {
  nodes: Slab<OctreeNode>,
  root: NodeId,
  settings: OctreeSettings,
  levels: Vec<LevelData>,

  /// Per-depth point counters. Kept atomic so stats reads never need to
  /// walk the tree.
  point_count: Vec<AtomicI64>,
  /// Per-depth node counters; also bound `num_lods`.
  node_count: Vec<AtomicU32>,

  /// Extent of the actual point data (may be tighter than the node grid).
  extent: Vec3,
  /// Accumulated re-centering offset, kept so world placement survives
  /// bounds refreshes.
  location_offset: Vec3,

  /// Live traversal snapshots to invalidate on structural mutation.
  traversals: Mutex<Vec<Weak<TraversalOctree>>>,

  pub(crate) streaming: StreamingStage,
  fully_loaded: bool,

  collision: Option<TriangleMesh>,
}

impl Octree {
  /// Create an uninitialized tree. [`Octree::initialize`] must be called
  /// with a valid extent before insertion.
  pub fn new(settings: OctreeSettings) -> Self {
    let mut nodes = Slab::new();
    let root = NodeId(nodes.insert(OctreeNode::new(0, 0, Vec3::ZERO)));

    let depths = settings.max_depth as usize + 1;
    let node_count: Vec<AtomicU32> = (0..depths).map(|_| AtomicU32::new(0)).collect();
    node_count[0].store(1, Ordering::Relaxed);

    Self {
      nodes,
      root,
      settings,
      levels: Vec::new(),
      point_count: (0..depths).map(|_| AtomicI64::new(0)).collect(),
      node_count,
      extent: Vec3::ZERO,
      location_offset: Vec3::ZERO,
      traversals: Mutex::new(Vec::new()),
      streaming: StreamingStage::new(),
      fully_loaded: false,
      collision: None,
    }
  }

  /// (Re)initialize the tree for a new root extent.
  ///
  /// Fails with [`PointCloudError::InvalidBounds`] on a degenerate extent,
  /// leaving the tree empty. Pre-computes the shared per-depth geometry
  /// from the largest axis so every node is a uniform cube.
  pub fn initialize(&mut self, extent: Vec3) -> Result<()> {
    if !(extent.x > 0.0 && extent.y > 0.0 && extent.z > 0.0) {
      return Err(PointCloudError::InvalidBounds(extent));
    }

    self.extent = extent;
    let uniform = extent.max_element();

    self.levels = (0..=self.settings.max_depth)
      .map(|depth| {
        LevelData::new(
          uniform / 2.0_f32.powi(depth as i32),
          self.settings.grid_resolution,
        )
      })
      .collect();

    self.empty(true);
    self.fully_loaded = false;
    Ok(())
  }

  /// Destroy all point data. With `destroy_nodes` the whole hierarchy is
  /// rebuilt down to a fresh root; otherwise only the buffers are cleared.
  pub fn empty(&mut self, destroy_nodes: bool) {
    if destroy_nodes {
      self.nodes.clear();
      self.root = NodeId(self.nodes.insert(OctreeNode::new(0, 0, Vec3::ZERO)));

      for count in &self.node_count {
        count.store(0, Ordering::Relaxed);
      }
      self.node_count[0].store(1, Ordering::Relaxed);

      self.streaming.reset();
      self.invalidate_traversals();
    } else {
      for (_, node) in self.nodes.iter_mut() {
        node.set_points(Vec::new());
      }
      self.invalidate_traversals();
    }

    for count in &self.point_count {
      count.store(0, Ordering::Relaxed);
    }
  }

  /// Id of the root node.
  #[inline]
  pub fn root_id(&self) -> NodeId {
    self.root
  }

  /// Borrow a node. Panics on a stale id - ids never outlive the arena
  /// entry short of `empty(true)`.
  #[inline]
  pub fn node(&self, id: NodeId) -> &OctreeNode {
    &self.nodes[id.0]
  }

  /// Mutably borrow a node.
  #[inline]
  pub fn node_mut(&mut self, id: NodeId) -> &mut OctreeNode {
    &mut self.nodes[id.0]
  }

  pub(crate) fn arena_mut(&mut self) -> &mut Slab<OctreeNode> {
    &mut self.nodes
  }

  /// Settings this tree was built with.
  #[inline]
  pub fn settings(&self) -> &OctreeSettings {
    &self.settings
  }

  /// Shared geometry for a depth. Panics if the tree is uninitialized.
  #[inline]
  pub fn level(&self, depth: u8) -> &LevelData {
    &self.levels[depth as usize]
  }

  /// True once `initialize` succeeded.
  #[inline]
  pub fn is_initialized(&self) -> bool {
    !self.levels.is_empty()
  }

  /// Extent of the stored point data.
  #[inline]
  pub fn extent(&self) -> Vec3 {
    self.extent
  }

  /// Accumulated re-centering offset applied by bounds refreshes.
  #[inline]
  pub fn location_offset(&self) -> Vec3 {
    self.location_offset
  }

  pub(crate) fn set_location_offset(&mut self, offset: Vec3) {
    self.location_offset = offset;
  }

  /// Bounding box of the node grid (cloud-local).
  pub fn grid_bounds(&self) -> Aabb {
    let extent = self
      .levels
      .first()
      .map(|level| level.extent)
      .unwrap_or(0.0);
    Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(extent))
  }

  /// Total point count, summed from the per-depth counters.
  ///
  /// Every depth is counted: removals can legally empty a middle depth
  /// while deeper nodes keep their points.
  pub fn num_points(&self) -> i64 {
    self
      .point_count
      .iter()
      .map(|count| count.load(Ordering::Relaxed).max(0))
      .sum()
  }

  /// Total node count, summed from the per-depth counters.
  pub fn num_nodes(&self) -> u32 {
    let mut total = 0;
    for count in &self.node_count {
      let n = count.load(Ordering::Relaxed);
      if n > 0 {
        total += n;
      } else {
        break;
      }
    }
    total
  }

  /// Number of populated depths. The tree is always built outward from
  /// the root, so the first depth with zero nodes terminates the scan.
  pub fn num_lods(&self) -> u8 {
    let mut lods = 0;
    for count in &self.node_count {
      if count.load(Ordering::Relaxed) == 0 {
        break;
      }
      lods += 1;
    }
    lods
  }

  /// Per-depth point counts (used by traversal level weights).
  pub(crate) fn point_counts_per_depth(&self) -> Vec<i64> {
    self
      .point_count
      .iter()
      .map(|count| count.load(Ordering::Relaxed).max(0))
      .collect()
  }

  pub(crate) fn add_point_count(&self, depth: u8, delta: i64) {
    self.point_count[depth as usize].fetch_add(delta, Ordering::Relaxed);
  }

  pub(crate) fn add_node_count(&self, depth: u8, delta: u32) {
    self.node_count[depth as usize].fetch_add(delta, Ordering::Relaxed);
  }

  /// Visible point count across resident nodes.
  pub fn num_visible_points(&self) -> i64 {
    self
      .nodes
      .iter()
      .map(|(_, node)| node.num_visible_points() as i64)
      .sum()
  }

  /// Bytes held by the structure plus resident point buffers.
  pub fn allocated_size(&self) -> usize {
    self.structure_size()
      + self
        .nodes
        .iter()
        .map(|(_, node)| {
          node.points().map_or(0, |points| {
            points.len() * std::mem::size_of::<crate::point::PointCloudPoint>()
          })
        })
        .sum::<usize>()
  }

  /// Bytes held by the structure alone (nodes, levels, counters).
  pub fn structure_size(&self) -> usize {
    std::mem::size_of::<Self>()
      + self.nodes.capacity() * std::mem::size_of::<OctreeNode>()
      + self.levels.capacity() * std::mem::size_of::<LevelData>()
      + self.point_count.capacity() * std::mem::size_of::<AtomicI64>()
      + self.node_count.capacity() * std::mem::size_of::<AtomicU32>()
  }

  /// Average point spacing, weighted by per-depth population.
  pub fn estimated_point_spacing(&self) -> f32 {
    let total = self.num_points();
    if total <= 0 {
      return 0.0;
    }
    let mut spacing = 0.0;
    for (depth, count) in self.point_count.iter().enumerate() {
      let n = count.load(Ordering::Relaxed);
      if n <= 0 {
        continue;
      }
      spacing += self.levels[depth].grid_cell_size * n as f32 / total as f32;
    }
    spacing
  }

  /// Breadth-first ids of every node in the tree.
  pub fn node_ids(&self) -> Vec<NodeId> {
    let mut ids = Vec::with_capacity(self.nodes.len());
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(self.root);
    while let Some(id) = queue.pop_front() {
      ids.push(id);
      for child in self.nodes[id.0].children.iter().flatten() {
        queue.push_back(*child);
      }
    }
    ids
  }

  /// Deepest depth that actually has nodes.
  pub fn max_populated_depth(&self) -> u8 {
    self.num_lods().saturating_sub(1)
  }

  /// Register a traversal snapshot for invalidation broadcasts.
  pub fn register_traversal(&self, traversal: &std::sync::Arc<TraversalOctree>) {
    let mut traversals = self.traversals.lock().unwrap();
    traversals.push(std::sync::Arc::downgrade(traversal));
  }

  /// Flip every live traversal snapshot to invalid. Called by every
  /// structural mutation before it returns.
  pub fn invalidate_traversals(&self) {
    let mut traversals = self.traversals.lock().unwrap();
    traversals.retain(|weak| match weak.upgrade() {
      Some(traversal) => {
        traversal.invalidate();
        true
      }
      None => false,
    });
  }

  /// Number of live traversal snapshots (stale entries pruned).
  pub fn num_registered_traversals(&self) -> usize {
    let mut traversals = self.traversals.lock().unwrap();
    traversals.retain(|weak| weak.upgrade().is_some());
    traversals.len()
  }

  /// Recompute the point extent and re-center the cloud around its
  /// centroid, accumulating the shift into `location_offset`.
  pub fn refresh_bounds(&mut self) {
    let mut bounds = Aabb::empty();
    let mut any = false;
    for (_, node) in self.nodes.iter() {
      if let Some(points) = node.points() {
        for point in points {
          bounds.extend(point.position);
          any = true;
        }
      }
    }

    if !any {
      self.extent = Vec3::ZERO;
      return;
    }

    self.extent = bounds.half_extent();
    let offset = bounds.center();

    if offset.length_squared() > 0.01 {
      self.location_offset += offset;
      for (_, node) in self.nodes.iter_mut() {
        node.center -= offset;
        if let Some(points) = node.points_mut() {
          for point in points {
            point.position -= offset;
          }
        }
      }
    }
  }

  /// Build and store a collision mesh through an external builder.
  ///
  /// The builder is the pure triangulation function supplied by the
  /// hosting application; the index only stores its output.
  pub fn build_collision_with<F>(&mut self, accuracy: f32, visible_only: bool, builder: F)
  where
    F: FnOnce(&Octree, f32, bool) -> TriangleMesh,
  {
    let mesh = builder(self, accuracy, visible_only);
    self.collision = Some(mesh);
  }

  /// The stored collision mesh, if built.
  pub fn collision(&self) -> Option<&TriangleMesh> {
    self.collision.as_ref()
  }

  /// Drop the stored collision mesh.
  pub fn remove_collision(&mut self) {
    self.collision = None;
  }

  pub(crate) fn is_fully_loaded(&self) -> bool {
    self.fully_loaded
  }

  pub(crate) fn set_fully_loaded(&mut self, loaded: bool) {
    self.fully_loaded = loaded;
  }
}
