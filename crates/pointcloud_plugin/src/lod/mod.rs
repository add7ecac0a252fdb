//! Frame-driven LOD management.
//!
//! A [`LodManager`] owns the registry of cloud instances visible to the
//! renderer, the shared [`PointBudget`], and the per-frame pipeline:
//! refresh traversal snapshots, select nodes under the budget, feed the
//! streaming queues, and evict what expired. The manager never blocks on
//! a busy cloud; an instance whose tree is write-locked simply sits out
//! the frame and is retried on the next one.
//!
//! # Module Structure
//!
//! - [`budget`]: adaptive global point budget
//! - [`view`]: viewport data, instance tuning, clipping volumes
//! - [`selection`]: per-frame node selection

pub mod budget;
pub mod selection;
pub mod view;

use std::sync::Arc;

use glam::{Affine3A, Vec3};
use web_time::Instant;

#[cfg(feature = "tracing")]
use tracing::{debug, info_span};

pub use budget::{BudgetConfig, PointBudget};
pub use selection::{select_nodes, RenderFrame, RenderNode, SelectionInput};
pub use view::{ClipMode, ClippingVolume, InstanceConfig, ViewData};

use crate::cloud::PointCloud;
use crate::traversal::TraversalOctree;

/// Identifies a registered cloud instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle(u64);

struct Instance {
  handle: InstanceHandle,
  cloud: Arc<PointCloud>,
  transform: Affine3A,
  config: InstanceConfig,
  traversal: Option<Arc<TraversalOctree>>,
}

/// Manager-level tuning.
#[derive(Clone, Copy, Debug)]
pub struct LodManagerConfig {
  pub budget: BudgetConfig,
  /// Seconds a node stays resident after it was last selected.
  pub node_lifetime: f64,
}

impl Default for LodManagerConfig {
  fn default() -> Self {
    Self {
      budget: BudgetConfig::default(),
      node_lifetime: 5.0,
    }
  }
}

/// Per-frame LOD orchestrator. One per rendering context.
pub struct LodManager {
  instances: Vec<Instance>,
  next_handle: u64,
  budget: PointBudget,
  node_lifetime: f64,
  epoch: Instant,
  last_frame: Option<Instant>,
  prev_views: Vec<(Vec3, Vec3)>,
}

impl LodManager {
  pub fn new(config: LodManagerConfig) -> Self {
    Self {
      instances: Vec::new(),
      next_handle: 0,
      budget: PointBudget::new(config.budget),
      node_lifetime: config.node_lifetime,
      epoch: Instant::now(),
      last_frame: None,
      prev_views: Vec::new(),
    }
  }

  /// Register a cloud instance for rendering.
  pub fn register(
    &mut self,
    cloud: Arc<PointCloud>,
    transform: Affine3A,
    config: InstanceConfig,
  ) -> InstanceHandle {
    let handle = InstanceHandle(self.next_handle);
    self.next_handle += 1;
    self.instances.push(Instance {
      handle,
      cloud,
      transform,
      config,
      traversal: None,
    });
    handle
  }

  /// Remove an instance. Unknown handles are ignored.
  pub fn unregister(&mut self, handle: InstanceHandle) {
    self.instances.retain(|instance| instance.handle != handle);
  }

  /// Move an instance; its snapshot is rebuilt on the next frame.
  pub fn set_transform(&mut self, handle: InstanceHandle, transform: Affine3A) {
    if let Some(instance) = self.instance_mut(handle) {
      instance.transform = transform;
      instance.traversal = None;
    }
  }

  /// Update an instance's LOD tuning.
  pub fn set_config(&mut self, handle: InstanceHandle, config: InstanceConfig) {
    if let Some(instance) = self.instance_mut(handle) {
      instance.config = config;
    }
  }

  /// Handle of the instance a [`RenderNode::instance`] index refers to.
  pub fn instance_handle(&self, index: usize) -> Option<InstanceHandle> {
    self.instances.get(index).map(|instance| instance.handle)
  }

  /// Current global point budget.
  pub fn point_budget(&self) -> u32 {
    self.budget.current()
  }

  pub fn num_instances(&self) -> usize {
    self.instances.len()
  }

  /// Run one frame: snapshot, select, stream, evict.
  ///
  /// Returns the nodes to render this frame. `RenderNode::instance`
  /// indexes this manager's instance list; resolve it through
  /// [`LodManager::instance_handle`].
  pub fn process_frame(&mut self, views: &[ViewData]) -> RenderFrame {
    #[cfg(feature = "tracing")]
    let _span = info_span!("process_frame", views = views.len()).entered();

    let now = Instant::now();
    let now_secs = now.duration_since(self.epoch).as_secs_f64();
    if let Some(last) = self.last_frame {
      let frame_ms = now.duration_since(last).as_secs_f64() * 1_000.0;
      self.budget.record_frame(frame_ms as f32);
    }
    self.last_frame = Some(now);

    let camera_static = self.views_match(views);
    self.prev_views = views
      .iter()
      .map(|view| (view.origin, view.direction))
      .collect();

    self.refresh_traversals();

    // Instances without a usable snapshot sit the frame out.
    let active: Vec<usize> = self
      .instances
      .iter()
      .enumerate()
      .filter(|(_, instance)| instance.traversal.is_some())
      .map(|(index, _)| index)
      .collect();
    let inputs: Vec<SelectionInput<'_>> = active
      .iter()
      .map(|&index| {
        let instance = &self.instances[index];
        SelectionInput {
          traversal: instance.traversal.as_deref().unwrap(),
          config: &instance.config,
        }
      })
      .collect();

    let mut frame = select_nodes(&inputs, views, self.budget.current());
    drop(inputs);
    for node in &mut frame.nodes {
      node.instance = active[node.instance];
    }

    self.drive_streaming(&frame, now_secs);

    self.budget.adapt(frame.demand, camera_static);

    #[cfg(feature = "tracing")]
    debug!(
      nodes = frame.nodes.len(),
      points = frame.total_points,
      budget = self.budget.current(),
      "frame selected"
    );

    frame
  }

  fn instance_mut(&mut self, handle: InstanceHandle) -> Option<&mut Instance> {
    self
      .instances
      .iter_mut()
      .find(|instance| instance.handle == handle)
  }

  fn views_match(&self, views: &[ViewData]) -> bool {
    if self.prev_views.len() != views.len() {
      return false;
    }
    self
      .prev_views
      .iter()
      .zip(views)
      .all(|((origin, direction), view)| {
        origin.distance_squared(view.origin) < 1.0e-6
          && direction.distance_squared(view.direction) < 1.0e-8
      })
  }

  /// Rebuild stale traversal snapshots where the tree can be read without
  /// blocking.
  fn refresh_traversals(&mut self) {
    for instance in &mut self.instances {
      let stale = instance
        .traversal
        .as_ref()
        .map_or(true, |traversal| !traversal.is_valid());
      if !stale {
        continue;
      }
      let Some(octree) = instance.cloud.try_read() else {
        // Keep skipping frames until the writer is done.
        instance.traversal = None;
        continue;
      };
      let local_to_world =
        instance.transform * Affine3A::from_translation(octree.location_offset());
      instance.traversal = Some(TraversalOctree::build(&octree, &local_to_world));
    }
  }

  /// Queue selected nodes, dispatch loads and evict expired buffers.
  fn drive_streaming(&mut self, frame: &RenderFrame, now_secs: f64) {
    let expires_at = now_secs + self.node_lifetime;
    for (index, instance) in self.instances.iter().enumerate() {
      let Some(mut octree) = instance.cloud.try_write() else {
        continue;
      };
      for node in frame.nodes.iter().filter(|node| node.instance == index) {
        octree.queue_node(node.node, expires_at);
      }
      octree.stream_queued_nodes(instance.cloud.store());
      octree.drain_streamed_nodes();
      if let Err(_err) = octree.unload_expired_nodes(now_secs, instance.cloud.store().as_ref()) {
        #[cfg(feature = "tracing")]
        debug!(error = %_err, "eviction save failed, keeping buffers resident");
      }
    }
  }
}
