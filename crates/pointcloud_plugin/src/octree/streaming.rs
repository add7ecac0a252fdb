//! Node streaming and lifetime management.
//!
//! Point buffers can be evicted to a [`BulkStore`] and reloaded on demand.
//! Loads are queued during LOD selection, dispatched in a batch onto the
//! rayon pool, and applied when their results drain back over a channel.
//! A node is never loaded twice concurrently: queueing an already-pending
//! node only extends its lifetime. Eviction saves dirty buffers back to
//! the store first, so no edit is lost.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

#[cfg(feature = "tracing")]
use tracing::warn;

use super::node::NodeId;
use super::Octree;
use crate::error::{PointCloudError, Result};
use crate::point::PointCloudPoint;

/// Backend holding evicted point buffers, keyed by node index.
///
/// Implementations must be safe to call from rayon workers.
pub trait BulkStore: Send + Sync {
  /// Persist a node's buffer.
  fn save(&self, node: usize, points: &[PointCloudPoint]) -> Result<()>;
  /// Load a node's buffer.
  fn load(&self, node: usize) -> Result<Vec<PointCloudPoint>>;
  /// Drop a node's stored buffer.
  fn remove(&self, node: usize);
}

/// In-memory [`BulkStore`], the default backend and the test double.
#[derive(Default)]
pub struct MemoryStore {
  buffers: Mutex<HashMap<usize, Vec<PointCloudPoint>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored buffers.
  pub fn len(&self) -> usize {
    self.buffers.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl BulkStore for MemoryStore {
  fn save(&self, node: usize, points: &[PointCloudPoint]) -> Result<()> {
    self.buffers.lock().unwrap().insert(node, points.to_vec());
    Ok(())
  }

  fn load(&self, node: usize) -> Result<Vec<PointCloudPoint>> {
    self
      .buffers
      .lock()
      .unwrap()
      .get(&node)
      .cloned()
      .ok_or_else(|| PointCloudError::StreamFailure {
        node,
        reason: "no stored buffer".into(),
      })
  }

  fn remove(&self, node: usize) {
    self.buffers.lock().unwrap().remove(&node);
  }
}

struct LoadResult {
  generation: u64,
  node: NodeId,
  outcome: Result<Vec<PointCloudPoint>>,
}

/// Bookkeeping for in-flight and queued node loads.
pub struct StreamingStage {
  tx: Sender<LoadResult>,
  rx: Receiver<LoadResult>,
  queued: Vec<NodeId>,
  in_flight: usize,
  /// Bumped on reset so results from a torn-down tree are discarded.
  generation: u64,
}

impl StreamingStage {
  pub(crate) fn new() -> Self {
    let (tx, rx) = crossbeam_channel::unbounded();
    Self {
      tx,
      rx,
      queued: Vec::new(),
      in_flight: 0,
      generation: 0,
    }
  }

  /// Forget queued work and orphan any in-flight loads.
  pub(crate) fn reset(&mut self) {
    self.queued.clear();
    self.in_flight = 0;
    self.generation += 1;
  }

  /// True while a dispatched batch has not fully drained.
  pub fn is_busy(&self) -> bool {
    self.in_flight > 0
  }

  /// Number of nodes waiting for dispatch.
  pub fn num_queued(&self) -> usize {
    self.queued.len()
  }
}

impl Octree {
  /// Request a node's buffer, extending its lifetime to `expires_at`.
  ///
  /// Resident and already-pending nodes are not queued again; only their
  /// lifetime grows. Lifetimes never shrink here, a node wanted by two
  /// viewports keeps the longer one.
  pub fn queue_node(&mut self, id: NodeId, expires_at: f64) {
    let node = self.node_mut(id);
    node.lifetime = node.lifetime.max(expires_at);
    if node.has_data() || node.pending {
      return;
    }
    node.pending = true;
    self.streaming.queued.push(id);
  }

  /// Dispatch queued loads onto the rayon pool.
  ///
  /// Skipped while a previous batch is still in flight, so at most one
  /// batch streams at a time.
  pub fn stream_queued_nodes(&mut self, store: &Arc<dyn BulkStore>) {
    if self.streaming.is_busy() || self.streaming.queued.is_empty() {
      return;
    }

    let batch = std::mem::take(&mut self.streaming.queued);
    self.streaming.in_flight = batch.len();
    let generation = self.streaming.generation;

    for id in batch {
      let store = Arc::clone(store);
      let tx = self.streaming.tx.clone();
      let key = id.index();
      rayon::spawn(move || {
        let outcome = store.load(key);
        // The receiver may be gone if the tree was dropped mid-load.
        let _ = tx.send(LoadResult {
          generation,
          node: id,
          outcome,
        });
      });
    }
  }

  /// Apply completed loads. Returns how many buffers became resident.
  ///
  /// A failed load clears the pending flag so the node can be queued
  /// again next frame.
  pub fn drain_streamed_nodes(&mut self) -> usize {
    let mut applied = 0;
    while let Ok(result) = self.streaming.rx.try_recv() {
      if result.generation != self.streaming.generation {
        continue;
      }
      self.streaming.in_flight = self.streaming.in_flight.saturating_sub(1);

      let node = self.node_mut(result.node);
      match result.outcome {
        Ok(points) => {
          if node.pending {
            node.set_points(points);
            // Freshly loaded buffers match the store by definition.
            node.buffer_dirty = false;
            applied += 1;
          }
        }
        Err(_err) => {
          node.pending = false;
          #[cfg(feature = "tracing")]
          warn!(node = result.node.index(), error = %_err, "node load failed");
        }
      }
    }
    applied
  }

  /// Evict every non-persistent resident node whose lifetime has passed.
  ///
  /// Dirty buffers are saved before release; a save failure keeps the
  /// buffer resident and surfaces the error.
  pub fn unload_expired_nodes(&mut self, now: f64, store: &dyn BulkStore) -> Result<()> {
    for id in self.node_ids() {
      let node = self.node(id);
      if !node.has_data() || node.persistent || node.pending || node.lifetime >= now {
        continue;
      }
      // Root stays resident; it anchors every traversal.
      if id == self.root_id() {
        continue;
      }
      if self.node(id).buffer_dirty {
        let points = self.node(id).points().unwrap_or(&[]).to_vec();
        store.save(id.index(), &points)?;
        self.node_mut(id).buffer_dirty = false;
      }
      self.node_mut(id).release_points();
      self.set_fully_loaded(false);
    }
    Ok(())
  }

  /// Synchronously load every evicted node. Used by whole-cloud edits
  /// that must see all points.
  pub fn load_all_nodes(&mut self, store: &dyn BulkStore) -> Result<()> {
    if self.is_fully_loaded() {
      return Ok(());
    }
    for id in self.node_ids() {
      if self.node(id).has_data() {
        continue;
      }
      let points = store.load(id.index())?;
      let node = self.node_mut(id);
      node.set_points(points);
      node.buffer_dirty = false;
    }
    self.set_fully_loaded(true);
    Ok(())
  }

  /// Save every dirty buffer to the store.
  pub fn save_dirty_nodes(&mut self, store: &dyn BulkStore) -> Result<()> {
    for id in self.node_ids() {
      if !self.node(id).buffer_dirty || !self.node(id).has_data() {
        continue;
      }
      let points = self.node(id).points().unwrap_or(&[]).to_vec();
      store.save(id.index(), &points)?;
      self.node_mut(id).buffer_dirty = false;
    }
    Ok(())
  }

  /// Save and release every non-root buffer, regardless of lifetime.
  /// Pinned nodes are kept unless `include_persistent` is set.
  pub fn release_all_nodes(&mut self, store: &dyn BulkStore, include_persistent: bool) -> Result<()> {
    self.save_dirty_nodes(store)?;
    let root = self.root_id();
    for id in self.node_ids() {
      if id == root || !self.node(id).has_data() {
        continue;
      }
      if self.node(id).persistent && !include_persistent {
        continue;
      }
      self.node_mut(id).release_points();
    }
    self.set_fully_loaded(false);
    Ok(())
  }

  /// Pin or unpin a node against eviction.
  pub fn set_persistent(&mut self, id: NodeId, persistent: bool) {
    self.node_mut(id).persistent = persistent;
  }
}

#[cfg(test)]
#[path = "streaming_test.rs"]
mod streaming_test;
