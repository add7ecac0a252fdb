use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{BulkStore, MemoryStore};
use crate::error::{PointCloudError, Result};
use crate::octree::node::NodeId;
use crate::octree::{Octree, OctreeSettings};
use crate::point::{DuplicateHandling, PointCloudPoint};

struct FailingStore;

impl BulkStore for FailingStore {
  fn save(&self, _node: usize, _points: &[PointCloudPoint]) -> Result<()> {
    Ok(())
  }

  fn load(&self, node: usize) -> Result<Vec<PointCloudPoint>> {
    Err(PointCloudError::StreamFailure {
      node,
      reason: "backend offline".into(),
    })
  }

  fn remove(&self, _node: usize) {}
}

fn deep_tree() -> Octree {
  let settings = OctreeSettings {
    grid_resolution: 8,
    max_bucket_size: 50,
    ..OctreeSettings::default()
  };
  let mut octree = Octree::new(settings);
  octree.initialize(Vec3::splat(100.0)).unwrap();

  let mut rng = StdRng::seed_from_u64(21);
  let points: Vec<PointCloudPoint> = (0..4_000)
    .map(|_| {
      PointCloudPoint::new(
        Vec3::new(
          rng.random_range(-100.0..100.0),
          rng.random_range(-100.0..100.0),
          rng.random_range(-100.0..100.0),
        ),
        [255; 4],
      )
    })
    .collect();
  octree
    .insert_points(&points, DuplicateHandling::Ignore, Vec3::ZERO)
    .unwrap();
  assert!(octree.num_lods() >= 2, "test needs a multi-level tree");
  octree
}

fn first_child(octree: &Octree) -> NodeId {
  octree
    .node(octree.root_id())
    .children
    .iter()
    .flatten()
    .copied()
    .next()
    .unwrap()
}

fn drain_until(octree: &mut Octree, want: usize) -> usize {
  let mut applied = 0;
  for _ in 0..500 {
    applied += octree.drain_streamed_nodes();
    if applied >= want {
      break;
    }
    std::thread::sleep(Duration::from_millis(2));
  }
  applied
}

#[test]
fn eviction_saves_buffers_and_keeps_counts() {
  let mut octree = deep_tree();
  let store = MemoryStore::new();
  let total = octree.num_points();

  octree.unload_expired_nodes(1.0, &store).unwrap();

  assert!(!store.is_empty());
  assert_eq!(octree.num_points(), total);
  assert!(octree.node(octree.root_id()).has_data());
  assert!(!octree.node(first_child(&octree)).has_data());
}

#[test]
fn queued_node_streams_back_in() {
  let mut octree = deep_tree();
  let store: Arc<dyn BulkStore> = Arc::new(MemoryStore::new());
  octree.unload_expired_nodes(1.0, store.as_ref()).unwrap();

  let child = first_child(&octree);
  let expected = octree.node(child).num_points();

  octree.queue_node(child, 100.0);
  octree.stream_queued_nodes(&store);
  let applied = drain_until(&mut octree, 1);

  assert_eq!(applied, 1);
  let node = octree.node(child);
  assert!(node.has_data());
  assert_eq!(node.points().unwrap().len() as u32, expected);
  assert!(!node.buffer_dirty);
}

#[test]
fn pending_node_is_not_queued_twice() {
  let mut octree = deep_tree();
  let store = MemoryStore::new();
  octree.unload_expired_nodes(1.0, &store).unwrap();

  let child = first_child(&octree);
  octree.queue_node(child, 50.0);
  octree.queue_node(child, 100.0);

  assert_eq!(octree.streaming.num_queued(), 1);
  // The second request still extended the lifetime.
  assert_eq!(octree.node(child).lifetime, 100.0);
}

#[test]
fn resident_node_queue_only_extends_lifetime() {
  let mut octree = deep_tree();
  let child = first_child(&octree);

  octree.queue_node(child, 100.0);
  assert_eq!(octree.streaming.num_queued(), 0);
  assert_eq!(octree.node(child).lifetime, 100.0);
}

#[test]
fn one_batch_streams_at_a_time() {
  let mut octree = deep_tree();
  let store: Arc<dyn BulkStore> = Arc::new(MemoryStore::new());
  octree.unload_expired_nodes(1.0, store.as_ref()).unwrap();

  let children: Vec<NodeId> = octree
    .node(octree.root_id())
    .children
    .iter()
    .flatten()
    .copied()
    .collect();
  assert!(children.len() >= 2);

  octree.queue_node(children[0], 100.0);
  octree.stream_queued_nodes(&store);
  assert!(octree.streaming.is_busy());

  // A second dispatch is refused until the first batch drains.
  octree.queue_node(children[1], 100.0);
  octree.stream_queued_nodes(&store);
  assert_eq!(octree.streaming.num_queued(), 1);

  assert_eq!(drain_until(&mut octree, 1), 1);
  assert!(!octree.streaming.is_busy());

  octree.stream_queued_nodes(&store);
  assert_eq!(drain_until(&mut octree, 1), 1);
  assert!(octree.node(children[1]).has_data());
}

#[test]
fn failed_load_clears_pending_for_retry() {
  let mut octree = deep_tree();
  let memory = MemoryStore::new();
  octree.unload_expired_nodes(1.0, &memory).unwrap();

  let child = first_child(&octree);
  let failing: Arc<dyn BulkStore> = Arc::new(FailingStore);

  octree.queue_node(child, 100.0);
  octree.stream_queued_nodes(&failing);
  let applied = drain_until(&mut octree, 1);

  assert_eq!(applied, 0);
  assert!(!octree.node(child).has_data());

  // The node can be requested again.
  octree.queue_node(child, 100.0);
  assert_eq!(octree.streaming.num_queued(), 1);
}

#[test]
fn persistent_node_survives_eviction() {
  let mut octree = deep_tree();
  let store = MemoryStore::new();
  let child = first_child(&octree);

  octree.set_persistent(child, true);
  octree.unload_expired_nodes(1.0, &store).unwrap();

  assert!(octree.node(child).has_data());
}

#[test]
fn load_all_and_release_all_round_trip() {
  let mut octree = deep_tree();
  let store = MemoryStore::new();
  let total = octree.num_points();

  octree.release_all_nodes(&store, true).unwrap();
  assert!(!octree.node(first_child(&octree)).has_data());

  octree.load_all_nodes(&store).unwrap();
  assert!(octree.is_fully_loaded());
  assert_eq!(octree.num_points(), total);

  let resident: i64 = octree
    .node_ids()
    .iter()
    .map(|&id| octree.node(id).points().map_or(0, |p| p.len() as i64))
    .sum();
  assert_eq!(resident, total);
}
