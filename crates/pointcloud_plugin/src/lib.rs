//! Out-of-core point cloud indexing, streaming and LOD selection.
//!
//! The crate stores massive point clouds in a sparse octree whose nodes
//! deduplicate points on a per-node virtual grid, giving every depth of
//! the tree a renderable, distance-fair subsample. Node buffers stream
//! between memory and a [`octree::BulkStore`] on demand, and a
//! [`lod::LodManager`] picks the nodes worth rendering each frame under
//! a global, frame-time-adaptive point budget.
//!
//! # Architecture
//!
//! - [`point`]: the 20-byte point representation and duplicate policies
//! - [`octree`]: the sparse octree - insertion, queries, visibility
//!   edits and streaming
//! - [`traversal`]: immutable world-space snapshots used by selection
//! - [`lod`]: per-frame node selection under the point budget
//! - [`normals`]: RANSAC plane-fit normal estimation
//! - [`cloud`]: the asset type tying a tree to its store and guarding
//!   bulk operations
//!
//! # Example
//!
//! ```no_run
//! use glam::{Affine3A, Vec3};
//! use pointcloud_plugin::cloud::PointCloud;
//! use pointcloud_plugin::lod::{InstanceConfig, LodManager, LodManagerConfig};
//! use pointcloud_plugin::octree::OctreeSettings;
//! use pointcloud_plugin::point::PointCloudPoint;
//! use std::sync::Arc;
//!
//! let points = vec![PointCloudPoint::new(Vec3::ZERO, [255, 255, 255, 255])];
//! let cloud = Arc::new(PointCloud::from_points(&points, OctreeSettings::default()).unwrap());
//!
//! let mut manager = LodManager::new(LodManagerConfig::default());
//! manager.register(cloud, Affine3A::IDENTITY, InstanceConfig::default());
//! // Each frame: let frame = manager.process_frame(&views);
//! ```

pub mod cancel;
pub mod cloud;
pub mod collision;
pub mod error;
pub mod lod;
pub mod normals;
pub mod octree;
pub mod point;
pub mod traversal;

pub use cancel::CancellationToken;
pub use cloud::{CloudId, PointCloud};
pub use collision::TriangleMesh;
pub use error::{PointCloudError, Result};
pub use lod::{InstanceConfig, InstanceHandle, LodManager, LodManagerConfig, RenderFrame, ViewData};
pub use normals::NormalsConfig;
pub use octree::{Octree, OctreeSettings};
pub use point::{DuplicateHandling, PointCloudPoint};
