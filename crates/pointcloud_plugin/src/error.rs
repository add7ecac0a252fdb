//! Error taxonomy for the point cloud index.
//!
//! Structural errors abort the call that caused them and leave prior state
//! untouched. Streaming errors are local to one node and never fail a whole
//! query. Busy/Cancelled are reported to the initiating caller as values,
//! never propagated across thread boundaries.

use glam::Vec3;
use thiserror::Error;

/// Errors surfaced by octree and asset-level operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PointCloudError {
  /// The provided bounding extent was degenerate (zero or negative on some
  /// axis). The tree is left empty.
  #[error("invalid bounds: extent {0} must be positive on all axes")]
  InvalidBounds(Vec3),

  /// The processing lock is already held by another whole-asset operation.
  /// The caller may retry later; nothing was modified.
  #[error("another processing operation is already in progress")]
  Busy,

  /// A backing-store read failed. The node stays non-resident and reports
  /// zero points until the load is retried.
  #[error("bulk data read failed for node {node}: {reason}")]
  StreamFailure { node: usize, reason: String },

  /// Cooperative cancellation was observed. Partial results are retained.
  #[error("operation cancelled")]
  Cancelled,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PointCloudError>;
