//! RANSAC normal estimation.
//!
//! Points are grouped into sampling units processed from a FIFO queue,
//! starting with one unit per node buffer. Each unit runs a RANSAC plane
//! fit: random point triples propose planes, and the plane with the most
//! inliers wins. A fit covering at least [`ACCEPT_RATIO`] of the unit is
//! taken on the spot; after all iterations a best fit covering at least
//! [`MIN_RATIO`] is still accepted. Outliers re-enter the queue as a new
//! unit. Units that cannot be fitted are split into octants around their
//! centroid and retried; units too small to fit get the upward default
//! normal.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::error::{PointCloudError, Result};
use crate::octree::Octree;
use crate::point::{PackedNormal, PointCloudPoint};

/// Inlier ratio that ends the search early.
const ACCEPT_RATIO: f32 = 0.8;
/// Minimum inlier ratio for accepting the best fit after all iterations.
const MIN_RATIO: f32 = 0.5;

/// Tuning for normal estimation.
#[derive(Clone, Copy, Debug)]
pub struct NormalsConfig {
  /// RANSAC iterations per sampling unit.
  pub quality: u32,
  /// Maximum point-to-plane distance for an inlier. Zero derives the
  /// tolerance from the unit's spatial extent.
  pub tolerance: f32,
  /// Units smaller than this get the default normal instead of a fit.
  pub min_unit_size: usize,
  /// Base RNG seed, combined with the node index per buffer.
  pub seed: u64,
}

impl Default for NormalsConfig {
  fn default() -> Self {
    Self {
      quality: 40,
      tolerance: 0.0,
      min_unit_size: 8,
      seed: 0x9a3c_51d2,
    }
  }
}

/// Estimate normals for a loose point buffer.
///
/// Cancellation is polled between sampling units; on cancellation the
/// buffer keeps whatever normals were already assigned.
pub fn estimate_normals(
  points: &mut [PointCloudPoint],
  config: &NormalsConfig,
  token: Option<&CancellationToken>,
) -> Result<()> {
  if points.is_empty() {
    return Ok(());
  }
  let mut rng = StdRng::seed_from_u64(config.seed);
  let mut units: std::collections::VecDeque<Vec<usize>> = std::collections::VecDeque::new();
  units.push_back((0..points.len()).collect());

  while let Some(unit) = units.pop_front() {
    if let Some(token) = token {
      if token.is_cancelled() {
        return Err(PointCloudError::Cancelled);
      }
    }
    process_unit(points, unit, config, &mut rng, &mut units);
  }
  Ok(())
}

fn process_unit(
  points: &mut [PointCloudPoint],
  unit: Vec<usize>,
  config: &NormalsConfig,
  rng: &mut StdRng,
  units: &mut std::collections::VecDeque<Vec<usize>>,
) {
  let min_size = config.min_unit_size.max(3);
  if unit.len() < min_size {
    for &i in &unit {
      if !points[i].normal.is_set() {
        points[i].normal = PackedNormal::from_vec3(Vec3::Z);
      }
    }
    return;
  }

  let tolerance = if config.tolerance > 0.0 {
    config.tolerance
  } else {
    derived_tolerance(points, &unit)
  };

  let mut best_normal = Vec3::ZERO;
  let mut best_anchor = Vec3::ZERO;
  let mut best_inliers = 0usize;

  for _ in 0..config.quality {
    let (a, b, c) = random_triple(rng, unit.len());
    let pa = points[unit[a]].position;
    let pb = points[unit[b]].position;
    let pc = points[unit[c]].position;
    let normal = (pb - pa).cross(pc - pa);
    if normal.length_squared() < 1.0e-12 {
      continue;
    }
    let normal = normal.normalize();

    let inliers = unit
      .iter()
      .filter(|&&i| (points[i].position - pa).dot(normal).abs() <= tolerance)
      .count();
    if inliers > best_inliers {
      best_inliers = inliers;
      best_normal = normal;
      best_anchor = pa;
      if inliers as f32 >= unit.len() as f32 * ACCEPT_RATIO {
        break;
      }
    }
  }

  if best_inliers as f32 >= unit.len() as f32 * MIN_RATIO {
    // Orient consistently into the upper hemisphere.
    let normal = if best_normal.z < 0.0 {
      -best_normal
    } else {
      best_normal
    };
    let packed = PackedNormal::from_vec3(normal);

    let mut outliers = Vec::new();
    for &i in &unit {
      if (points[i].position - best_anchor).dot(best_normal).abs() <= tolerance {
        points[i].normal = packed;
      } else {
        outliers.push(i);
      }
    }
    if !outliers.is_empty() {
      units.push_back(outliers);
    }
    return;
  }

  // No dominant plane: split around the centroid and retry per octant.
  let centroid = unit
    .iter()
    .fold(Vec3::ZERO, |acc, &i| acc + points[i].position)
    / unit.len() as f32;
  let mut octants: [Vec<usize>; 8] = Default::default();
  for &i in &unit {
    let rel = points[i].position - centroid;
    let octant = (if rel.x > 0.0 { 4 } else { 0 })
      + (if rel.y > 0.0 { 2 } else { 0 })
      + (if rel.z > 0.0 { 1 } else { 0 });
    octants[octant as usize].push(i);
  }

  // A degenerate split cannot make progress; fall back to the default.
  if octants.iter().filter(|octant| !octant.is_empty()).count() <= 1 {
    for &i in &unit {
      if !points[i].normal.is_set() {
        points[i].normal = PackedNormal::from_vec3(Vec3::Z);
      }
    }
    return;
  }

  for octant in octants {
    if !octant.is_empty() {
      units.push_back(octant);
    }
  }
}

fn derived_tolerance(points: &[PointCloudPoint], unit: &[usize]) -> f32 {
  let mut min = Vec3::splat(f32::INFINITY);
  let mut max = Vec3::splat(f32::NEG_INFINITY);
  for &i in unit {
    min = min.min(points[i].position);
    max = max.max(points[i].position);
  }
  ((max - min).max_element() * 0.005).max(1.0e-4)
}

fn random_triple(rng: &mut StdRng, len: usize) -> (usize, usize, usize) {
  let a = rng.random_range(0..len);
  let mut b = rng.random_range(0..len - 1);
  if b >= a {
    b += 1;
  }
  let mut c = rng.random_range(0..len - 2);
  for pivot in [a.min(b), a.max(b)] {
    if c >= pivot {
      c += 1;
    }
  }
  (a, b, c)
}

impl Octree {
  /// Estimate normals for every resident buffer.
  ///
  /// Buffers are processed in parallel; evicted nodes are skipped, so
  /// callers wanting full coverage load the tree first. Cancellation
  /// stops the work and reports [`PointCloudError::Cancelled`], leaving
  /// already-computed normals in place.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
  pub fn calculate_normals(
    &mut self,
    config: &NormalsConfig,
    token: Option<&CancellationToken>,
  ) -> Result<()> {
    let mut buffers: Vec<(crate::octree::NodeId, Vec<PointCloudPoint>)> = Vec::new();
    for id in self.node_ids() {
      if let Some(points) = self.node_mut(id).take_points() {
        buffers.push((id, points));
      }
    }

    let outcome: Result<()> = buffers
      .par_iter_mut()
      .map(|(id, points)| {
        let config = NormalsConfig {
          seed: config.seed.wrapping_add(id.index() as u64),
          ..*config
        };
        estimate_normals(points, &config, token)
      })
      .collect();

    for (id, points) in buffers {
      self.node_mut(id).set_points(points);
    }
    outcome
  }
}

#[cfg(test)]
#[path = "normals_test.rs"]
mod normals_test;
