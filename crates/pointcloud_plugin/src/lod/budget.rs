//! Adaptive global point budget.
//!
//! The budget caps how many points all clouds may render in one frame.
//! It adapts to measured frame times: a median over a rolling window is
//! compared against the target, shrinking the budget when frames run
//! long and growing it when there is headroom and the demand would
//! actually use it. A static camera grows the budget in smaller steps,
//! refining the still image without risking visible churn.

use std::collections::VecDeque;

/// Tuning for [`PointBudget`].
#[derive(Clone, Copy, Debug)]
pub struct BudgetConfig {
  /// Starting budget, in points.
  pub initial: u32,
  pub min: u32,
  pub max: u32,
  /// Target frame time in milliseconds. Zero disables adaptation.
  pub target_frame_time_ms: f32,
  /// Adjustment step, in points.
  pub step: u32,
  /// Number of frame time samples in the rolling window.
  pub window: usize,
}

impl Default for BudgetConfig {
  fn default() -> Self {
    Self {
      initial: 1_000_000,
      min: 100_000,
      max: 10_000_000,
      target_frame_time_ms: 16.6,
      step: 50_000,
      window: 30,
    }
  }
}

/// Frame-time driven point budget.
pub struct PointBudget {
  config: BudgetConfig,
  current: u32,
  frame_times: VecDeque<f32>,
}

impl PointBudget {
  pub fn new(config: BudgetConfig) -> Self {
    Self {
      current: config.initial.clamp(config.min, config.max),
      config,
      frame_times: VecDeque::new(),
    }
  }

  /// Current budget, in points.
  pub fn current(&self) -> u32 {
    self.current
  }

  /// Record one frame time sample.
  pub fn record_frame(&mut self, frame_time_ms: f32) {
    if self.frame_times.len() == self.config.window {
      self.frame_times.pop_front();
    }
    self.frame_times.push_back(frame_time_ms);
  }

  /// Median of the rolling window, if it is full enough to trust.
  fn median_frame_time(&self) -> Option<f32> {
    if self.frame_times.len() < self.config.window / 2 {
      return None;
    }
    let mut sorted: Vec<f32> = self.frame_times.iter().copied().collect();
    sorted.sort_by(f32::total_cmp);
    Some(sorted[sorted.len() / 2])
  }

  /// Adjust the budget after a frame.
  ///
  /// `demand` is the total point count selection wanted this frame; the
  /// budget never grows past what would actually be used, except for the
  /// small static-camera refinement step.
  pub fn adapt(&mut self, demand: u32, camera_static: bool) {
    if self.config.target_frame_time_ms <= 0.0 {
      return;
    }
    let Some(median) = self.median_frame_time() else {
      return;
    };
    let target = self.config.target_frame_time_ms;

    let next = if median > target * 1.05 {
      self.current.saturating_sub(self.config.step)
    } else if median < target * 0.95 && demand >= self.current {
      if camera_static {
        self.current.saturating_add(self.config.step / 4)
      } else {
        self.current.saturating_add(self.config.step)
      }
    } else {
      self.current
    };

    self.current = next.clamp(self.config.min, self.config.max);
  }
}

#[cfg(test)]
#[path = "budget_test.rs"]
mod budget_test;
