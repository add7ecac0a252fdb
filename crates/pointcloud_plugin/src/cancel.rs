//! Cooperative cancellation for long-running operations.
//!
//! Long operations (bulk insertion, normal estimation) poll the token at
//! well-defined checkpoints - per batch, per sampling unit - and unwind
//! cooperatively, leaving the tree in a valid state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, cheap to clone across worker threads.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  /// Create a fresh, non-cancelled token.
  pub fn new() -> Self {
    Self::default()
  }

  /// Request cancellation. Observers see the flag at their next checkpoint.
  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::Relaxed);
  }

  /// Check whether cancellation was requested.
  #[inline]
  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancel_is_visible_through_clones() {
    let token = CancellationToken::new();
    let observer = token.clone();

    assert!(!observer.is_cancelled());
    token.cancel();
    assert!(observer.is_cancelled());
  }
}
