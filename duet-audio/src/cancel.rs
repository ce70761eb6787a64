//! Per-deck cancellation token

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that pending work checks before it acts
///
/// A deck holds one live token. Pausing, stopping, unloading or loading
/// cancels it and swaps in a fresh one, so anything still holding a clone
/// of the old token (a load, the poll loop, a delayed play) sees the
/// cancellation and drops its result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Cancel this token and replace it with a fresh one
    pub fn renew(&mut self) {
        self.cancel();
        *self = Self::new();
    }
}
