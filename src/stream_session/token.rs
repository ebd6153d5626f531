//! One-shot cancellation token

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal for one streaming attempt.
///
/// A token transitions unset -> set exactly once and is never reused;
/// a replaced session keeps its own token so late observers still see
/// the set flag. Clones share the same flag. Identity (not value) is
/// what the registry compares for compare-and-delete.
#[derive(Debug, Clone)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Signal cancellation. Idempotent.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Identity comparison: true only for clones of the same token.
    pub fn same_as(&self, other: &StopToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}
