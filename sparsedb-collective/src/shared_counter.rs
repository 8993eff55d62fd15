use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A distributed fetch-and-add counter (spec §4.2). `fetch_add`
/// atomically returns the pre-increment value and advances by `n`.
/// Cloning shares the same underlying counter; this is the in-process
/// stand-in for the cross-rank one-sided accumulator DESIGN NOTES §9
/// describes.
#[derive(Debug, Clone)]
pub struct SharedCounter {
    value: Arc<AtomicU64>,
}

impl SharedCounter {
    pub fn new(base: u64) -> Self {
        SharedCounter {
            value: Arc::new(AtomicU64::new(base)),
        }
    }

    /// Atomically returns the value before adding `n`. Ordering between
    /// callers is not guaranteed (spec §4.2); callers must not depend on
    /// which caller observes which value.
    pub fn fetch_add(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::SeqCst)
    }

    pub fn load(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
