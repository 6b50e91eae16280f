use std::sync::atomic::{AtomicU64, Ordering};

/// Observer of export progress. Never required for correctness.
pub trait Progress: Send + Sync {
    /// Called once before the first record, and only when the total is known.
    fn start(&self, _total: u64) {}

    /// One record processed, whether exported or skipped.
    fn tick(&self);

    fn finish(&self) {}
}

/// Counts ticks; handy for callers that only want a number.
#[derive(Debug, Default)]
pub struct CountingProgress {
    total: AtomicU64,
    done: AtomicU64,
}

impl CountingProgress {
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }
}

impl Progress for CountingProgress {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn tick(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }
}
