//! Per-port usage counting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Counts open sessions and intercepted frames that still reference a port
/// proxy.
///
/// The mutex is the port's usage lock: stage disposal takes every port's
/// usage lock at once, and session admission checks the disposal flag while
/// holding it.
#[derive(Debug, Default)]
pub struct UsageCounter {
    count: Mutex<usize>,
    underflows: AtomicU64,
}

impl UsageCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the usage lock.
    pub fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap()
    }

    /// Current count.
    pub fn get(&self) -> usize {
        *self.lock()
    }

    /// Increment unconditionally.
    pub fn increment(&self) {
        *self.lock() += 1;
    }

    /// Increment unless `refuse` returns an error, checked under the usage lock.
    pub fn increment_unless<E>(&self, refuse: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        let mut count = self.lock();
        refuse()?;
        *count += 1;
        Ok(())
    }

    /// Decrement and return the new count.
    ///
    /// A decrement at zero is clamped, counted as an underflow and reported
    /// as `None`.
    pub fn decrement(&self) -> Option<usize> {
        let mut count = self.lock();
        if *count == 0 {
            self.underflows.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        *count -= 1;
        Some(*count)
    }

    /// Clamped decrements observed so far.
    pub fn underflows(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }
}
