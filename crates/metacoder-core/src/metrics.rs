//! Atomic counters for working-directory lock observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`LockMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a matrix run).
//!
//! Each [`crate::lock::DirectoryLocker`] owns its own counters, so separate
//! runners (and separate tests) never observe each other's traffic.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight atomic counters, no allocations, no locking.
#[derive(Debug)]
pub struct LockMetrics {
    acquired: AtomicU64,
    released: AtomicU64,
    reclaimed: AtomicU64,
    timed_out: AtomicU64,
}

impl Default for LockMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LockMetrics {
    pub const fn new() -> Self {
        Self {
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    pub fn inc_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lock_acquired", "counter incremented");
    }

    pub fn inc_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lock_released", "counter incremented");
    }

    pub fn inc_reclaimed(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lock_reclaimed", "counter incremented");
    }

    pub fn inc_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lock_timed_out", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            lock_acquired = self.acquired(),
            lock_released = self.released(),
            lock_reclaimed = self.reclaimed(),
            lock_timed_out = self.timed_out(),
        );
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Handles currently outstanding (acquired but not yet released).
    pub fn outstanding(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.acquired.store(0, Ordering::Relaxed);
        self.released.store(0, Ordering::Relaxed);
        self.reclaimed.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = LockMetrics::new();
        m.inc_acquired();
        m.inc_acquired();
        m.inc_released();
        assert_eq!(m.acquired(), 2);
        assert_eq!(m.released(), 1);
        assert_eq!(m.outstanding(), 1);

        m.inc_reclaimed();
        m.inc_timed_out();
        assert_eq!(m.reclaimed(), 1);
        assert_eq!(m.timed_out(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = LockMetrics::new();
        m.inc_acquired();
        m.inc_released();
        m.inc_reclaimed();
        m.inc_timed_out();
        m.reset();
        assert_eq!(m.acquired(), 0);
        assert_eq!(m.released(), 0);
        assert_eq!(m.reclaimed(), 0);
        assert_eq!(m.timed_out(), 0);
    }
}
