//! Global atomic counters for skirmish observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a run terminates).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    battles_active: AtomicU64,
    rounds_total: AtomicU64,
    breaches_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            battles_active: AtomicU64::new(0),
            rounds_total: AtomicU64::new(0),
            breaches_total: AtomicU64::new(0),
        }
    }

    /// A runner task entered its round loop.
    pub fn inc_battles_active(&self) {
        self.battles_active.fetch_add(1, Ordering::Relaxed);
    }

    /// A runner task terminated (any exit path).
    pub fn dec_battles_active(&self) {
        // Saturating: a stray double-decrement must not wrap the gauge.
        let _ = self
            .battles_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// One round completed successfully.
    pub fn inc_rounds(&self) {
        self.rounds_total.fetch_add(1, Ordering::Relaxed);
    }

    /// One round classified as breach.
    pub fn inc_breaches(&self) {
        self.breaches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (run termination, daemon tick)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            battles_active = self.battles_active(),
            rounds_total = self.rounds_total(),
            breaches_total = self.breaches_total(),
        );
    }

    pub fn battles_active(&self) -> u64 {
        self.battles_active.load(Ordering::Relaxed)
    }

    pub fn rounds_total(&self) -> u64 {
        self.rounds_total.load(Ordering::Relaxed)
    }

    pub fn breaches_total(&self) -> u64 {
        self.breaches_total.load(Ordering::Relaxed)
    }
}
