//! Atomic counters for hook observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization primitives. Stubs only ever touch `stub_calls` and
//! `peak_active`, both single atomic operations.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide hook counters.
pub struct HookMetrics {
    /// Calls that went through an interceptor stub.
    pub stub_calls: AtomicU64,
    /// Highest number of simultaneously blocked calls observed by a stub.
    pub peak_active: AtomicU64,
    /// `cancel_all` broadcasts.
    pub cancel_broadcasts: AtomicU64,
    /// Interrupt attempts that reached the OS primitive.
    pub interrupts_issued: AtomicU64,
    /// Interrupt attempts the OS primitive rejected.
    pub interrupts_failed: AtomicU64,
    /// Visits that were no-ops because no primitive is available.
    pub interrupts_skipped: AtomicU64,
    /// Candidate-list resolutions (one per install attempt).
    pub resolve_attempts: AtomicU64,
    /// Install attempts that failed while rewriting a symbol.
    pub patch_failures: AtomicU64,
    /// Symbols restored after a partial install.
    pub rollbacks: AtomicU64,
    /// Lazy install attempts that actually resolved.
    pub lazy_attempts: AtomicU64,
    /// Lazy install attempts that failed and will be retried.
    pub lazy_deferrals: AtomicU64,
}

impl HookMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stub_calls: AtomicU64::new(0),
            peak_active: AtomicU64::new(0),
            cancel_broadcasts: AtomicU64::new(0),
            interrupts_issued: AtomicU64::new(0),
            interrupts_failed: AtomicU64::new(0),
            interrupts_skipped: AtomicU64::new(0),
            resolve_attempts: AtomicU64::new(0),
            patch_failures: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            lazy_attempts: AtomicU64::new(0),
            lazy_deferrals: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Record that `active` calls were blocked at once.
    pub fn observe_active(&self, active: usize) {
        self.peak_active.fetch_max(active as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stub_calls: Self::get(&self.stub_calls),
            peak_active: Self::get(&self.peak_active),
            cancel_broadcasts: Self::get(&self.cancel_broadcasts),
            interrupts_issued: Self::get(&self.interrupts_issued),
            interrupts_failed: Self::get(&self.interrupts_failed),
            interrupts_skipped: Self::get(&self.interrupts_skipped),
            resolve_attempts: Self::get(&self.resolve_attempts),
            patch_failures: Self::get(&self.patch_failures),
            rollbacks: Self::get(&self.rollbacks),
            lazy_attempts: Self::get(&self.lazy_attempts),
            lazy_deferrals: Self::get(&self.lazy_deferrals),
        }
    }
}

impl Default for HookMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all hook counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub stub_calls: u64,
    pub peak_active: u64,
    pub cancel_broadcasts: u64,
    pub interrupts_issued: u64,
    pub interrupts_failed: u64,
    pub interrupts_skipped: u64,
    pub resolve_attempts: u64,
    pub patch_failures: u64,
    pub rollbacks: u64,
    pub lazy_attempts: u64,
    pub lazy_deferrals: u64,
}

static GLOBAL_METRICS: HookMetrics = HookMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static HookMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = HookMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_works() {
        let m = HookMetrics::new();
        HookMetrics::inc(&m.stub_calls);
        HookMetrics::inc(&m.stub_calls);
        HookMetrics::add(&m.interrupts_issued, 3);
        let snap = m.snapshot();
        assert_eq!(snap.stub_calls, 2);
        assert_eq!(snap.interrupts_issued, 3);
    }

    #[test]
    fn peak_only_grows() {
        let m = HookMetrics::new();
        m.observe_active(3);
        m.observe_active(1);
        assert_eq!(m.snapshot().peak_active, 3);
    }
}
