//! Cancellation broadcast over the active registry.

use serde::Serialize;

use crate::log::{self, LogLevel, Outcome};
use crate::metrics::{HookMetrics, global_metrics};
use crate::registry::{ActiveRegistry, IoHandle};

/// Result of one interrupt attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    Issued,
    /// The primitive ran and reported this OS error.
    Failed(i32),
    /// No primitive exists on this host.
    Unsupported,
}

/// OS-level primitive that makes a blocked call on a handle return.
///
/// Called with the registry lock held: it must not block and must not touch
/// the registry.
pub trait Interrupter {
    fn interrupt(&self, handle: IoHandle) -> InterruptOutcome;
}

impl<F> Interrupter for F
where
    F: Fn(IoHandle) -> InterruptOutcome,
{
    fn interrupt(&self, handle: IoHandle) -> InterruptOutcome {
        self(handle)
    }
}

/// Tally of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CancelReport {
    pub visited: usize,
    pub issued: usize,
    pub failed: usize,
    pub unsupported: usize,
}

/// Interrupt every handle registered when the lock is taken, exactly once
/// each. Does not wait for the interrupted calls to return.
pub fn cancel_all<I: Interrupter + ?Sized>(registry: &ActiveRegistry, interrupter: &I) -> CancelReport {
    let mut report = CancelReport::default();
    let visited = registry.for_each_entry(|handle| match interrupter.interrupt(handle) {
        InterruptOutcome::Issued => report.issued += 1,
        InterruptOutcome::Failed(_) => report.failed += 1,
        InterruptOutcome::Unsupported => report.unsupported += 1,
    });
    report.visited = visited;

    let metrics = global_metrics();
    HookMetrics::inc(&metrics.cancel_broadcasts);
    HookMetrics::add(&metrics.interrupts_issued, report.issued as u64);
    HookMetrics::add(&metrics.interrupts_failed, report.failed as u64);
    HookMetrics::add(&metrics.interrupts_skipped, report.unsupported as u64);

    if report.visited > 0 {
        let outcome = if report.failed == 0 {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        log::emit(
            log::record(LogLevel::Info, "cancel_broadcast")
                .with_handles(report.visited)
                .with_outcome(outcome)
                .with_details(serde_json::json!({
                    "issued": report.issued,
                    "failed": report.failed,
                    "unsupported": report.unsupported,
                })),
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn every_entry_gets_exactly_one_attempt() {
        let registry = ActiveRegistry::new();
        let _a = registry.register(IoHandle::from_fd(3));
        let _b = registry.register(IoHandle::from_fd(4));
        let _c = registry.register(IoHandle::from_fd(5));

        let seen = RefCell::new(Vec::new());
        let report = cancel_all(&registry, &|h: IoHandle| {
            seen.borrow_mut().push(h.as_fd());
            InterruptOutcome::Issued
        });

        assert_eq!(*seen.borrow(), vec![5, 4, 3]);
        assert_eq!(
            report,
            CancelReport {
                visited: 3,
                issued: 3,
                failed: 0,
                unsupported: 0
            }
        );
        // broadcast leaves the registry alone
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn outcomes_are_tallied() {
        let registry = ActiveRegistry::new();
        let _a = registry.register(IoHandle::from_fd(1));
        let _b = registry.register(IoHandle::from_fd(2));
        let _c = registry.register(IoHandle::from_fd(3));

        let report = cancel_all(&registry, &|h: IoHandle| match h.as_fd() {
            1 => InterruptOutcome::Failed(9),
            2 => InterruptOutcome::Unsupported,
            _ => InterruptOutcome::Issued,
        });
        assert_eq!(report.visited, 3);
        assert_eq!(report.issued, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.unsupported, 1);
    }

    #[test]
    fn empty_registry_visits_nothing() {
        let registry = ActiveRegistry::new();
        let report = cancel_all(&registry, &|_: IoHandle| InterruptOutcome::Issued);
        assert_eq!(report, CancelReport::default());
    }
}
