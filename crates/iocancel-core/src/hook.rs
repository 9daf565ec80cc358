//! Hook sets and their install state machine.
//!
//! ```text
//! NotInstalled --install--> Installing --ok--> Installed (terminal)
//!                               |
//!                               +--err (after rollback)--> NotInstalled
//! ```
//!
//! The transition out of `NotInstalled` is a compare-exchange, so at most one
//! thread resolves and patches a given set at a time. Once `Installed`, every
//! query is a single atomic load.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use crate::error::HookError;
use crate::log::{self, LogLevel, Outcome};
use crate::metrics::{HookMetrics, global_metrics};
use crate::patch::{PatchReport, patch_symbols};
use crate::resolve::{ModuleLocator, resolve_target};

/// Address of the real function a stub forwards to. Zero until captured.
#[derive(Debug)]
pub struct OriginalFn(AtomicUsize);

impl OriginalFn {
    #[must_use]
    pub const fn empty() -> Self {
        Self(AtomicUsize::new(0))
    }

    #[must_use]
    pub fn get(&self) -> Option<usize> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }

    /// Record the original. Must happen before any slot points at the stub.
    pub fn capture(&self, addr: usize) {
        self.0.store(addr, Ordering::Release);
    }
}

/// One symbol to redirect.
#[derive(Debug, Clone, Copy)]
pub struct HookSpec {
    pub symbol: &'static str,
    /// Address of the interceptor stub.
    pub replacement: usize,
    pub original: &'static OriginalFn,
}

impl HookSpec {
    #[must_use]
    pub const fn new(symbol: &'static str, replacement: usize, original: &'static OriginalFn) -> Self {
        Self {
            symbol,
            replacement,
            original,
        }
    }
}

/// When a hook set is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPolicy {
    /// At startup; failures are reported to the caller.
    Eager,
    /// On demand, once its module shows up; failures are retried.
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    Installing,
    Installed,
}

const NOT_INSTALLED: u8 = 0;
const INSTALLING: u8 = 1;
const INSTALLED: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// This call resolved and patched the set.
    Installed {
        module: &'static str,
        report: PatchReport,
    },
    /// A previous call already did.
    AlreadyInstalled,
}

/// Result of an on-demand install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyStatus {
    Installed,
    /// Not installed yet; a later call retries.
    Deferred,
    /// Lazy installation is switched off or cannot work on this host.
    Disabled,
}

/// A group of symbols redirected together in one module chosen from an
/// ordered candidate list.
#[derive(Debug)]
pub struct HookSet {
    name: &'static str,
    candidates: &'static [&'static str],
    specs: Vec<HookSpec>,
    policy: InstallPolicy,
    state: AtomicU8,
    resolve_attempts: AtomicU64,
    module: OnceLock<&'static str>,
}

impl HookSet {
    #[must_use]
    pub fn new(
        name: &'static str,
        candidates: &'static [&'static str],
        specs: Vec<HookSpec>,
        policy: InstallPolicy,
    ) -> Self {
        Self {
            name,
            candidates,
            specs,
            policy,
            state: AtomicU8::new(NOT_INSTALLED),
            resolve_attempts: AtomicU64::new(0),
            module: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn candidates(&self) -> &'static [&'static str] {
        self.candidates
    }

    #[must_use]
    pub fn specs(&self) -> &[HookSpec] {
        &self.specs
    }

    #[must_use]
    pub fn policy(&self) -> InstallPolicy {
        self.policy
    }

    #[must_use]
    pub fn state(&self) -> InstallState {
        match self.state.load(Ordering::Acquire) {
            INSTALLED => InstallState::Installed,
            INSTALLING => InstallState::Installing,
            _ => InstallState::NotInstalled,
        }
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.state.load(Ordering::Acquire) == INSTALLED
    }

    /// Module the set was installed into.
    #[must_use]
    pub fn installed_module(&self) -> Option<&'static str> {
        self.module.get().copied()
    }

    /// How many times the candidate list was resolved.
    #[must_use]
    pub fn resolve_attempts(&self) -> u64 {
        self.resolve_attempts.load(Ordering::Relaxed)
    }

    /// Resolve the target module and patch every spec into it.
    ///
    /// On error the module is left unmodified and the set returns to
    /// `NotInstalled`, so the call may be retried.
    pub fn install<L: ModuleLocator + ?Sized>(&self, locator: &L) -> Result<InstallOutcome, HookError> {
        match self
            .state
            .compare_exchange(NOT_INSTALLED, INSTALLING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(INSTALLED) => return Ok(InstallOutcome::AlreadyInstalled),
            Err(_) => return Err(HookError::InstallInProgress(self.name)),
        }

        self.resolve_attempts.fetch_add(1, Ordering::Relaxed);
        HookMetrics::inc(&global_metrics().resolve_attempts);
        log::emit(log::record(LogLevel::Debug, "install_start").with_hook_set(self.name));

        let result = resolve_target(self.name, self.candidates, locator).and_then(|mut resolved| {
            patch_symbols(resolved.name, &mut resolved.table, &self.specs)
                .map(|report| (resolved.name, report))
        });

        match result {
            Ok((module, report)) => {
                let _ = self.module.set(module);
                self.state.store(INSTALLED, Ordering::Release);
                log::emit(
                    log::record(LogLevel::Info, "install_success")
                        .with_hook_set(self.name)
                        .with_module(module)
                        .with_outcome(Outcome::Success)
                        .with_details(serde_json::json!({
                            "symbols": report.symbols,
                            "slots": report.slots,
                        })),
                );
                Ok(InstallOutcome::Installed { module, report })
            }
            Err(err) => {
                self.state.store(NOT_INSTALLED, Ordering::Release);
                let level = match self.policy {
                    InstallPolicy::Eager => LogLevel::Error,
                    InstallPolicy::Lazy => LogLevel::Debug,
                };
                log::emit(
                    log::record(level, "install_failure")
                        .with_hook_set(self.name)
                        .with_outcome(Outcome::Failure)
                        .with_details(serde_json::json!({
                            "kind": err.kind(),
                            "message": err.to_string(),
                        })),
                );
                Err(err)
            }
        }
    }

    /// Install if not done yet, absorbing failures.
    ///
    /// Once installed this returns after one atomic load, without touching
    /// the locator.
    pub fn ensure_installed<L: ModuleLocator + ?Sized>(&self, locator: &L) -> LazyStatus {
        if self.is_installed() {
            return LazyStatus::Installed;
        }
        HookMetrics::inc(&global_metrics().lazy_attempts);
        match self.install(locator) {
            Ok(_) => LazyStatus::Installed,
            Err(err) => {
                HookMetrics::inc(&global_metrics().lazy_deferrals);
                log::emit(
                    log::record(LogLevel::Debug, "lazy_deferred")
                        .with_hook_set(self.name)
                        .with_outcome(Outcome::Deferred)
                        .with_details(serde_json::json!({ "kind": err.kind() })),
                );
                LazyStatus::Deferred
            }
        }
    }
}
