//! Process-wide hook service.
//!
//! The registry is a plain static so the stubs reach it without any lazy
//! initialization on the hot path. The hook sets are built on first use of
//! [`service()`].

use std::sync::OnceLock;

use iocancel_core::config::config;
use iocancel_core::log::{self, LogLevel};
use iocancel_core::{
    ActiveRegistry, CancelReport, HookError, HookSet, InstallOutcome, LazyStatus, MetricsSnapshot,
    cancel_all, global_metrics,
};

use crate::platform;

/// Every handle currently inside an interceptor stub.
pub(crate) static ACTIVE_IO: ActiveRegistry = ActiveRegistry::new();

/// Hook sets for this platform plus the registry they feed.
#[derive(Debug)]
pub struct HookService {
    registry: &'static ActiveRegistry,
    primary: HookSet,
    lazy: Option<HookSet>,
}

impl HookService {
    fn new() -> Self {
        let lazy = if config().lazy_enabled {
            platform::lazy_hook_set()
        } else {
            log::emit(log::record(LogLevel::Info, "lazy_disabled").with_hook_set("lazy"));
            None
        };
        Self {
            registry: &ACTIVE_IO,
            primary: platform::primary_hook_set(),
            lazy,
        }
    }

    /// Patch the primary set into the first candidate that is loaded.
    pub fn install_hooks(&self) -> Result<InstallOutcome, HookError> {
        platform::install(&self.primary)
    }

    /// Patch the lazy set if its module has appeared since the last try.
    pub fn ensure_lazy_hooks_installed(&self) -> LazyStatus {
        match &self.lazy {
            Some(set) => platform::ensure_installed(set),
            None => LazyStatus::Disabled,
        }
    }

    /// Interrupt every blocked call.
    pub fn cancel_all_active_io(&self) -> CancelReport {
        cancel_all(self.registry, &platform::interrupter())
    }

    pub fn active_io_count(&self) -> usize {
        self.registry.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        global_metrics().snapshot()
    }

    pub fn primary(&self) -> &HookSet {
        &self.primary
    }

    pub fn lazy(&self) -> Option<&HookSet> {
        self.lazy.as_ref()
    }
}

static SERVICE: OnceLock<HookService> = OnceLock::new();

/// The process-wide service, built on first call.
pub fn service() -> &'static HookService {
    SERVICE.get_or_init(HookService::new)
}
