//! # iocancel-core
//!
//! Safe building blocks for making a foreign library's blocking reads
//! interruptible: the registry of in-flight calls, hook sets and their
//! install state machine, target resolution, slot patching with rollback,
//! the cancellation broadcast, and the ELF/PE readers that find import slots.
//!
//! Platform access (loader queries, page protection, the interrupt
//! primitive) lives behind the [`ModuleLocator`], [`DispatchTable`] and
//! [`Interrupter`] traits and is implemented by `iocancel-abi`. No `unsafe`
//! code is permitted here.

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod elf;
pub mod error;
pub mod hook;
pub mod log;
pub mod metrics;
pub mod patch;
pub mod pe;
pub mod registry;
pub mod resolve;

pub use dispatch::{CancelReport, InterruptOutcome, Interrupter, cancel_all};
pub use error::{HookError, SlotFault};
pub use hook::{
    HookSet, HookSpec, InstallOutcome, InstallPolicy, InstallState, LazyStatus, OriginalFn,
};
pub use metrics::{HookMetrics, MetricsSnapshot, global_metrics};
pub use patch::{DispatchTable, PatchReport, SlotPlan, SlotRecord, patch_symbols, rollback};
pub use registry::{ActiveCall, ActiveRegistry, EntryToken, IoHandle};
pub use resolve::{ModuleLocator, ResolvedModule, resolve_target};
