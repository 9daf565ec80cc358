//! Symbol patching with rollback.
//!
//! A [`DispatchTable`] is one loaded module's view of its import slots. The
//! patcher plans every slot of a symbol, captures the original target,
//! rewrites all slots, and moves on. When any symbol fails, the slots
//! already rewritten are put back in reverse order before the error is
//! returned, so a failed install leaves the module as it found it.

use crate::error::{HookError, SlotFault};
use crate::hook::HookSpec;
use crate::log::{self, LogLevel, Outcome};
use crate::metrics::{HookMetrics, global_metrics};

/// One import slot and the value it held before patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRecord {
    pub address: usize,
    pub previous: usize,
}

/// Every slot bound to one symbol, plus the function calls must reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPlan {
    pub slots: Vec<SlotRecord>,
    /// Address of the real implementation. Usually the previous slot value,
    /// but a lazily bound PLT slot still points at the resolver trampoline.
    pub original: usize,
}

/// Platform access to one module's dispatch table.
pub trait DispatchTable {
    /// Find the slots of `symbol` and read what they hold now.
    fn plan(&mut self, symbol: &str) -> Result<SlotPlan, SlotFault>;

    /// Store `value` into every slot of `plan`.
    fn write_all(&mut self, plan: &SlotPlan, value: usize) -> Result<(), SlotFault>;

    /// Put back the `previous` value of every slot of `plan`.
    fn restore(&mut self, plan: &SlotPlan) -> Result<(), SlotFault>;
}

/// What a successful [`patch_symbols`] call rewrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub symbols: usize,
    pub slots: usize,
}

/// Redirect every `specs` symbol of `module` to its replacement.
pub fn patch_symbols<T: DispatchTable + ?Sized>(
    module: &str,
    table: &mut T,
    specs: &[HookSpec],
) -> Result<PatchReport, HookError> {
    let mut applied: Vec<(&'static str, SlotPlan)> = Vec::with_capacity(specs.len());

    for spec in specs {
        match patch_one(table, spec) {
            Ok(plan) => applied.push((spec.symbol, plan)),
            Err(cause) => {
                HookMetrics::inc(&global_metrics().patch_failures);
                rollback(module, table, &mut applied);
                return Err(HookError::Patch {
                    module: module.to_owned(),
                    symbol: spec.symbol,
                    cause,
                });
            }
        }
    }

    Ok(PatchReport {
        symbols: applied.len(),
        slots: applied.iter().map(|(_, plan)| plan.slots.len()).sum(),
    })
}

fn patch_one<T: DispatchTable + ?Sized>(table: &mut T, spec: &HookSpec) -> Result<SlotPlan, SlotFault> {
    let plan = table.plan(spec.symbol)?;
    if plan.slots.is_empty() {
        return Err(SlotFault::SymbolAbsent);
    }
    // Stubs read the original as soon as a slot points at them.
    spec.original.capture(plan.original);
    if let Err(fault) = table.write_all(&plan, spec.replacement) {
        // Slots written before the fault go back too.
        let _ = table.restore(&plan);
        return Err(fault);
    }
    Ok(plan)
}

/// Restore `applied` plans in reverse order. Returns how many symbols were
/// restored cleanly.
pub fn rollback<T: DispatchTable + ?Sized>(
    module: &str,
    table: &mut T,
    applied: &mut Vec<(&'static str, SlotPlan)>,
) -> usize {
    let mut restored = 0;
    while let Some((symbol, plan)) = applied.pop() {
        let result = table.restore(&plan);
        let entry = log::record(LogLevel::Warn, "rollback")
            .with_module(module)
            .with_symbol(symbol);
        match result {
            Ok(()) => {
                restored += 1;
                HookMetrics::inc(&global_metrics().rollbacks);
                log::emit(entry.with_outcome(Outcome::RolledBack));
            }
            Err(fault) => log::emit(
                entry
                    .with_outcome(Outcome::Failure)
                    .with_details(serde_json::json!({ "cause": fault.to_string() })),
            ),
        }
    }
    restored
}
