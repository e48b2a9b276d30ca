//! Fast-call cache
//!
//! A static `getproperty` whose result is later called through the same
//! slot gets a probe cell. At run time the read records whether the value is
//! a plain function; the call then skips generic dispatch when it is. The
//! pairing only holds within a small window with no join point in between
//! and no other write to the slot.

use crate::jit::analysis::Op;
use crate::jit::ir::{Args, CellId, NameExpr, Slot, Stmt};
use super::{Alias, Site, SiteOptimizer};
use crate::jit::pipeline::codegen::{narrow, CodegenError, NameTable};

#[derive(Debug, Clone, Copy)]
struct Live {
    slot: Slot,
    cell: u32,
    /// Ordinal of the read that produced the alias
    marked: usize,
}

/// Pairs property reads with the calls that consume them
#[derive(Debug)]
pub struct FastCallCache {
    window: usize,
    live: Vec<Live>,
    pending: Option<Live>,
    cells: u32,
}

impl FastCallCache {
    pub fn new(window: usize) -> Self {
        FastCallCache { window, live: Vec::new(), pending: None, cells: 0 }
    }

    /// Probe cells handed out so far
    pub fn cells(&self) -> u32 {
        self.cells
    }

    fn live_cell(&self, slot: Slot) -> Option<u32> {
        self.live.iter().find(|l| l.slot == slot).map(|l| l.cell)
    }
}

impl SiteOptimizer for FastCallCache {
    fn name(&self) -> &'static str {
        "fast-call"
    }

    fn test(&self, site: &Site<'_>) -> bool {
        match &site.instr.op {
            Op::GetProperty(mn) => mn.is_static() && site.name.is_some(),
            Op::Call(_) => self.live_cell(site.slot).is_some(),
            _ => false,
        }
    }

    fn mark(&mut self, site: &Site<'_>) -> Alias {
        if let Some(cell) = self.live_cell(site.slot).filter(|_| matches!(site.instr.op, Op::Call(_))) {
            tracing::trace!(position = site.instr.position, cell, "fast call");
            return Alias(cell);
        }
        let cell = self.cells;
        self.cells += 1;
        self.pending = Some(Live { slot: site.slot, cell, marked: site.ordinal });
        Alias(cell)
    }

    fn emit(&mut self, alias: Alias, site: &Site<'_>, _names: &mut NameTable<'_>) -> Result<Stmt, CodegenError> {
        let base = site.slot;
        let cell = Some(CellId(alias.0));
        match (&site.instr.op, site.name) {
            (Op::Call(argc), _) => Ok(Stmt::Call {
                dest: base,
                callee: base,
                receiver: base.offset(1),
                args: Args::new(base.offset(2), narrow(*argc, site.instr.position)?),
                fast: cell,
            }),
            (_, Some(name)) => Ok(Stmt::GetProperty { dest: base, obj: base, name: NameExpr::Static(name), alias: cell }),
            (_, None) => Err(CodegenError::Unresolved { offset: site.instr.position }),
        }
    }

    fn advance(&mut self, site: &Site<'_>) {
        if site.is_join() {
            self.live.clear();
        }
        let (window, now) = (self.window, site.ordinal);
        self.live.retain(|l| now - l.marked <= window);
    }

    fn settle(&mut self, site: &Site<'_>) {
        // Anything at or above the lowest slot this instruction popped is gone.
        if let Some(depth) = site.instr.stack_before {
            let floor = depth.saturating_sub(site.instr.effect.pops);
            self.live.retain(|l| u32::from(l.slot.0) < floor);
        }
        if let Some(live) = self.pending.take() {
            self.live.push(live);
        }
    }

    fn reset(&mut self) {
        self.live.clear();
        self.pending = None;
        self.cells = 0;
    }
}
