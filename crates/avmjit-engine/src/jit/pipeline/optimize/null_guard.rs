//! Null-guard coalescing
//!
//! A static property read of an allow-listed root (`loaderInfo`,
//! `parameters`) followed by more static reads on the same slot becomes a
//! single guarded chain. The chain checks each receiver in one loop and
//! raises the same null-reference fault the separate reads would.

use rustc_hash::FxHashSet;

use crate::jit::analysis::{Instruction, Op};
use crate::jit::ir::{NameId, Stmt};
use super::{Alias, Site, SiteOptimizer};
use crate::jit::pipeline::codegen::{CodegenError, NameTable};

/// Coalesces property chains behind one guard
#[derive(Debug)]
pub struct NullGuardCoalescer {
    roots: FxHashSet<String>,
    /// Pool indices of each marked chain
    chains: Vec<Vec<u32>>,
}

impl NullGuardCoalescer {
    pub fn new<S: AsRef<str>>(roots: &[S]) -> Self {
        NullGuardCoalescer { roots: roots.iter().map(|s| s.as_ref().to_string()).collect(), chains: Vec::new() }
    }

    /// Pool indices of the reads that extend the chain rooted at `site`
    fn links(site: &Site<'_>) -> Vec<u32> {
        let depth = site.instr.stack_before;
        site.instrs
            .iter()
            .skip(site.ordinal + 1)
            .take_while(|i: &&Instruction| {
                i.stack_before.is_some() && i.stack_before == depth && !site.labels.contains(&i.position)
            })
            .map_while(|i| match &i.op {
                Op::GetProperty(mn) if mn.is_static() => Some(mn.index),
                _ => None,
            })
            .collect()
    }
}

impl SiteOptimizer for NullGuardCoalescer {
    fn name(&self) -> &'static str {
        "null-guard"
    }

    fn test(&self, site: &Site<'_>) -> bool {
        let Op::GetProperty(mn) = &site.instr.op else {
            return false;
        };
        let rooted = site.resolved.as_ref().is_some_and(|n| self.roots.contains(n.local_name()));
        // A lone read gains nothing from the guard.
        mn.is_static() && rooted && !Self::links(site).is_empty()
    }

    fn mark(&mut self, site: &Site<'_>) -> Alias {
        let mut chain = Vec::new();
        if let Op::GetProperty(mn) = &site.instr.op {
            chain.push(mn.index);
        }
        chain.extend(Self::links(site));
        tracing::trace!(position = site.instr.position, length = chain.len(), "coalesced null guards");
        self.chains.push(chain);
        Alias(self.chains.len() as u32 - 1)
    }

    fn emit(&mut self, alias: Alias, site: &Site<'_>, names: &mut NameTable<'_>) -> Result<Stmt, CodegenError> {
        let offset = site.instr.position;
        let chain = self.chains.get(alias.0 as usize).ok_or(CodegenError::Unresolved { offset })?;
        let names = chain
            .iter()
            .map(|&index| names.intern(index, offset))
            .collect::<Result<Vec<NameId>, _>>()?;
        Ok(Stmt::GuardedChain { dest: site.slot, obj: site.slot, names })
    }

    fn absorbed(&self, alias: Alias) -> usize {
        self.chains.get(alias.0 as usize).map_or(0, |c| c.len().saturating_sub(1))
    }

    fn reset(&mut self) {
        self.chains.clear();
    }
}
