//! Lexical hoisting
//!
//! `getlex` of a well-known global (public or AS3 namespace, name on the
//! allow-list) resolves once per compiled method into a cell. Repeated
//! lookups of the same name share the cell.

use rustc_hash::FxHashSet;

use crate::jit::analysis::Op;
use crate::jit::ir::{CellId, NameId, Stmt};
use super::{Alias, Site, SiteOptimizer};
use crate::jit::pipeline::codegen::{narrow, CodegenError, NameTable};

/// Hoists allow-listed lexical lookups into per-method cells
#[derive(Debug)]
pub struct LexicalHoister {
    allow: FxHashSet<String>,
    cells: Vec<NameId>,
}

impl LexicalHoister {
    pub fn new<S: AsRef<str>>(allow_list: &[S]) -> Self {
        LexicalHoister {
            allow: allow_list.iter().map(|s| s.as_ref().to_string()).collect(),
            cells: Vec::new(),
        }
    }

    /// Hoisted names; the position is the cell id
    pub fn cells(&self) -> &[NameId] {
        &self.cells
    }
}

impl SiteOptimizer for LexicalHoister {
    fn name(&self) -> &'static str {
        "lex-hoist"
    }

    fn test(&self, site: &Site<'_>) -> bool {
        let Op::GetLex(mn) = &site.instr.op else {
            return false;
        };
        match (&site.resolved, site.name) {
            (Some(name), Some(_)) => {
                mn.is_static() && name.is_public_or_builtin() && self.allow.contains(name.local_name())
            }
            _ => false,
        }
    }

    fn mark(&mut self, site: &Site<'_>) -> Alias {
        let Some(name) = site.name else {
            return Alias(u32::MAX);
        };
        let cell = match self.cells.iter().position(|&n| n == name) {
            Some(existing) => existing,
            None => {
                self.cells.push(name);
                self.cells.len() - 1
            }
        };
        tracing::trace!(position = site.instr.position, cell, "hoisted lexical lookup");
        Alias(cell as u32)
    }

    fn emit(&mut self, alias: Alias, site: &Site<'_>, _names: &mut NameTable<'_>) -> Result<Stmt, CodegenError> {
        let offset = site.instr.position;
        let name = site.name.ok_or(CodegenError::Unresolved { offset })?;
        let depth = site.instr.scope_before.ok_or(CodegenError::Unresolved { offset })?;
        Ok(Stmt::GetHoisted { dest: site.slot, cell: CellId(alias.0), name, depth: narrow(depth, offset)? })
    }

    fn reset(&mut self) {
        self.cells.clear();
    }
}
