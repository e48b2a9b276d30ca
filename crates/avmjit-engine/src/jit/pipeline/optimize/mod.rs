//! Site optimizers consulted by the code generator
//!
//! Each optimizer looks at static-name sites (property reads, lexical
//! lookups, calls) as the generator walks the instruction list. When `test`
//! accepts a site, the generator asks it to `mark` the site and `emit` the
//! replacement statement; otherwise the generic template is used. State is
//! reset at the start of every compile and never shared across methods.

pub mod fast_call;
pub mod lex_hoist;
pub mod null_guard;
pub mod trivial_ctor;

use std::collections::BTreeSet;

use crate::abc::Name;
use crate::jit::analysis::Instruction;
use crate::jit::ir::{NameId, Slot, Stmt};
use super::codegen::{CodegenError, NameTable};

pub use fast_call::FastCallCache;
pub use lex_hoist::LexicalHoister;
pub use null_guard::NullGuardCoalescer;
pub use trivial_ctor::TrivialCtorDetector;

/// An instruction as an optimizer sees it
#[derive(Debug)]
pub struct Site<'a> {
    /// Index of the instruction in the method
    pub ordinal: usize,
    pub instr: &'a Instruction,
    /// The whole instruction list, for lookahead
    pub instrs: &'a [Instruction],
    /// Block boundaries; code may not be merged across them
    pub labels: &'a BTreeSet<usize>,
    /// Lowest stack slot the instruction touches
    pub slot: Slot,
    /// Static name operand, interned
    pub name: Option<NameId>,
    pub resolved: Option<Name>,
}

impl Site<'_> {
    /// Whether control can enter this instruction other than by falling
    /// through from its predecessor
    pub fn is_join(&self) -> bool {
        self.labels.contains(&self.instr.position)
    }
}

/// Handle an optimizer hands out for a marked site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Alias(pub u32);

/// A peephole optimizer over static-name sites
pub trait SiteOptimizer {
    /// Name of this optimizer (for diagnostics)
    fn name(&self) -> &'static str;

    /// Whether this optimizer takes `site`
    fn test(&self, site: &Site<'_>) -> bool;

    /// Record an accepted site
    fn mark(&mut self, site: &Site<'_>) -> Alias;

    /// Replacement statement for a marked site
    fn emit(&mut self, alias: Alias, site: &Site<'_>, names: &mut NameTable<'_>) -> Result<Stmt, CodegenError>;

    /// Instructions after the site that the emitted statement absorbs
    fn absorbed(&self, _alias: Alias) -> usize {
        0
    }

    /// Observe an instruction before it is generated
    fn advance(&mut self, _site: &Site<'_>) {}

    /// Observe an instruction after it is generated
    fn settle(&mut self, _site: &Site<'_>) {}

    /// Forget all per-method state
    fn reset(&mut self);
}
