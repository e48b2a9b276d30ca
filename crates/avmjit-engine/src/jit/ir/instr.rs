//! Procedure IR: statements, blocks, and procedures
//!
//! A generated procedure works on fixed frame slots. Every operand-stack
//! position the analyzer proved populated becomes a `Slot`; scope-stack
//! positions become `ScopeSlot`s. Statements name their slots explicitly, so
//! executing one never consults a runtime depth.

use std::rc::Rc;

use crate::abc::Name;
use crate::jit::analysis::decoder::{BinaryOp, Compare, Conversion, MemKind, UnaryOp};
use crate::jit::runtime::value::Value;

/// Operand-stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u16);

impl Slot {
    pub fn offset(self, by: u16) -> Slot {
        Slot(self.0 + by)
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Scope-stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeSlot(pub u16);

impl std::fmt::Display for ScopeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Local register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Local(pub u32);

impl std::fmt::Display for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Index into the procedure's referenced-names table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameId(pub u32);

impl std::fmt::Display for NameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Per-invocation or per-method cell used by an optimizer fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(pub u32);

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Block label: the bytecode position the block starts at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub usize);

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Contiguous argument slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Args {
    pub base: Slot,
    pub count: u16,
}

impl Args {
    pub fn new(base: Slot, count: u16) -> Self {
        Args { base, count }
    }

    /// One past the last argument slot
    pub fn end(&self) -> u16 {
        self.base.0 + self.count
    }
}

/// Property name operand: static, or completed from stack slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameExpr {
    Static(NameId),
    Runtime { template: NameId, ns: Option<Slot>, name: Option<Slot> },
}

impl NameExpr {
    pub fn template(&self) -> NameId {
        match self {
            NameExpr::Static(id) | NameExpr::Runtime { template: id, .. } => *id,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, NameExpr::Static(_))
    }
}

/// Branch condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Truthy(Slot),
    Falsy(Slot),
    /// `cmp(lhs, rhs)`, inverted when `negate` (a comparison involving NaN
    /// is false before inversion)
    Compare { cmp: Compare, negate: bool, lhs: Slot, rhs: Slot },
}

/// An IR statement
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    // ===== Stack =====
    Const { dest: Slot, value: Value },
    Move { dest: Slot, src: Slot },
    Swap { a: Slot, b: Slot },

    // ===== Locals =====
    GetLocal { dest: Slot, local: Local },
    SetLocal { local: Local, src: Slot },
    Kill(Local),
    IncLocal { local: Local, delta: i32, int: bool },

    // ===== Arithmetic & conversion (in place unless noted) =====
    Unary { slot: Slot, op: UnaryOp },
    Binary { dest: Slot, op: BinaryOp, lhs: Slot, rhs: Slot },
    Convert { slot: Slot, conv: Conversion },
    Coerce { slot: Slot, ty: NameId },
    AsType { slot: Slot, ty: NameId },
    IsType { slot: Slot, ty: NameId },

    // ===== Scope =====
    PushScope { dest: ScopeSlot, src: Slot, with: bool },
    PopScope(ScopeSlot),
    GetScopeObject { dest: Slot, scope: ScopeSlot },
    GetOuterScope { dest: Slot, index: u32 },
    GetGlobalScope { dest: Slot },
    /// Scope-chain search over the outer scope and local scopes `0..depth`
    FindProperty { dest: Slot, name: NameExpr, strict: bool, depth: u16 },
    FindDef { dest: Slot, name: NameId },
    GetLex { dest: Slot, name: NameId, depth: u16 },
    /// `GetLex` resolved once into a per-method cell
    GetHoisted { dest: Slot, cell: CellId, name: NameId, depth: u16 },

    // ===== Properties =====
    /// `alias` records whether the result is a plain function for later
    /// fast calls through the same slot
    GetProperty { dest: Slot, obj: Slot, name: NameExpr, alias: Option<CellId> },
    /// Chain of static reads behind one receiver guard; the first
    /// null/undefined receiver faults as a plain read would
    GuardedChain { dest: Slot, obj: Slot, names: Vec<NameId> },
    SetProperty { obj: Slot, name: NameExpr, value: Slot },
    InitProperty { obj: Slot, name: NameExpr, value: Slot },
    DeleteProperty { dest: Slot, obj: Slot, name: NameExpr },
    GetSuper { dest: Slot, obj: Slot, name: NameExpr },
    SetSuper { obj: Slot, name: NameExpr, value: Slot },
    GetSlot { dest: Slot, obj: Slot, index: u32 },
    SetSlot { obj: Slot, index: u32, value: Slot },
    GetGlobalSlot { dest: Slot, index: u32 },
    SetGlobalSlot { index: u32, value: Slot },

    // ===== Calls =====
    /// `fast` names the probe cell set by the `GetProperty` that produced
    /// the callee
    Call { dest: Slot, callee: Slot, receiver: Slot, args: Args, fast: Option<CellId> },
    Construct { dest: Slot, ctor: Slot, args: Args },
    CallMethod { dest: Slot, receiver: Slot, disp: u32, args: Args },
    CallStatic { dest: Slot, receiver: Slot, method: u32, args: Args },
    /// `lex` passes null as the receiver; `dest == None` discards the result
    CallProperty { dest: Option<Slot>, obj: Slot, name: NameExpr, args: Args, lex: bool },
    CallSuper { dest: Option<Slot>, obj: Slot, name: NameExpr, args: Args },
    ConstructProp { dest: Slot, obj: Slot, name: NameExpr, args: Args },
    ConstructSuper { obj: Slot, args: Args },

    // ===== Allocation =====
    /// Name/value pairs start at `dest`
    NewObject { dest: Slot, pairs: u16 },
    /// Elements start at `dest`
    NewArray { dest: Slot, count: u16 },
    NewActivation { dest: Slot },
    NewFunction { dest: Slot, method: u32, depth: u16 },
    NewCatch { dest: Slot, index: u32 },
    /// Base type at `dest`, parameters follow
    ApplyType { dest: Slot, count: u16 },

    // ===== Enumeration =====
    HasNext { dest: Slot, obj: Slot, index: Slot },
    HasNext2 { dest: Slot, object: Local, index: Local },
    NextName { dest: Slot, obj: Slot, index: Slot },
    NextValue { dest: Slot, obj: Slot, index: Slot },

    // ===== Domain memory =====
    /// Replaces the address in `slot` with the loaded value
    Load { slot: Slot, kind: MemKind },
    Store { kind: MemKind, value: Slot, addr: Slot },

    // ===== Control =====
    /// Structured conditional: runs `body` unless `cond` holds
    Unless { cond: Cond, body: Vec<Stmt> },
    Jump(Label),
    Branch { cond: Cond, target: Label },
    /// Index in `index`; out-of-range indices take `default`
    Switch { index: Slot, default: Label, cases: Vec<Label> },
    Return(Option<Slot>),
    Throw(Slot),
}

impl Stmt {
    /// Whether control never continues past this statement
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stmt::Jump(_) | Stmt::Switch { .. } | Stmt::Return(_) | Stmt::Throw(_))
    }

    /// Labels this statement may transfer control to
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Stmt::Jump(l) | Stmt::Branch { target: l, .. } => vec![*l],
            Stmt::Switch { default, cases, .. } => std::iter::once(*default).chain(cases.iter().copied()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Visit every statement, including nested structured bodies
pub fn walk_stmts<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in stmts {
        f(stmt);
        if let Stmt::Unless { body, .. } = stmt {
            walk_stmts(body, f);
        }
    }
}

/// Mutable counterpart of [`walk_stmts`]
pub fn walk_stmts_mut(stmts: &mut [Stmt], f: &mut impl FnMut(&mut Stmt)) {
    for stmt in stmts {
        f(stmt);
        if let Stmt::Unless { body, .. } = stmt {
            walk_stmts_mut(body, f);
        }
    }
}

/// A basic block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: Label,
    pub stmts: Vec<Stmt>,
    /// Fall-through successor; `None` when the block ends in a terminal
    pub next: Option<Label>,
    /// Exception handlers covering the block, in table order
    pub handlers: Vec<u16>,
}

/// How control flow is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlShape {
    /// One block, no branches
    Linear,
    /// One block, forward conditionals as nested `Unless`
    Structured,
    /// Label-keyed blocks driven by an instruction pointer
    Dispatcher,
}

/// An exception handler
#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    /// First covered position
    pub start: usize,
    /// First position past the region
    pub end: usize,
    pub target: Label,
    /// Catch type; `None` catches everything
    pub filter: Option<NameId>,
    pub binding: Option<NameId>,
    /// Scope depth on entry to the handler
    pub scope_depth: u16,
}

/// Frame sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    pub params: u32,
    pub locals: u32,
    pub stack: u16,
    pub scope: u16,
}

/// Shared helper bindings a procedure needs at entry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Preamble {
    /// Resolve the domain memory view (lazily, once per invocation)
    pub memory: bool,
    /// Hoisted lookups; the position is the cell id
    pub hoisted: Vec<NameId>,
    /// Fast-call probe cells per invocation
    pub fast_cells: u32,
}

/// A referenced constant-pool name
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencedName {
    /// Multiname index in the constant pool
    pub pool_index: u32,
    pub name: Name,
}

/// A generated procedure
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    /// Disambiguated identifier
    pub name: String,
    pub shape: ControlShape,
    pub blocks: Vec<Block>,
    pub handlers: Vec<Handler>,
    pub frame: FrameLayout,
    pub preamble: Preamble,
    /// Dispatcher iteration bound
    pub fuse: Option<u64>,
    /// Names in order of first use
    pub names: Vec<ReferencedName>,
}

impl Procedure {
    /// Index of the block starting at `label`
    pub fn block_index(&self, label: Label) -> Option<usize> {
        self.blocks.binary_search_by_key(&label, |b| b.label).ok()
    }

    pub fn name(&self, id: NameId) -> Option<&Name> {
        self.names.get(id.0 as usize).map(|r| &r.name)
    }

    /// Pool indices of the referenced names
    pub fn referenced_names(&self) -> Rc<[u32]> {
        self.names.iter().map(|r| r.pool_index).collect()
    }

    /// Total statements, nested bodies included
    pub fn stmt_count(&self) -> usize {
        let mut n = 0;
        for block in &self.blocks {
            walk_stmts(&block.stmts, &mut |_| n += 1);
        }
        n
    }
}
