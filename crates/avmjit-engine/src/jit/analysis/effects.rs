//! Static stack and scope effects of each instruction
//!
//! One exhaustive table: adding an `Op` variant without an entry here fails
//! to compile.

use super::decoder::{CallKind, Op};

/// How an instruction changes the operand and scope stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effect {
    /// Values consumed from the operand stack
    pub pops: u32,
    /// Values pushed onto the operand stack
    pub pushes: u32,
    /// Entries removed from the scope stack
    pub scope_pops: u32,
    /// Entries pushed onto the scope stack
    pub scope_pushes: u32,
    /// Minimum scope depth the instruction reads
    pub scope_reads: u32,
    /// Control never falls through
    pub terminal: bool,
}

impl Effect {
    pub const fn new(pops: u32, pushes: u32) -> Self {
        Effect { pops, pushes, scope_pops: 0, scope_pushes: 0, scope_reads: 0, terminal: false }
    }

    const fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    const fn scope(mut self, pops: u32, pushes: u32) -> Self {
        self.scope_pops = pops;
        self.scope_pushes = pushes;
        self
    }

    const fn reads_scope(mut self, depth: u32) -> Self {
        self.scope_reads = depth;
        self
    }

    /// Net effect on stack depth
    pub fn stack_delta(&self) -> i64 {
        i64::from(self.pushes) - i64::from(self.pops)
    }

    /// Net effect on scope depth
    pub fn scope_delta(&self) -> i64 {
        i64::from(self.scope_pushes) - i64::from(self.scope_pops)
    }

    /// Scope depth needed on entry
    pub fn scope_required(&self) -> u32 {
        self.scope_pops.max(self.scope_reads)
    }
}

impl Op {
    /// Static effect of this instruction
    pub fn effect(&self) -> Effect {
        match self {
            // Control
            Op::Nop | Op::Kill(_) => Effect::new(0, 0),
            Op::Throw => Effect::new(1, 0).terminal(),
            Op::Jump(_) => Effect::new(0, 0).terminal(),
            Op::IfTrue(_) | Op::IfFalse(_) => Effect::new(1, 0),
            Op::IfCompare { .. } => Effect::new(2, 0),
            Op::LookupSwitch { .. } => Effect::new(1, 0).terminal(),
            Op::ReturnVoid => Effect::new(0, 0).terminal(),
            Op::ReturnValue => Effect::new(1, 0).terminal(),

            // Stack & literals
            Op::Pop => Effect::new(1, 0),
            Op::Dup => Effect::new(1, 2),
            Op::Swap => Effect::new(2, 2),
            Op::PushNull
            | Op::PushUndefined
            | Op::PushTrue
            | Op::PushFalse
            | Op::PushNaN
            | Op::PushInt(_)
            | Op::PushUInt(_)
            | Op::PushDouble(_)
            | Op::PushString(_)
            | Op::PushNamespace(_) => Effect::new(0, 1),

            // Locals
            Op::GetLocal(_) => Effect::new(0, 1),
            Op::SetLocal(_) => Effect::new(1, 0),
            Op::IncLocal { .. } => Effect::new(0, 0),

            // Scope
            Op::PushScope | Op::PushWith => Effect::new(1, 0).scope(0, 1),
            Op::PopScope => Effect::new(0, 0).scope(1, 0),
            Op::GetScopeObject(i) => Effect::new(0, 1).reads_scope(i.saturating_add(1)),
            Op::GetOuterScope(_) | Op::GetGlobalScope => Effect::new(0, 1),

            // Properties
            Op::FindProperty { name, .. } => Effect::new(name.runtime.extra_pops(), 1),
            Op::FindDef(_) | Op::GetLex(_) => Effect::new(0, 1),
            Op::GetProperty(n) | Op::GetSuper(n) | Op::DeleteProperty(n) => {
                Effect::new(1 + n.runtime.extra_pops(), 1)
            }
            Op::SetProperty(n) | Op::InitProperty(n) | Op::SetSuper(n) => {
                Effect::new(2 + n.runtime.extra_pops(), 0)
            }
            Op::GetSlot(_) => Effect::new(1, 1),
            Op::SetSlot(_) => Effect::new(2, 0),
            Op::GetGlobalSlot(_) => Effect::new(0, 1),
            Op::SetGlobalSlot(_) => Effect::new(1, 0),

            // Calls: receiver and arguments are consumed. Counts come from
            // the bytecode, so they saturate; an oversized count underruns.
            Op::Call(argc) => Effect::new(argc.saturating_add(2), 1),
            Op::Construct(argc) => Effect::new(argc.saturating_add(1), 1),
            Op::CallMethod { argc, .. } | Op::CallStatic { argc, .. } => Effect::new(argc.saturating_add(1), 1),
            Op::CallProperty { name, argc, kind } => Effect::new(
                argc.saturating_add(1 + name.runtime.extra_pops()),
                if *kind == CallKind::Void { 0 } else { 1 },
            ),
            Op::CallSuper { name, argc, void } => {
                Effect::new(argc.saturating_add(1 + name.runtime.extra_pops()), if *void { 0 } else { 1 })
            }
            Op::ConstructProp { name, argc } => Effect::new(argc.saturating_add(1 + name.runtime.extra_pops()), 1),
            Op::ConstructSuper(argc) => Effect::new(argc.saturating_add(1), 0),

            // Allocation
            Op::NewObject(pairs) => Effect::new(pairs.saturating_mul(2), 1),
            Op::NewArray(n) => Effect::new(*n, 1),
            Op::NewActivation | Op::NewFunction(_) | Op::NewCatch(_) => Effect::new(0, 1),
            Op::ApplyType(argc) => Effect::new(argc.saturating_add(1), 1),

            // Enumeration
            Op::HasNext | Op::NextName | Op::NextValue => Effect::new(2, 1),
            Op::HasNext2 { .. } => Effect::new(0, 1),

            // Types & arithmetic
            Op::Convert(_) | Op::Coerce(_) | Op::AsType(_) | Op::IsType(_) | Op::Unary(_) => {
                Effect::new(1, 1)
            }
            Op::Binary(_) => Effect::new(2, 1),

            // Domain memory
            Op::Load(_) => Effect::new(1, 1),
            Op::Store(_) => Effect::new(2, 0),
        }
    }

    /// Explicit branch targets, in order (default first for switches)
    pub fn jump_targets(&self) -> &[usize] {
        match self {
            Op::Jump(t) | Op::IfTrue(t) | Op::IfFalse(t) | Op::IfCompare { target: t, .. } => {
                std::slice::from_ref(t)
            }
            Op::LookupSwitch { targets } => targets,
            _ => &[],
        }
    }

    /// Whether the instruction looks values up through the scope chain
    pub fn reads_scope_chain(&self) -> bool {
        matches!(
            self,
            Op::FindProperty { .. }
                | Op::FindDef(_)
                | Op::GetLex(_)
                | Op::GetScopeObject(_)
                | Op::GetGlobalScope
                | Op::NewFunction(_)
        )
    }

    /// Whether the instruction pushes onto or pops the scope stack
    pub fn writes_scope_chain(&self) -> bool {
        matches!(self, Op::PushScope | Op::PushWith | Op::PopScope)
    }

    /// Whether the instruction touches domain memory
    pub fn uses_memory(&self) -> bool {
        matches!(self, Op::Load(_) | Op::Store(_))
    }
}
