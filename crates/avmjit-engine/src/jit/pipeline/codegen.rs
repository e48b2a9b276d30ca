//! Code generator: annotated instruction list → procedure
//!
//! Every reachable instruction is lowered through one exhaustive match over
//! its typed op. Operand-stack positions come straight from the analyzer's
//! depths, so each statement names fixed slots. The lowered statements are
//! then assembled into one of three control shapes:
//!
//! - `Linear`: no jump targets and no exception regions, one block
//! - `Structured`: forward conditionals to a single target, nested `Unless`
//! - `Dispatcher`: label-keyed blocks driven by an instruction pointer

use std::collections::BTreeSet;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::abc::{ConstantPool, MethodBody, Name, PoolError};
use crate::jit::analysis::decoder::CallKind;
use crate::jit::analysis::{Instruction, MethodAnalysis, MnOperand, Op};
use crate::jit::flags::OptimizerFlags;
use crate::jit::ir::instr::walk_stmts_mut;
use crate::jit::ir::{
    Args, Block, CellId, Cond, ControlShape, FrameLayout, Handler, Label, Local, NameExpr, NameId, Preamble,
    Procedure, ReferencedName, ScopeSlot, Slot, Stmt,
};
use crate::jit::runtime::value::Value;
use crate::jit::JitConfig;
use super::optimize::{FastCallCache, LexicalHoister, NullGuardCoalescer, Site, SiteOptimizer};

/// Errors from code generation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodegenError {
    #[error("constant pool error at offset {offset}: {source}")]
    Constant { offset: usize, source: PoolError },
    #[error("operand {value} at offset {offset} exceeds the frame limit")]
    TooLarge { offset: usize, value: u32 },
    #[error("local register {local} out of range at offset {offset}")]
    LocalOutOfRange { offset: usize, local: u32 },
    #[error("unresolved depth or operand at offset {offset}")]
    Unresolved { offset: usize },
}

/// Narrow a depth or count to a frame index
pub(crate) fn narrow(value: u32, offset: usize) -> Result<u16, CodegenError> {
    u16::try_from(value).map_err(|_| CodegenError::TooLarge { offset, value })
}

fn slot(n: u32, offset: usize) -> Result<Slot, CodegenError> {
    narrow(n, offset).map(Slot)
}

/// Names referenced by a procedure, deduplicated and numbered in order of
/// first use
#[derive(Debug)]
pub struct NameTable<'p> {
    pool: &'p ConstantPool,
    ids: FxHashMap<u32, NameId>,
    names: Vec<ReferencedName>,
}

impl<'p> NameTable<'p> {
    pub fn new(pool: &'p ConstantPool) -> Self {
        NameTable { pool, ids: FxHashMap::default(), names: Vec::new() }
    }

    /// Id of pool multiname `index`, resolving it on first use
    pub fn intern(&mut self, index: u32, offset: usize) -> Result<NameId, CodegenError> {
        if let Some(&id) = self.ids.get(&index) {
            return Ok(id);
        }
        let name = self.pool.resolve_name(index).map_err(|source| CodegenError::Constant { offset, source })?;
        let id = NameId(self.names.len() as u32);
        self.names.push(ReferencedName { pool_index: index, name });
        self.ids.insert(index, id);
        Ok(id)
    }

    pub fn get(&self, id: NameId) -> Option<&Name> {
        self.names.get(id.0 as usize).map(|r| &r.name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn into_names(self) -> Vec<ReferencedName> {
        self.names
    }
}

/// The optimizers enabled for one compile, in consultation order
struct Optimizers {
    null_guard: Option<NullGuardCoalescer>,
    lex_hoist: Option<LexicalHoister>,
    fast_call: Option<FastCallCache>,
}

impl Optimizers {
    fn from_config(config: &JitConfig) -> Self {
        let flags = config.flags;
        Optimizers {
            null_guard: flags
                .contains(OptimizerFlags::NULL_GUARD)
                .then(|| NullGuardCoalescer::new(config.null_guard_roots.as_slice())),
            lex_hoist: flags
                .contains(OptimizerFlags::LEX_HOIST)
                .then(|| LexicalHoister::new(config.hoist_allow_list.as_slice())),
            fast_call: flags
                .contains(OptimizerFlags::FAST_CALL)
                .then(|| FastCallCache::new(config.fast_call_window)),
        }
    }

    fn each(&mut self) -> Vec<&mut dyn SiteOptimizer> {
        let mut all: Vec<&mut dyn SiteOptimizer> = Vec::with_capacity(3);
        if let Some(o) = self.null_guard.as_mut() {
            all.push(o);
        }
        if let Some(o) = self.lex_hoist.as_mut() {
            all.push(o);
        }
        if let Some(o) = self.fast_call.as_mut() {
            all.push(o);
        }
        all
    }
}

/// Generate a procedure named `name` from a rewritten analysis
pub fn generate(
    analysis: &MethodAnalysis,
    body: &MethodBody,
    pool: &ConstantPool,
    config: &JitConfig,
    name: String,
) -> Result<Procedure, CodegenError> {
    let shape = choose_shape(analysis);
    let labels = block_labels(analysis, shape);

    let mut generator = Generator {
        instrs: &analysis.instructions,
        labels: &labels,
        names: NameTable::new(pool),
        locals: body.local_count.max(body.param_count + 1),
        opts: Optimizers::from_config(config),
    };
    for opt in generator.opts.each() {
        opt.reset();
    }
    let lowered = generator.lower_all()?;

    let mut blocks = match shape {
        ControlShape::Linear => vec![Block {
            label: Label(0),
            stmts: lowered.into_iter().flatten().collect(),
            next: None,
            handlers: Vec::new(),
        }],
        ControlShape::Structured => vec![structured_block(analysis, lowered)?],
        ControlShape::Dispatcher => dispatcher_blocks(analysis, &labels, lowered),
    };

    let mut handlers = Vec::with_capacity(analysis.regions.len());
    for region in &analysis.regions {
        let offset = region.target;
        let filter = region.filter.map(|ty| generator.names.intern(ty, offset)).transpose()?;
        let binding = region.binding.map(|b| generator.names.intern(b, offset)).transpose()?;
        let entry = analysis.at(region.target).and_then(|i| i.scope_before).unwrap_or(0);
        handlers.push(Handler {
            start: region.start,
            end: region.end,
            target: Label(region.target),
            filter,
            binding,
            scope_depth: narrow(entry, offset)?,
        });
    }

    let fast_cells = fixup_fast_cells(&mut blocks);
    let hoisted = generator.opts.lex_hoist.as_ref().map(|h| h.cells().to_vec()).unwrap_or_default();
    let fuse = (shape == ControlShape::Dispatcher && config.flags.contains(OptimizerFlags::DISPATCH_FUSE))
        .then_some(config.dispatch_fuse_limit);

    Ok(Procedure {
        name,
        shape,
        blocks,
        handlers,
        frame: FrameLayout {
            params: body.param_count,
            locals: generator.locals,
            stack: narrow(analysis.max_stack, 0)?,
            scope: narrow(analysis.max_scope, 0)?,
        },
        preamble: Preamble { memory: analysis.uses_memory, hoisted, fast_cells },
        fuse,
        names: generator.names.into_names(),
    })
}

/// Pick the simplest shape that can express the method's control flow
pub fn choose_shape(analysis: &MethodAnalysis) -> ControlShape {
    let targets = analysis.branch_targets();
    if analysis.regions.is_empty() && targets.is_empty() {
        return ControlShape::Linear;
    }
    let conditionals_only = analysis
        .reachable()
        .all(|i| !matches!(i.op, Op::Jump(_) | Op::LookupSwitch { .. }));
    if analysis.regions.is_empty() && !analysis.has_back_edge && targets.len() == 1 && conditionals_only {
        ControlShape::Structured
    } else {
        ControlShape::Dispatcher
    }
}

/// Positions where code may be entered other than by falling through
fn block_labels(analysis: &MethodAnalysis, shape: ControlShape) -> BTreeSet<usize> {
    let mut labels = analysis.join_points.clone();
    if shape == ControlShape::Dispatcher {
        labels.insert(0);
        for region in &analysis.regions {
            labels.extend([region.start, region.end, region.target]);
        }
        labels.retain(|&p| p < analysis.code_len && analysis.index_of(p).is_some());
    }
    labels
}

struct Generator<'a> {
    instrs: &'a [Instruction],
    labels: &'a BTreeSet<usize>,
    names: NameTable<'a>,
    locals: u32,
    opts: Optimizers,
}

impl<'a> Generator<'a> {
    /// Lowered statements per instruction; empty for unreachable and
    /// absorbed instructions
    fn lower_all(&mut self) -> Result<Vec<Vec<Stmt>>, CodegenError> {
        let instrs = self.instrs;
        let mut out = vec![Vec::new(); instrs.len()];
        let mut i = 0;
        while i < instrs.len() {
            let instr = &instrs[i];
            if !instr.is_reachable() {
                i += 1;
                continue;
            }
            let site = self.site(i)?;
            for opt in self.opts.each() {
                opt.advance(&site);
            }

            let mut absorbed = 0;
            let mut taken = false;
            for opt in self.opts.each() {
                if opt.test(&site) {
                    let alias = opt.mark(&site);
                    out[i].push(opt.emit(alias, &site, &mut self.names)?);
                    absorbed = opt.absorbed(alias);
                    taken = true;
                    break;
                }
            }
            if !taken {
                self.lower(instr, &mut out[i])?;
            }
            for opt in self.opts.each() {
                opt.settle(&site);
            }

            for j in i + 1..=i + absorbed {
                let skipped = self.site(j)?;
                for opt in self.opts.each() {
                    opt.advance(&skipped);
                    opt.settle(&skipped);
                }
            }
            i += 1 + absorbed;
        }
        Ok(out)
    }

    fn site(&mut self, i: usize) -> Result<Site<'a>, CodegenError> {
        let instrs = self.instrs;
        let instr = &instrs[i];
        let offset = instr.position;
        let depth = instr.stack_before.ok_or(CodegenError::Unresolved { offset })?;
        let name = match &instr.op {
            Op::GetProperty(mn) | Op::GetLex(mn) if mn.is_static() => Some(self.names.intern(mn.index, offset)?),
            _ => None,
        };
        Ok(Site {
            ordinal: i,
            instr,
            instrs,
            labels: self.labels,
            slot: slot(depth.saturating_sub(instr.effect.pops), offset)?,
            name,
            resolved: name.and_then(|id| self.names.get(id).cloned()),
        })
    }

    fn local(&self, reg: u32, offset: usize) -> Result<Local, CodegenError> {
        if reg >= self.locals {
            return Err(CodegenError::LocalOutOfRange { offset, local: reg });
        }
        Ok(Local(reg))
    }

    /// Name operand whose runtime parts (if any) start at stack depth `at`
    fn name_expr(&mut self, mn: &MnOperand, at: u32, offset: usize) -> Result<NameExpr, CodegenError> {
        let template = self.names.intern(mn.index, offset)?;
        if mn.is_static() {
            return Ok(NameExpr::Static(template));
        }
        let mut next = at;
        let ns = if mn.runtime.has_namespace() {
            next += 1;
            Some(slot(next - 1, offset)?)
        } else {
            None
        };
        let name = if mn.runtime.has_name() { Some(slot(next, offset)?) } else { None };
        Ok(NameExpr::Runtime { template, ns, name })
    }

    fn lower(&mut self, instr: &Instruction, out: &mut Vec<Stmt>) -> Result<(), CodegenError> {
        let offset = instr.position;
        let depth = instr.stack_before.ok_or(CodegenError::Unresolved { offset })?;
        let scope = instr.scope_before.ok_or(CodegenError::Unresolved { offset })?;
        let b = depth.checked_sub(instr.effect.pops).ok_or(CodegenError::Unresolved { offset })?;
        let s = |n: u32| slot(n, offset);
        let base = s(b)?;
        let count = |n: u32| narrow(n, offset);

        let stmt = match &instr.op {
            // ===== Control =====
            Op::Nop | Op::Pop => return Ok(()),
            Op::Kill(r) => Stmt::Kill(self.local(*r, offset)?),
            Op::Throw => Stmt::Throw(base),
            Op::Jump(t) => Stmt::Jump(Label(*t)),
            Op::IfTrue(t) => Stmt::Branch { cond: Cond::Truthy(base), target: Label(*t) },
            Op::IfFalse(t) => Stmt::Branch { cond: Cond::Falsy(base), target: Label(*t) },
            Op::IfCompare { cmp, negate, target } => Stmt::Branch {
                cond: Cond::Compare { cmp: *cmp, negate: *negate, lhs: base, rhs: base.offset(1) },
                target: Label(*target),
            },
            Op::LookupSwitch { targets } => {
                let (default, cases) = targets.split_first().ok_or(CodegenError::Unresolved { offset })?;
                Stmt::Switch { index: base, default: Label(*default), cases: cases.iter().map(|&t| Label(t)).collect() }
            }
            Op::ReturnVoid => Stmt::Return(None),
            Op::ReturnValue => Stmt::Return(Some(base)),

            // ===== Stack & literals =====
            Op::Dup => Stmt::Move { dest: s(depth)?, src: s(depth - 1)? },
            Op::Swap => Stmt::Swap { a: base, b: base.offset(1) },
            Op::PushNull => Stmt::Const { dest: base, value: Value::Null },
            Op::PushUndefined => Stmt::Const { dest: base, value: Value::Undefined },
            Op::PushTrue => Stmt::Const { dest: base, value: Value::Bool(true) },
            Op::PushFalse => Stmt::Const { dest: base, value: Value::Bool(false) },
            Op::PushNaN => Stmt::Const { dest: base, value: Value::Number(f64::NAN) },
            Op::PushInt(i) => Stmt::Const { dest: base, value: Value::Int(*i) },
            Op::PushUInt(u) => Stmt::Const { dest: base, value: Value::from_u32(*u) },
            Op::PushDouble(d) => Stmt::Const { dest: base, value: Value::from_f64(*d) },
            Op::PushString(st) => Stmt::Const { dest: base, value: Value::String(st.clone()) },
            Op::PushNamespace(ns) => Stmt::Const { dest: base, value: Value::Namespace(Rc::new(ns.clone())) },

            // ===== Locals =====
            Op::GetLocal(r) => Stmt::GetLocal { dest: base, local: self.local(*r, offset)? },
            Op::SetLocal(r) => Stmt::SetLocal { local: self.local(*r, offset)?, src: base },
            Op::IncLocal { reg, delta, int } => {
                Stmt::IncLocal { local: self.local(*reg, offset)?, delta: *delta, int: *int }
            }

            // ===== Scope =====
            Op::PushScope | Op::PushWith => Stmt::PushScope {
                dest: ScopeSlot(count(scope)?),
                src: base,
                with: instr.op == Op::PushWith,
            },
            Op::PopScope => {
                let top = scope.checked_sub(1).ok_or(CodegenError::Unresolved { offset })?;
                Stmt::PopScope(ScopeSlot(count(top)?))
            }
            Op::GetScopeObject(n) => Stmt::GetScopeObject { dest: base, scope: ScopeSlot(count(*n)?) },
            Op::GetOuterScope(n) => Stmt::GetOuterScope { dest: base, index: *n },
            Op::GetGlobalScope => Stmt::GetGlobalScope { dest: base },
            Op::FindProperty { name, strict } => Stmt::FindProperty {
                dest: base,
                name: self.name_expr(name, b, offset)?,
                strict: *strict,
                depth: count(scope)?,
            },
            Op::FindDef(mn) => Stmt::FindDef { dest: base, name: self.names.intern(mn.index, offset)? },
            Op::GetLex(mn) => {
                Stmt::GetLex { dest: base, name: self.names.intern(mn.index, offset)?, depth: count(scope)? }
            }

            // ===== Properties =====
            Op::GetProperty(mn) => {
                Stmt::GetProperty { dest: base, obj: base, name: self.name_expr(mn, b + 1, offset)?, alias: None }
            }
            Op::SetProperty(mn) => {
                Stmt::SetProperty { obj: base, name: self.name_expr(mn, b + 1, offset)?, value: s(depth - 1)? }
            }
            Op::InitProperty(mn) => {
                Stmt::InitProperty { obj: base, name: self.name_expr(mn, b + 1, offset)?, value: s(depth - 1)? }
            }
            Op::DeleteProperty(mn) => {
                Stmt::DeleteProperty { dest: base, obj: base, name: self.name_expr(mn, b + 1, offset)? }
            }
            Op::GetSuper(mn) => Stmt::GetSuper { dest: base, obj: base, name: self.name_expr(mn, b + 1, offset)? },
            Op::SetSuper(mn) => {
                Stmt::SetSuper { obj: base, name: self.name_expr(mn, b + 1, offset)?, value: s(depth - 1)? }
            }
            Op::GetSlot(index) => Stmt::GetSlot { dest: base, obj: base, index: *index },
            Op::SetSlot(index) => Stmt::SetSlot { obj: base, index: *index, value: base.offset(1) },
            Op::GetGlobalSlot(index) => Stmt::GetGlobalSlot { dest: base, index: *index },
            Op::SetGlobalSlot(index) => Stmt::SetGlobalSlot { index: *index, value: base },

            // ===== Calls =====
            Op::Call(argc) => Stmt::Call {
                dest: base,
                callee: base,
                receiver: base.offset(1),
                args: Args::new(base.offset(2), count(*argc)?),
                fast: None,
            },
            Op::Construct(argc) => Stmt::Construct { dest: base, ctor: base, args: Args::new(base.offset(1), count(*argc)?) },
            Op::CallMethod { disp, argc } => Stmt::CallMethod {
                dest: base,
                receiver: base,
                disp: *disp,
                args: Args::new(base.offset(1), count(*argc)?),
            },
            Op::CallStatic { method, argc } => Stmt::CallStatic {
                dest: base,
                receiver: base,
                method: *method,
                args: Args::new(base.offset(1), count(*argc)?),
            },
            Op::CallProperty { name, argc, kind } => {
                let args = Args::new(s(b + 1 + name.runtime.extra_pops())?, count(*argc)?);
                Stmt::CallProperty {
                    dest: (*kind != CallKind::Void).then_some(base),
                    obj: base,
                    name: self.name_expr(name, b + 1, offset)?,
                    args,
                    lex: *kind == CallKind::Lex,
                }
            }
            Op::CallSuper { name, argc, void } => {
                let args = Args::new(s(b + 1 + name.runtime.extra_pops())?, count(*argc)?);
                Stmt::CallSuper {
                    dest: (!*void).then_some(base),
                    obj: base,
                    name: self.name_expr(name, b + 1, offset)?,
                    args,
                }
            }
            Op::ConstructProp { name, argc } => {
                let args = Args::new(s(b + 1 + name.runtime.extra_pops())?, count(*argc)?);
                Stmt::ConstructProp { dest: base, obj: base, name: self.name_expr(name, b + 1, offset)?, args }
            }
            Op::ConstructSuper(argc) => Stmt::ConstructSuper { obj: base, args: Args::new(base.offset(1), count(*argc)?) },

            // ===== Allocation =====
            Op::NewObject(pairs) => Stmt::NewObject { dest: base, pairs: count(*pairs)? },
            Op::NewArray(n) => Stmt::NewArray { dest: base, count: count(*n)? },
            Op::NewActivation => Stmt::NewActivation { dest: base },
            Op::NewFunction(method) => Stmt::NewFunction { dest: base, method: *method, depth: count(scope)? },
            Op::NewCatch(index) => Stmt::NewCatch { dest: base, index: *index },
            Op::ApplyType(argc) => Stmt::ApplyType { dest: base, count: count(*argc)? },

            // ===== Enumeration =====
            Op::HasNext => Stmt::HasNext { dest: base, obj: base, index: base.offset(1) },
            Op::HasNext2 { object_reg, index_reg } => Stmt::HasNext2 {
                dest: base,
                object: self.local(*object_reg, offset)?,
                index: self.local(*index_reg, offset)?,
            },
            Op::NextName => Stmt::NextName { dest: base, obj: base, index: base.offset(1) },
            Op::NextValue => Stmt::NextValue { dest: base, obj: base, index: base.offset(1) },

            // ===== Types & arithmetic =====
            Op::Convert(conv) => Stmt::Convert { slot: base, conv: *conv },
            Op::Coerce(mn) => Stmt::Coerce { slot: base, ty: self.names.intern(mn.index, offset)? },
            Op::AsType(mn) => Stmt::AsType { slot: base, ty: self.names.intern(mn.index, offset)? },
            Op::IsType(mn) => Stmt::IsType { slot: base, ty: self.names.intern(mn.index, offset)? },
            Op::Unary(op) => Stmt::Unary { slot: base, op: *op },
            Op::Binary(op) => Stmt::Binary { dest: base, op: *op, lhs: base, rhs: base.offset(1) },

            // ===== Domain memory =====
            Op::Load(kind) => Stmt::Load { slot: base, kind: *kind },
            Op::Store(kind) => Stmt::Store { kind: *kind, value: base, addr: base.offset(1) },
        };
        out.push(stmt);
        Ok(())
    }
}

/// Fold forward conditionals to the single join target into nested
/// `Unless` bodies
fn structured_block(analysis: &MethodAnalysis, lowered: Vec<Vec<Stmt>>) -> Result<Block, CodegenError> {
    let target = analysis.branch_targets().into_iter().next().ok_or(CodegenError::Unresolved { offset: 0 })?;
    let mut open: Vec<(Cond, Vec<Stmt>)> = Vec::new();
    let mut current = Vec::new();
    for (instr, stmts) in analysis.instructions.iter().zip(lowered) {
        if instr.position == target {
            while let Some((cond, outer)) = open.pop() {
                let body = std::mem::replace(&mut current, outer);
                current.push(Stmt::Unless { cond, body });
            }
        }
        for stmt in stmts {
            match stmt {
                Stmt::Branch { cond, .. } => open.push((cond, std::mem::take(&mut current))),
                other => current.push(other),
            }
        }
    }
    if !open.is_empty() {
        return Err(CodegenError::Unresolved { offset: target });
    }
    Ok(Block { label: Label(0), stmts: current, next: None, handlers: Vec::new() })
}

/// Split the lowered statements into one block per label
fn dispatcher_blocks(analysis: &MethodAnalysis, labels: &BTreeSet<usize>, lowered: Vec<Vec<Stmt>>) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(labels.len());
    let mut last: Option<&Instruction> = None;
    for (instr, stmts) in analysis.instructions.iter().zip(lowered) {
        if labels.contains(&instr.position) {
            close_block(blocks.last_mut(), last.take());
            if instr.is_reachable() {
                blocks.push(Block {
                    label: Label(instr.position),
                    stmts: Vec::new(),
                    next: None,
                    handlers: analysis
                        .regions
                        .iter()
                        .filter(|r| r.covers(instr.position))
                        .map(|r| r.index as u16)
                        .collect(),
                });
            }
        }
        if !instr.is_reachable() {
            continue;
        }
        if let Some(block) = blocks.last_mut() {
            block.stmts.extend(stmts);
            last = Some(instr);
        }
    }
    close_block(blocks.last_mut(), last);
    blocks
}

/// Give a block its fall-through successor
fn close_block(block: Option<&mut Block>, last: Option<&Instruction>) {
    if let (Some(block), Some(last)) = (block, last) {
        if !last.is_terminal() {
            block.next = Some(Label(last.position + last.size));
        }
    }
}

/// Drop probe cells no call reads and number the rest densely
fn fixup_fast_cells(blocks: &mut [Block]) -> u32 {
    let mut used = rustc_hash::FxHashSet::default();
    for block in blocks.iter_mut() {
        walk_stmts_mut(&mut block.stmts, &mut |stmt| {
            if let Stmt::Call { fast: Some(cell), .. } = stmt {
                used.insert(cell.0);
            }
        });
    }
    let mut renumbered: FxHashMap<u32, u32> = FxHashMap::default();
    let mut renumber = |cell: CellId| {
        let next = renumbered.len() as u32;
        CellId(*renumbered.entry(cell.0).or_insert(next))
    };
    for block in blocks.iter_mut() {
        walk_stmts_mut(&mut block.stmts, &mut |stmt| match stmt {
            Stmt::GetProperty { alias, .. } => {
                *alias = alias.filter(|c| used.contains(&c.0)).map(&mut renumber);
            }
            Stmt::Call { fast: Some(cell), .. } => *cell = renumber(*cell),
            _ => {}
        });
    }
    renumbered.len() as u32
}
