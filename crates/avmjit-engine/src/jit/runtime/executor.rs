//! Procedure executor
//!
//! Runs a verified [`Procedure`] against a [`MethodContext`] and a host
//! object model. Straight-line and structured procedures run their single
//! block top to bottom; dispatcher procedures loop over label-keyed blocks
//! driven by an instruction pointer, bounded by the optional fuse.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use crate::abc::Name;
use crate::jit::ir::{Args, Block, Cond, ControlShape, Label, Local, NameExpr, NameId, Procedure, Slot, Stmt};
use super::context::MethodContext;
use super::host::{ExecError, HostFault, HostResult, ObjectModel, ScopeEntry};
use super::ops;
use super::value::{to_int32, to_uint32, Value};

/// Execute `procedure` with `this` and `args`
pub fn execute(
    procedure: &Procedure,
    ctx: &MethodContext,
    host: &mut dyn ObjectModel,
    this: Value,
    args: &[Value],
) -> Result<Value, ExecError> {
    let mut exec = Executor { procedure, ctx, host, frame: Frame::new(procedure, this, args) };
    match procedure.shape {
        ControlShape::Linear | ControlShape::Structured => exec.run_single(),
        ControlShape::Dispatcher => exec.run_dispatch(),
    }
}

/// Control outcome of a statement
enum Flow {
    Continue,
    Goto(Label),
    Return(Value),
}

struct Frame {
    stack: Vec<Value>,
    scope: Vec<ScopeEntry>,
    locals: Vec<Value>,
    /// Fast-call probe cells
    fast: Vec<bool>,
    memory: Option<Rc<RefCell<Vec<u8>>>>,
}

impl Frame {
    fn new(procedure: &Procedure, this: Value, args: &[Value]) -> Self {
        let layout = procedure.frame;
        let mut locals = vec![Value::Undefined; layout.locals.max(1) as usize];
        locals[0] = this;
        for (i, arg) in args.iter().take(layout.params as usize).enumerate() {
            if let Some(local) = locals.get_mut(i + 1) {
                *local = arg.clone();
            }
        }
        Frame {
            stack: vec![Value::Undefined; layout.stack as usize],
            scope: vec![ScopeEntry::new(Value::Undefined); layout.scope as usize],
            locals,
            fast: vec![false; procedure.preamble.fast_cells as usize],
            memory: None,
        }
    }
}

struct Executor<'a, 'h> {
    procedure: &'a Procedure,
    ctx: &'a MethodContext,
    host: &'h mut dyn ObjectModel,
    frame: Frame,
}

fn corrupt(what: impl std::fmt::Display) -> ExecError {
    ExecError::Abort(format!("corrupt procedure: {what}"))
}

impl<'a> Executor<'a, '_> {
    fn run_single(&mut self) -> Result<Value, ExecError> {
        let procedure = self.procedure;
        let block = procedure.blocks.first().ok_or_else(|| corrupt("no blocks"))?;
        match self.run_stmts(&block.stmts)? {
            Flow::Return(v) => Ok(v),
            Flow::Continue | Flow::Goto(_) => Err(corrupt("control left a single-block procedure")),
        }
    }

    fn run_dispatch(&mut self) -> Result<Value, ExecError> {
        let procedure = self.procedure;
        let mut ip = procedure.blocks.first().ok_or_else(|| corrupt("no blocks"))?.label;
        let mut fuse = procedure.fuse;
        loop {
            if let Some(remaining) = fuse.as_mut() {
                if *remaining == 0 {
                    tracing::error!(procedure = %procedure.name, ip = ip.0, "dispatch fuse tripped");
                    return Err(ExecError::Abort(format!(
                        "{}: dispatch fuse tripped at {ip}",
                        procedure.name
                    )));
                }
                *remaining -= 1;
            }
            let index = procedure.block_index(ip).ok_or_else(|| corrupt(format!("no block at {ip}")))?;
            let block = &procedure.blocks[index];
            match self.run_stmts(&block.stmts) {
                Ok(Flow::Continue) => {
                    ip = block.next.ok_or_else(|| corrupt(format!("block {} has no successor", block.label)))?;
                }
                Ok(Flow::Goto(target)) => ip = target,
                Ok(Flow::Return(v)) => return Ok(v),
                Err(err) => ip = self.unwind(block, err)?,
            }
        }
    }

    /// Find a handler of `block` that takes `err`; returns its label
    fn unwind(&mut self, block: &Block, err: ExecError) -> Result<Label, ExecError> {
        if block.handlers.is_empty() {
            return Err(err);
        }
        let Some(value) = ops::catchable_value(&mut *self.host, &err) else {
            return Err(err);
        };
        let procedure = self.procedure;
        for &h in &block.handlers {
            let handler = procedure.handlers.get(h as usize).ok_or_else(|| corrupt(format!("handler {h}")))?;
            let filter = handler.filter.map(|id| self.name(id)).transpose()?;
            if ops::catches(&mut *self.host, filter, &value)? {
                tracing::trace!(procedure = %procedure.name, handler = h, target = handler.target.0, "caught");
                let depth = handler.scope_depth as usize;
                for entry in self.frame.scope.iter_mut().skip(depth) {
                    *entry = ScopeEntry::new(Value::Undefined);
                }
                *self.frame.stack.first_mut().ok_or_else(|| corrupt("handler without a stack slot"))? = value;
                return Ok(handler.target);
            }
        }
        Err(err)
    }

    fn run_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow, ExecError> {
        for stmt in stmts {
            match self.step(stmt)? {
                Flow::Continue => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Continue)
    }

    // ===== Frame access =====

    fn get(&self, slot: Slot) -> Value {
        self.frame.stack[slot.0 as usize].clone()
    }

    fn set(&mut self, slot: Slot, value: Value) {
        self.frame.stack[slot.0 as usize] = value;
    }

    fn take(&mut self, slot: Slot) -> Value {
        std::mem::replace(&mut self.frame.stack[slot.0 as usize], Value::Undefined)
    }

    fn local(&self, local: Local) -> Value {
        self.frame.locals[local.0 as usize].clone()
    }

    fn args(&self, args: Args) -> Vec<Value> {
        self.frame.stack[args.base.0 as usize..args.end() as usize].to_vec()
    }

    fn name(&self, id: NameId) -> Result<&'a Name, ExecError> {
        let ctx: &'a MethodContext = self.ctx;
        ctx.name(id.0).ok_or_else(|| corrupt(format!("name {id}")))
    }

    fn resolve(&mut self, expr: &NameExpr) -> Result<Cow<'a, Name>, ExecError> {
        match *expr {
            NameExpr::Static(id) => Ok(Cow::Borrowed(self.name(id)?)),
            NameExpr::Runtime { template, ns, name } => {
                let template = self.name(template)?;
                let ns = ns.map(|s| self.get(s));
                let local = name.map(|s| self.get(s));
                let done = ops::runtime_name(&mut *self.host, template, ns.as_ref(), local.as_ref())?;
                Ok(Cow::Owned(done))
            }
        }
    }

    /// Outer scope chain followed by local scopes `0..depth`
    fn scope_chain(&self, depth: u16) -> Vec<ScopeEntry> {
        self.ctx
            .outer_scope
            .iter()
            .chain(self.frame.scope.iter().take(depth as usize))
            .cloned()
            .collect()
    }

    fn global_scope(&self) -> Value {
        self.ctx
            .outer_scope
            .first()
            .or_else(|| self.frame.scope.first())
            .map_or(Value::Undefined, |e| e.value.clone())
    }

    fn receiver(&self, slot: Slot) -> Result<Value, ExecError> {
        let v = self.get(slot);
        ops::check_receiver(&v)?;
        Ok(v)
    }

    fn memory(&mut self) -> Result<Rc<RefCell<Vec<u8>>>, ExecError> {
        if let Some(mem) = &self.frame.memory {
            return Ok(mem.clone());
        }
        let mem = self
            .host
            .domain_memory()
            .ok_or_else(|| HostFault::range_error(1506, "No domain memory is selected."))?;
        self.frame.memory = Some(mem.clone());
        Ok(mem)
    }

    fn lex(&mut self, name: &Name, depth: u16) -> HostResult<Value> {
        let chain = self.scope_chain(depth);
        let obj = self.host.find_property(&chain, name, true)?;
        self.host.get_property(&obj, name)
    }

    fn cond(&mut self, cond: &Cond) -> HostResult<bool> {
        Ok(match *cond {
            Cond::Truthy(s) => self.get(s).to_boolean(),
            Cond::Falsy(s) => !self.get(s).to_boolean(),
            Cond::Compare { cmp, negate, lhs, rhs } => {
                let (a, b) = (self.get(lhs), self.get(rhs));
                ops::branch_taken(&mut *self.host, cmp, negate, &a, &b)?
            }
        })
    }

    fn index_operand(&mut self, slot: Slot) -> HostResult<u32> {
        let v = self.get(slot);
        Ok(to_uint32(ops::to_number(&mut *self.host, &v)?))
    }

    fn step(&mut self, stmt: &Stmt) -> Result<Flow, ExecError> {
        match stmt {
            // ===== Stack =====
            Stmt::Const { dest, value } => self.set(*dest, value.clone()),
            Stmt::Move { dest, src } => self.set(*dest, self.get(*src)),
            Stmt::Swap { a, b } => self.frame.stack.swap(a.0 as usize, b.0 as usize),

            // ===== Locals =====
            Stmt::GetLocal { dest, local } => self.set(*dest, self.local(*local)),
            Stmt::SetLocal { local, src } => self.frame.locals[local.0 as usize] = self.get(*src),
            Stmt::Kill(local) => self.frame.locals[local.0 as usize] = Value::Undefined,
            Stmt::IncLocal { local, delta, int } => {
                let v = self.local(*local);
                self.frame.locals[local.0 as usize] = ops::increment(&mut *self.host, &v, *delta, *int)?;
            }

            // ===== Arithmetic & conversion =====
            Stmt::Unary { slot, op } => {
                let v = self.get(*slot);
                let r = ops::unary(&mut *self.host, *op, &v)?;
                self.set(*slot, r);
            }
            Stmt::Binary { dest, op, lhs, rhs } => {
                let (a, b) = (self.get(*lhs), self.get(*rhs));
                let r = ops::binary(&mut *self.host, *op, &a, &b)?;
                self.set(*dest, r);
            }
            Stmt::Convert { slot, conv } => {
                let v = self.take(*slot);
                let r = ops::convert(&mut *self.host, *conv, v)?;
                self.set(*slot, r);
            }
            Stmt::Coerce { slot, ty } => {
                let ty = self.name(*ty)?;
                let v = self.take(*slot);
                let r = self.host.coerce(v, ty)?;
                self.set(*slot, r);
            }
            Stmt::AsType { slot, ty } => {
                let ty = self.name(*ty)?;
                let v = self.get(*slot);
                if !self.host.is_type(&v, ty)? {
                    self.set(*slot, Value::Null);
                }
            }
            Stmt::IsType { slot, ty } => {
                let ty = self.name(*ty)?;
                let v = self.get(*slot);
                let r = self.host.is_type(&v, ty)?;
                self.set(*slot, Value::Bool(r));
            }

            // ===== Scope =====
            Stmt::PushScope { dest, src, with } => {
                let value = self.receiver(*src)?;
                self.frame.scope[dest.0 as usize] = ScopeEntry { value, with: *with };
            }
            Stmt::PopScope(slot) => self.frame.scope[slot.0 as usize] = ScopeEntry::new(Value::Undefined),
            Stmt::GetScopeObject { dest, scope } => {
                let v = self.frame.scope[scope.0 as usize].value.clone();
                self.set(*dest, v);
            }
            Stmt::GetOuterScope { dest, index } => {
                let entry = self.ctx.outer_scope.get(*index as usize).ok_or_else(|| {
                    HostFault::verify_error(1019, format!("Getscopeobject {index} is out of bounds."))
                })?;
                self.set(*dest, entry.value.clone());
            }
            Stmt::GetGlobalScope { dest } => self.set(*dest, self.global_scope()),
            Stmt::FindProperty { dest, name, strict, depth } => {
                let name = self.resolve(name)?;
                let chain = self.scope_chain(*depth);
                let v = self.host.find_property(&chain, &name, *strict)?;
                self.set(*dest, v);
            }
            Stmt::FindDef { dest, name } => {
                let name = self.name(*name)?;
                let v = self.host.find_definition(name)?;
                self.set(*dest, v);
            }
            Stmt::GetLex { dest, name, depth } => {
                let name = self.name(*name)?;
                let v = self.lex(name, *depth)?;
                self.set(*dest, v);
            }
            Stmt::GetHoisted { dest, cell, name, depth } => {
                let v = match self.ctx.hoisted(cell.0) {
                    Some(v) => v,
                    None => {
                        let name = self.name(*name)?;
                        let v = self.lex(name, *depth)?;
                        self.ctx.set_hoisted(cell.0, v.clone());
                        v
                    }
                };
                self.set(*dest, v);
            }

            // ===== Properties =====
            Stmt::GetProperty { dest, obj, name, alias } => {
                let name = self.resolve(name)?;
                let o = self.receiver(*obj)?;
                let v = self.host.get_property(&o, &name)?;
                if let Some(cell) = alias {
                    self.frame.fast[cell.0 as usize] = self.host.is_plain_function(&v);
                }
                self.set(*dest, v);
            }
            Stmt::GuardedChain { dest, obj, names } => {
                let mut v = self.get(*obj);
                for id in names {
                    ops::check_receiver(&v)?;
                    let name = self.name(*id)?;
                    v = self.host.get_property(&v, name)?;
                }
                self.set(*dest, v);
            }
            Stmt::SetProperty { obj, name, value } => {
                let name = self.resolve(name)?;
                let (o, v) = (self.receiver(*obj)?, self.get(*value));
                self.host.set_property(&o, &name, v)?;
            }
            Stmt::InitProperty { obj, name, value } => {
                let name = self.resolve(name)?;
                let (o, v) = (self.receiver(*obj)?, self.get(*value));
                self.host.init_property(&o, &name, v)?;
            }
            Stmt::DeleteProperty { dest, obj, name } => {
                let name = self.resolve(name)?;
                let o = self.receiver(*obj)?;
                let r = self.host.delete_property(&o, &name)?;
                self.set(*dest, Value::Bool(r));
            }
            Stmt::GetSuper { dest, obj, name } => {
                let name = self.resolve(name)?;
                let o = self.receiver(*obj)?;
                let v = self.host.get_super(&o, &name)?;
                self.set(*dest, v);
            }
            Stmt::SetSuper { obj, name, value } => {
                let name = self.resolve(name)?;
                let (o, v) = (self.receiver(*obj)?, self.get(*value));
                self.host.set_super(&o, &name, v)?;
            }
            Stmt::GetSlot { dest, obj, index } => {
                let o = self.receiver(*obj)?;
                let v = self.host.get_slot(&o, *index)?;
                self.set(*dest, v);
            }
            Stmt::SetSlot { obj, index, value } => {
                let (o, v) = (self.receiver(*obj)?, self.get(*value));
                self.host.set_slot(&o, *index, v)?;
            }
            Stmt::GetGlobalSlot { dest, index } => {
                let global = self.global_scope();
                let v = self.host.get_slot(&global, *index)?;
                self.set(*dest, v);
            }
            Stmt::SetGlobalSlot { index, value } => {
                let (global, v) = (self.global_scope(), self.get(*value));
                self.host.set_slot(&global, *index, v)?;
            }

            // ===== Calls =====
            Stmt::Call { dest, callee, receiver, args, fast } => {
                let (f, r, a) = (self.get(*callee), self.get(*receiver), self.args(*args));
                let direct = fast.is_some_and(|cell| self.frame.fast[cell.0 as usize]);
                let v = if direct { self.host.call_function(&f, &r, &a)? } else { self.host.call(&f, &r, &a)? };
                self.set(*dest, v);
            }
            Stmt::Construct { dest, ctor, args } => {
                let (c, a) = (self.get(*ctor), self.args(*args));
                let v = self.host.construct(&c, &a)?;
                self.set(*dest, v);
            }
            Stmt::CallMethod { dest, receiver, disp, args } => {
                let r = self.receiver(*receiver)?;
                let a = self.args(*args);
                let v = self.host.call_method(&r, *disp, &a)?;
                self.set(*dest, v);
            }
            Stmt::CallStatic { dest, receiver, method, args } => {
                let r = self.get(*receiver);
                let a = self.args(*args);
                let v = self.host.call_static(&r, *method, &a)?;
                self.set(*dest, v);
            }
            Stmt::CallProperty { dest, obj, name, args, lex } => {
                let name = self.resolve(name)?;
                let o = self.receiver(*obj)?;
                let a = self.args(*args);
                let receiver = if *lex { Value::Null } else { o.clone() };
                let v = self.host.call_property(&o, &name, &receiver, &a)?;
                if let Some(dest) = dest {
                    self.set(*dest, v);
                }
            }
            Stmt::CallSuper { dest, obj, name, args } => {
                let name = self.resolve(name)?;
                let o = self.receiver(*obj)?;
                let a = self.args(*args);
                let v = self.host.call_super(&o, &name, &a)?;
                if let Some(dest) = dest {
                    self.set(*dest, v);
                }
            }
            Stmt::ConstructProp { dest, obj, name, args } => {
                let name = self.resolve(name)?;
                let o = self.receiver(*obj)?;
                let a = self.args(*args);
                let v = self.host.construct_property(&o, &name, &a)?;
                self.set(*dest, v);
            }
            Stmt::ConstructSuper { obj, args } => {
                let o = self.receiver(*obj)?;
                let a = self.args(*args);
                self.host.construct_super(&o, &a)?;
            }

            // ===== Allocation =====
            Stmt::NewObject { dest, pairs } => {
                let start = dest.0 as usize;
                let flat = self.frame.stack[start..start + 2 * *pairs as usize].to_vec();
                let v = ops::new_object(&mut *self.host, &flat)?;
                self.set(*dest, v);
            }
            Stmt::NewArray { dest, count } => {
                let elements = self.args(Args::new(*dest, *count));
                let v = self.host.new_array(elements)?;
                self.set(*dest, v);
            }
            Stmt::NewActivation { dest } => {
                let v = self.host.new_activation(&self.ctx.method)?;
                self.set(*dest, v);
            }
            Stmt::NewFunction { dest, method, depth } => {
                let chain = self.scope_chain(*depth);
                let v = self.host.new_function(*method, chain)?;
                self.set(*dest, v);
            }
            Stmt::NewCatch { dest, index } => {
                let v = self.host.new_catch_scope(*index)?;
                self.set(*dest, v);
            }
            Stmt::ApplyType { dest, count } => {
                let base = self.get(*dest);
                let params = self.args(Args::new(dest.offset(1), *count));
                let v = self.host.apply_type(&base, &params)?;
                self.set(*dest, v);
            }

            // ===== Enumeration =====
            Stmt::HasNext { dest, obj, index } => {
                let o = self.get(*obj);
                let i = self.index_operand(*index)?;
                let next = if o.is_nullish() { 0 } else { self.host.next_index(&o, i)? };
                self.set(*dest, Value::from_u32(next));
            }
            Stmt::HasNext2 { dest, object, index } => {
                let (o, i) = (self.local(*object), self.local(*index));
                let (o, i, more) = ops::has_next2(&mut *self.host, &o, &i)?;
                self.frame.locals[object.0 as usize] = o;
                self.frame.locals[index.0 as usize] = i;
                self.set(*dest, Value::Bool(more));
            }
            Stmt::NextName { dest, obj, index } => {
                let o = self.receiver(*obj)?;
                let i = self.index_operand(*index)?;
                let v = self.host.next_name(&o, i)?;
                self.set(*dest, v);
            }
            Stmt::NextValue { dest, obj, index } => {
                let o = self.receiver(*obj)?;
                let i = self.index_operand(*index)?;
                let v = self.host.next_value(&o, i)?;
                self.set(*dest, v);
            }

            // ===== Domain memory =====
            Stmt::Load { slot, kind } => {
                let addr = self.get(*slot);
                let addr = to_int32(ops::to_number(&mut *self.host, &addr)?);
                let mem = self.memory()?;
                let v = ops::memory_load(&mem.borrow(), *kind, addr)?;
                self.set(*slot, v);
            }
            Stmt::Store { kind, value, addr } => {
                let (v, a) = (self.get(*value), self.get(*addr));
                let v = ops::to_number(&mut *self.host, &v)?;
                let a = to_int32(ops::to_number(&mut *self.host, &a)?);
                let mem = self.memory()?;
                ops::memory_store(&mut mem.borrow_mut(), *kind, a, v)?;
            }

            // ===== Control =====
            Stmt::Unless { cond, body } => {
                if !self.cond(cond)? {
                    return self.run_stmts(body);
                }
            }
            Stmt::Jump(target) => return Ok(Flow::Goto(*target)),
            Stmt::Branch { cond, target } => {
                if self.cond(cond)? {
                    return Ok(Flow::Goto(*target));
                }
            }
            Stmt::Switch { index, default, cases } => {
                let v = self.get(*index);
                let n = ops::to_number(&mut *self.host, &v)?;
                let target = if n >= 0.0 && n.fract() == 0.0 && (n as usize) < cases.len() {
                    cases[n as usize]
                } else {
                    *default
                };
                return Ok(Flow::Goto(target));
            }
            Stmt::Return(slot) => return Ok(Flow::Return(slot.map_or(Value::Undefined, |s| self.get(s)))),
            Stmt::Throw(slot) => return Err(ExecError::Throw(self.get(*slot))),
        }
        Ok(Flow::Continue)
    }
}
