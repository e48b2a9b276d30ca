//! Fallback bytecode interpreter
//!
//! Runs a method body directly, decoding one instruction at a time. Methods
//! the pipeline rejects still execute here, with the same semantics as a
//! compiled procedure since both go through [`ops`](super::ops).

use std::cell::RefCell;
use std::rc::Rc;

use crate::abc::{ConstantPool, MethodBody, Name};
use crate::jit::analysis::decoder::{decode_at, CallKind, MnOperand, Op};
use super::host::{ExecError, HostFault, HostResult, MethodRef, ObjectModel, ScopeEntry};
use super::ops;
use super::value::{to_int32, to_uint32, Value};

/// Interpret `body` with `this` and `args`
pub fn interpret(
    body: &MethodBody,
    pool: &ConstantPool,
    outer_scope: &[ScopeEntry],
    host: &mut dyn ObjectModel,
    this: Value,
    args: &[Value],
) -> Result<Value, ExecError> {
    let mut locals = vec![Value::Undefined; body.local_count.max(body.param_count + 1) as usize];
    locals[0] = this;
    for (i, arg) in args.iter().take(body.param_count as usize).enumerate() {
        locals[i + 1] = arg.clone();
    }
    let mut interp = Interpreter {
        body,
        pool,
        outer_scope,
        host,
        method: MethodRef { name: Rc::from(body.qualified_name()), index: body.method_index },
        stack: Vec::with_capacity(body.max_stack as usize),
        scope: Vec::new(),
        locals,
        memory: None,
        region_scope: vec![None; body.exceptions.len()],
    };
    interp.run()
}

enum Step {
    Next,
    Jump(usize),
    Return(Value),
}

struct Interpreter<'a, 'h> {
    body: &'a MethodBody,
    pool: &'a ConstantPool,
    outer_scope: &'a [ScopeEntry],
    host: &'h mut dyn ObjectModel,
    method: MethodRef,
    stack: Vec<Value>,
    scope: Vec<ScopeEntry>,
    locals: Vec<Value>,
    memory: Option<Rc<RefCell<Vec<u8>>>>,
    /// Scope depth on first entry to each exception region
    region_scope: Vec<Option<usize>>,
}

fn verify_error(code: u32, message: impl Into<String>) -> ExecError {
    HostFault::verify_error(code, message).into()
}

impl Interpreter<'_, '_> {
    fn run(&mut self) -> Result<Value, ExecError> {
        let mut pc = 0;
        loop {
            if pc >= self.body.code.len() {
                return Err(verify_error(1020, "Code cannot fall off the end of a method."));
            }
            let instr = decode_at(&self.body.code, pc, self.pool)
                .map_err(|e| verify_error(1011, format!("Method {} contained illegal code: {e}", self.method.name)))?;
            for (i, e) in self.body.exceptions.iter().enumerate() {
                if self.region_scope[i].is_none() && (e.from as usize) <= pc && pc < e.to as usize {
                    self.region_scope[i] = Some(self.scope.len());
                }
            }
            match self.step(&instr.op) {
                Ok(Step::Next) => pc += instr.size,
                Ok(Step::Jump(target)) => pc = target,
                Ok(Step::Return(v)) => return Ok(v),
                Err(err) => pc = self.unwind(pc, err)?,
            }
        }
    }

    fn unwind(&mut self, pc: usize, err: ExecError) -> Result<usize, ExecError> {
        let body = self.body;
        let covering: Vec<usize> = body
            .exceptions
            .iter()
            .enumerate()
            .filter(|(_, e)| (e.from as usize) <= pc && pc < e.to as usize)
            .map(|(i, _)| i)
            .collect();
        if covering.is_empty() {
            return Err(err);
        }
        let Some(value) = ops::catchable_value(&mut *self.host, &err) else {
            return Err(err);
        };
        for i in covering {
            let entry = &body.exceptions[i];
            let filter = match entry.exc_type {
                0 => None,
                ty => Some(self.name(ty)?),
            };
            if ops::catches(&mut *self.host, filter.as_ref(), &value)? {
                self.stack.clear();
                self.stack.push(value);
                if let Some(depth) = self.region_scope[i] {
                    self.scope.truncate(depth);
                }
                return Ok(entry.target as usize);
            }
        }
        Err(err)
    }

    // ===== Stack helpers =====

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> HostResult<Value> {
        self.stack.pop().ok_or_else(|| verify_error(1024, "Stack underflow occurred."))
    }

    fn pop_n(&mut self, n: u32) -> HostResult<Vec<Value>> {
        let n = n as usize;
        if self.stack.len() < n {
            return Err(verify_error(1024, "Stack underflow occurred."));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_receiver(&mut self) -> HostResult<Value> {
        let v = self.pop()?;
        ops::check_receiver(&v)?;
        Ok(v)
    }

    fn local(&mut self, reg: u32) -> HostResult<&mut Value> {
        self.locals
            .get_mut(reg as usize)
            .ok_or_else(|| verify_error(1025, format!("An invalid register {reg} was accessed.")))
    }

    fn name(&self, index: u32) -> HostResult<Name> {
        self.pool
            .resolve_name(index)
            .map_err(|e| verify_error(1032, format!("Cpool index {index} is out of range: {e}")))
    }

    /// Resolve a multiname operand, popping its runtime parts
    fn multiname(&mut self, mn: MnOperand) -> HostResult<Name> {
        let template = self.name(mn.index)?;
        if mn.is_static() {
            return Ok(template);
        }
        let local = if mn.runtime.has_name() { Some(self.pop()?) } else { None };
        let ns = if mn.runtime.has_namespace() { Some(self.pop()?) } else { None };
        ops::runtime_name(&mut *self.host, &template, ns.as_ref(), local.as_ref())
    }

    fn scope_chain(&self) -> Vec<ScopeEntry> {
        self.outer_scope.iter().chain(self.scope.iter()).cloned().collect()
    }

    fn global_scope(&self) -> Value {
        self.outer_scope
            .first()
            .or_else(|| self.scope.first())
            .map_or(Value::Undefined, |e| e.value.clone())
    }

    fn memory(&mut self) -> HostResult<Rc<RefCell<Vec<u8>>>> {
        if let Some(mem) = &self.memory {
            return Ok(mem.clone());
        }
        let mem = self
            .host
            .domain_memory()
            .ok_or_else(|| HostFault::range_error(1506, "No domain memory is selected."))?;
        self.memory = Some(mem.clone());
        Ok(mem)
    }

    fn index_operand(&mut self, v: &Value) -> HostResult<u32> {
        Ok(to_uint32(ops::to_number(&mut *self.host, v)?))
    }

    fn step(&mut self, op: &Op) -> Result<Step, ExecError> {
        match op {
            // ===== Control =====
            Op::Nop => {}
            Op::Kill(reg) => *self.local(*reg)? = Value::Undefined,
            Op::Throw => return Err(ExecError::Throw(self.pop()?)),
            Op::Jump(target) => return Ok(Step::Jump(*target)),
            Op::IfTrue(target) => {
                if self.pop()?.to_boolean() {
                    return Ok(Step::Jump(*target));
                }
            }
            Op::IfFalse(target) => {
                if !self.pop()?.to_boolean() {
                    return Ok(Step::Jump(*target));
                }
            }
            Op::IfCompare { cmp, negate, target } => {
                let b = self.pop()?;
                let a = self.pop()?;
                if ops::branch_taken(&mut *self.host, *cmp, *negate, &a, &b)? {
                    return Ok(Step::Jump(*target));
                }
            }
            Op::LookupSwitch { targets } => {
                let v = self.pop()?;
                let n = ops::to_number(&mut *self.host, &v)?;
                let cases = &targets[1..];
                let target = if n >= 0.0 && n.fract() == 0.0 && (n as usize) < cases.len() {
                    cases[n as usize]
                } else {
                    targets[0]
                };
                return Ok(Step::Jump(target));
            }
            Op::ReturnVoid => return Ok(Step::Return(Value::Undefined)),
            Op::ReturnValue => return Ok(Step::Return(self.pop()?)),

            // ===== Stack & literals =====
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let v = self.pop()?;
                self.push(v.clone());
                self.push(v);
            }
            Op::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b);
                self.push(a);
            }
            Op::PushNull => self.push(Value::Null),
            Op::PushUndefined => self.push(Value::Undefined),
            Op::PushTrue => self.push(Value::Bool(true)),
            Op::PushFalse => self.push(Value::Bool(false)),
            Op::PushNaN => self.push(Value::Number(f64::NAN)),
            Op::PushInt(i) => self.push(Value::Int(*i)),
            Op::PushUInt(u) => self.push(Value::from_u32(*u)),
            Op::PushDouble(d) => self.push(Value::from_f64(*d)),
            Op::PushString(s) => self.push(Value::String(s.clone())),
            Op::PushNamespace(ns) => self.push(Value::Namespace(Rc::new(ns.clone()))),

            // ===== Locals =====
            Op::GetLocal(reg) => {
                let v = self.local(*reg)?.clone();
                self.push(v);
            }
            Op::SetLocal(reg) => {
                let v = self.pop()?;
                *self.local(*reg)? = v;
            }
            Op::IncLocal { reg, delta, int } => {
                let v = self.local(*reg)?.clone();
                let r = ops::increment(&mut *self.host, &v, *delta, *int)?;
                *self.local(*reg)? = r;
            }

            // ===== Scope =====
            Op::PushScope | Op::PushWith => {
                let value = self.pop_receiver()?;
                self.scope.push(ScopeEntry { value, with: *op == Op::PushWith });
            }
            Op::PopScope => {
                self.scope.pop().ok_or_else(|| verify_error(1017, "Scope stack underflow occurred."))?;
            }
            Op::GetScopeObject(index) => {
                let entry = self
                    .scope
                    .get(*index as usize)
                    .ok_or_else(|| verify_error(1019, format!("Getscopeobject {index} is out of bounds.")))?;
                let v = entry.value.clone();
                self.push(v);
            }
            Op::GetOuterScope(index) => {
                let entry = self
                    .outer_scope
                    .get(*index as usize)
                    .ok_or_else(|| verify_error(1019, format!("Getscopeobject {index} is out of bounds.")))?;
                let v = entry.value.clone();
                self.push(v);
            }
            Op::GetGlobalScope => {
                let v = self.global_scope();
                self.push(v);
            }

            // ===== Properties =====
            Op::FindProperty { name, strict } => {
                let name = self.multiname(*name)?;
                let chain = self.scope_chain();
                let v = self.host.find_property(&chain, &name, *strict)?;
                self.push(v);
            }
            Op::FindDef(name) => {
                let name = self.name(name.index)?;
                let v = self.host.find_definition(&name)?;
                self.push(v);
            }
            Op::GetLex(name) => {
                let name = self.name(name.index)?;
                let chain = self.scope_chain();
                let obj = self.host.find_property(&chain, &name, true)?;
                let v = self.host.get_property(&obj, &name)?;
                self.push(v);
            }
            Op::GetProperty(name) => {
                let name = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                let v = self.host.get_property(&obj, &name)?;
                self.push(v);
            }
            Op::SetProperty(name) | Op::InitProperty(name) => {
                let value = self.pop()?;
                let prop = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                if matches!(op, Op::InitProperty(_)) {
                    self.host.init_property(&obj, &prop, value)?;
                } else {
                    self.host.set_property(&obj, &prop, value)?;
                }
            }
            Op::DeleteProperty(name) => {
                let name = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                let r = self.host.delete_property(&obj, &name)?;
                self.push(Value::Bool(r));
            }
            Op::GetSuper(name) => {
                let name = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                let v = self.host.get_super(&obj, &name)?;
                self.push(v);
            }
            Op::SetSuper(name) => {
                let value = self.pop()?;
                let name = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                self.host.set_super(&obj, &name, value)?;
            }
            Op::GetSlot(index) => {
                let obj = self.pop_receiver()?;
                let v = self.host.get_slot(&obj, *index)?;
                self.push(v);
            }
            Op::SetSlot(index) => {
                let value = self.pop()?;
                let obj = self.pop_receiver()?;
                self.host.set_slot(&obj, *index, value)?;
            }
            Op::GetGlobalSlot(index) => {
                let global = self.global_scope();
                let v = self.host.get_slot(&global, *index)?;
                self.push(v);
            }
            Op::SetGlobalSlot(index) => {
                let value = self.pop()?;
                let global = self.global_scope();
                self.host.set_slot(&global, *index, value)?;
            }

            // ===== Calls =====
            Op::Call(argc) => {
                let args = self.pop_n(*argc)?;
                let receiver = self.pop()?;
                let callee = self.pop()?;
                let v = self.host.call(&callee, &receiver, &args)?;
                self.push(v);
            }
            Op::Construct(argc) => {
                let args = self.pop_n(*argc)?;
                let ctor = self.pop()?;
                let v = self.host.construct(&ctor, &args)?;
                self.push(v);
            }
            Op::CallMethod { disp, argc } => {
                let args = self.pop_n(*argc)?;
                let receiver = self.pop_receiver()?;
                let v = self.host.call_method(&receiver, *disp, &args)?;
                self.push(v);
            }
            Op::CallStatic { method, argc } => {
                let args = self.pop_n(*argc)?;
                let receiver = self.pop()?;
                let v = self.host.call_static(&receiver, *method, &args)?;
                self.push(v);
            }
            Op::CallProperty { name, argc, kind } => {
                let args = self.pop_n(*argc)?;
                let name = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                let receiver = if *kind == CallKind::Lex { Value::Null } else { obj.clone() };
                let v = self.host.call_property(&obj, &name, &receiver, &args)?;
                if *kind != CallKind::Void {
                    self.push(v);
                }
            }
            Op::CallSuper { name, argc, void } => {
                let args = self.pop_n(*argc)?;
                let name = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                let v = self.host.call_super(&obj, &name, &args)?;
                if !*void {
                    self.push(v);
                }
            }
            Op::ConstructProp { name, argc } => {
                let args = self.pop_n(*argc)?;
                let name = self.multiname(*name)?;
                let obj = self.pop_receiver()?;
                let v = self.host.construct_property(&obj, &name, &args)?;
                self.push(v);
            }
            Op::ConstructSuper(argc) => {
                let args = self.pop_n(*argc)?;
                let obj = self.pop_receiver()?;
                self.host.construct_super(&obj, &args)?;
            }

            // ===== Allocation =====
            Op::NewObject(pairs) => {
                let flat = self.pop_n(pairs.saturating_mul(2))?;
                let v = ops::new_object(&mut *self.host, &flat)?;
                self.push(v);
            }
            Op::NewArray(count) => {
                let elements = self.pop_n(*count)?;
                let v = self.host.new_array(elements)?;
                self.push(v);
            }
            Op::NewActivation => {
                let v = self.host.new_activation(&self.method)?;
                self.push(v);
            }
            Op::NewFunction(method) => {
                let chain = self.scope_chain();
                let v = self.host.new_function(*method, chain)?;
                self.push(v);
            }
            Op::NewCatch(index) => {
                let v = self.host.new_catch_scope(*index)?;
                self.push(v);
            }
            Op::ApplyType(argc) => {
                let params = self.pop_n(*argc)?;
                let base = self.pop()?;
                let v = self.host.apply_type(&base, &params)?;
                self.push(v);
            }

            // ===== Enumeration =====
            Op::HasNext => {
                let index = self.pop()?;
                let obj = self.pop()?;
                let i = self.index_operand(&index)?;
                let next = if obj.is_nullish() { 0 } else { self.host.next_index(&obj, i)? };
                self.push(Value::from_u32(next));
            }
            Op::HasNext2 { object_reg, index_reg } => {
                let obj = self.local(*object_reg)?.clone();
                let index = self.local(*index_reg)?.clone();
                let (obj, index, more) = ops::has_next2(&mut *self.host, &obj, &index)?;
                *self.local(*object_reg)? = obj;
                *self.local(*index_reg)? = index;
                self.push(Value::Bool(more));
            }
            Op::NextName | Op::NextValue => {
                let index = self.pop()?;
                let obj = self.pop_receiver()?;
                let i = self.index_operand(&index)?;
                let v = if *op == Op::NextName {
                    self.host.next_name(&obj, i)?
                } else {
                    self.host.next_value(&obj, i)?
                };
                self.push(v);
            }

            // ===== Types & arithmetic =====
            Op::Convert(conv) => {
                let v = self.pop()?;
                let r = ops::convert(&mut *self.host, *conv, v)?;
                self.push(r);
            }
            Op::Coerce(ty) => {
                let ty = self.name(ty.index)?;
                let v = self.pop()?;
                let r = self.host.coerce(v, &ty)?;
                self.push(r);
            }
            Op::AsType(ty) => {
                let ty = self.name(ty.index)?;
                let v = self.pop()?;
                let r = if self.host.is_type(&v, &ty)? { v } else { Value::Null };
                self.push(r);
            }
            Op::IsType(ty) => {
                let ty = self.name(ty.index)?;
                let v = self.pop()?;
                let r = self.host.is_type(&v, &ty)?;
                self.push(Value::Bool(r));
            }
            Op::Unary(op) => {
                let v = self.pop()?;
                let r = ops::unary(&mut *self.host, *op, &v)?;
                self.push(r);
            }
            Op::Binary(op) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let r = ops::binary(&mut *self.host, *op, &a, &b)?;
                self.push(r);
            }

            // ===== Domain memory =====
            Op::Load(kind) => {
                let addr = self.pop()?;
                let addr = to_int32(ops::to_number(&mut *self.host, &addr)?);
                let mem = self.memory()?;
                let v = ops::memory_load(&mem.borrow(), *kind, addr)?;
                self.push(v);
            }
            Op::Store(kind) => {
                let addr = self.pop()?;
                let value = self.pop()?;
                let value = ops::to_number(&mut *self.host, &value)?;
                let addr = to_int32(ops::to_number(&mut *self.host, &addr)?);
                let mem = self.memory()?;
                ops::memory_store(&mut mem.borrow_mut(), *kind, addr, value)?;
            }
        }
        Ok(Step::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::{CodeWriter, ExceptionInfo, Opcode};
    use crate::jit::runtime::simple_host::SimpleHost;

    fn run(w: CodeWriter, pool: &ConstantPool, args: &[Value]) -> Result<Value, ExecError> {
        let body = MethodBody::new("t", w.finish().unwrap()).with_params(args.len() as u32);
        let mut host = SimpleHost::new();
        let global = host.global();
        interpret(&body, pool, &[ScopeEntry::new(global)], &mut host, Value::Undefined, args)
    }

    #[test]
    fn test_arithmetic() {
        let mut w = CodeWriter::new();
        w.push_byte(2).push_byte(3).op(Opcode::Add).op(Opcode::ReturnValue);
        assert_eq!(run(w, &ConstantPool::new(), &[]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_loop_sums_parameter() {
        // sum = 0; while (n > 0) { sum += n; n-- } return sum
        let mut w = CodeWriter::new();
        let top = w.new_label();
        let done = w.new_label();
        w.push_byte(0).op(Opcode::SetLocal2);
        w.bind(top).op(Opcode::GetLocal1).push_byte(0).branch(Opcode::IfNgt, done);
        w.op(Opcode::GetLocal2).op(Opcode::GetLocal1).op(Opcode::Add).op(Opcode::SetLocal2);
        w.op_u30(Opcode::DecLocalI, 1).branch(Opcode::Jump, top);
        w.bind(done).op(Opcode::GetLocal2).op(Opcode::ReturnValue);
        let body = MethodBody::new("sum", w.finish().unwrap()).with_params(1).with_locals(3);
        let mut host = SimpleHost::new();
        let r = interpret(&body, &ConstantPool::new(), &[], &mut host, Value::Undefined, &[Value::Int(4)]).unwrap();
        assert_eq!(r, Value::Int(10));
    }

    #[test]
    fn test_catch_all_handler() {
        let mut w = CodeWriter::new();
        w.op(Opcode::PushNull).op(Opcode::Throw); // 0, 1
        w.op(Opcode::ReturnValue); // 2: handler
        let body = MethodBody::new("t", w.finish().unwrap()).with_exception(ExceptionInfo::catch_all(0, 2, 2));
        let mut host = SimpleHost::new();
        let r = interpret(&body, &ConstantPool::new(), &[], &mut host, Value::Undefined, &[]).unwrap();
        assert_eq!(r, Value::Null);
    }

    #[test]
    fn test_underflow_is_verify_error() {
        let mut w = CodeWriter::new();
        w.op(Opcode::Add).op(Opcode::ReturnValue);
        let err = run(w, &ConstantPool::new(), &[]).unwrap_err();
        assert!(matches!(err, ExecError::Host(HostFault { code: 1024, .. })));
    }

    #[test]
    fn test_oversized_counts_underflow() {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0).op(Opcode::GetLocal0).op_u30(Opcode::Call, u32::MAX).op(Opcode::ReturnValue);
        let err = run(w, &ConstantPool::new(), &[]).unwrap_err();
        assert!(matches!(err, ExecError::Host(HostFault { code: 1024, .. })));

        let mut w = CodeWriter::new();
        w.op_u30(Opcode::NewObject, 0x8000_0000).op(Opcode::ReturnValue);
        let err = run(w, &ConstantPool::new(), &[]).unwrap_err();
        assert!(matches!(err, ExecError::Host(HostFault { code: 1024, .. })));
    }

    #[test]
    fn test_unknown_opcode_is_verify_error() {
        let err = run_bytes(vec![0xFF]);
        assert!(matches!(err, ExecError::Host(HostFault { code: 1011, .. })));
    }

    fn run_bytes(code: Vec<u8>) -> ExecError {
        let body = MethodBody::new("t", code);
        let mut host = SimpleHost::new();
        interpret(&body, &ConstantPool::new(), &[], &mut host, Value::Undefined, &[]).unwrap_err()
    }
}
