//! Engine behaviour: memoization, fallback, optimizers at run time

use std::rc::Rc;

use avmjit_engine::abc::{CodeWriter, ConstantPool, MethodBody, Opcode};
use avmjit_engine::jit::backend::CompiledMethod;
use avmjit_engine::jit::runtime::{interpret, ExecError, HostFault, NativeFn, ObjectModel};
use avmjit_engine::{
    CompileStatus, FailureReason, JitConfig, JitEngine, MethodDescriptor, OptimizerFlags, SimpleHost, Value,
};

fn without(flags: OptimizerFlags) -> JitConfig {
    JitConfig { flags: OptimizerFlags::DEFAULT.difference(flags), ..JitConfig::default() }
}

fn int(v: &Value) -> i32 {
    match v {
        Value::Int(i) => *i,
        other => panic!("expected int, got {other:?}"),
    }
}

#[test]
fn test_status_moves_once_and_counts_uses() {
    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    let mut w = CodeWriter::new();
    w.op(Opcode::GetLocal1).op(Opcode::GetLocal2).op(Opcode::Add).op(Opcode::ReturnValue);
    let desc = MethodDescriptor::new(
        MethodBody::new("add", w.finish().unwrap()).with_params(2),
        Rc::new(ConstantPool::new()),
    );

    assert_eq!(desc.status(), CompileStatus::Pending);
    let r = engine.invoke(&desc, &mut host, Value::Undefined, &[Value::Int(4), Value::Int(5)]).unwrap();
    assert_eq!(r, Value::Int(9));
    let r = engine.invoke(&desc, &mut host, Value::Undefined, &[Value::Int(1)]).unwrap();
    assert!(matches!(r, Value::Number(n) if n.is_nan()));
    assert_eq!(desc.status(), CompileStatus::Compiled);
    assert_eq!(desc.use_count(), 2);
}

#[test]
fn test_identical_names_are_disambiguated() {
    let engine = JitEngine::new();
    let pool = Rc::new(ConstantPool::new());
    let descs: Vec<MethodDescriptor> = (0..3)
        .map(|_| MethodDescriptor::new(MethodBody::new("init", vec![0x47]).with_class("app.Main"), Rc::clone(&pool)))
        .collect();
    let names: Vec<String> = descs
        .iter()
        .map(|d| engine.compile(d).callable().unwrap().name().to_string())
        .collect();
    assert_eq!(names, ["app_Main_init", "app_Main_init_2", "app_Main_init_3"]);
    assert!(engine.has_path("app_Main_init_3"));
}

#[test]
fn test_failed_methods_fall_back_to_interpreter() {
    // Paths meet at `join` with depths 0 and 1.
    let mut w = CodeWriter::new();
    let join = w.new_label();
    w.op(Opcode::GetLocal1).branch(Opcode::IfFalse, join).push_byte(1).bind(join).push_byte(2).op(Opcode::ReturnValue);
    let desc = MethodDescriptor::new(
        MethodBody::new("diverge", w.finish().unwrap()).with_params(1),
        Rc::new(ConstantPool::new()),
    );

    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    for arg in [Value::Bool(true), Value::Bool(false)] {
        assert_eq!(engine.invoke(&desc, &mut host, Value::Undefined, &[arg]).unwrap(), Value::Int(2));
    }
    assert_eq!(desc.status(), CompileStatus::Failed);
    assert_eq!(desc.result().and_then(|r| r.failure()).map(|f| f.reason), Some(FailureReason::DepthMismatch));
    assert_eq!(desc.use_count(), 0);
}

fn counting_classes(host: &mut SimpleHost) -> (Value, Value) {
    let base = host.define_class("Base", None);
    let init: NativeFn = Rc::new(|h: &mut SimpleHost, this: &Value, _: &[Value]| {
        let count = match h.get(this, "count") {
            Value::Int(n) => n,
            _ => 0,
        };
        h.set_prop(this, "count", Value::Int(count + 1));
        Ok(Value::Undefined)
    });
    host.set_initializer(&base, init);
    let derived = host.define_class("Derived", Some(&base));
    (base, derived)
}

fn trivial_ctor() -> MethodDescriptor {
    let mut w = CodeWriter::new();
    w.op(Opcode::GetLocal0)
        .op(Opcode::PushScope)
        .op(Opcode::GetLocal0)
        .op_u30(Opcode::ConstructSuper, 0)
        .op(Opcode::ReturnVoid);
    let body = MethodBody::new("Derived", w.finish().unwrap()).with_class("Derived").constructor().with_bounds(1, 0, 1);
    MethodDescriptor::new(body, Rc::new(ConstantPool::new()))
}

#[test]
fn test_trivial_constructor_runs_base_initializer() {
    for config in [JitConfig::default(), without(OptimizerFlags::TRIVIAL_CTOR)] {
        let trivial = config.flags.contains(OptimizerFlags::TRIVIAL_CTOR);
        let engine = JitEngine::with_config(config);
        let mut host = SimpleHost::new();
        let (_, derived) = counting_classes(&mut host);
        let instance = host.construct(&derived, &[]).unwrap();
        assert_eq!(int(&host.get(&instance, "count")), 1);

        let desc = trivial_ctor();
        let r = engine.invoke(&desc, &mut host, instance.clone(), &[]).unwrap();
        assert_eq!(r, Value::Undefined);
        assert_eq!(int(&host.get(&instance, "count")), 2);
        assert_eq!(
            matches!(engine.compile(&desc).callable(), Some(CompiledMethod::TrivialConstructor { .. })),
            trivial
        );
    }
}

#[test]
fn test_trivial_constructor_with_null_receiver_faults() {
    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    let err = engine.invoke(&trivial_ctor(), &mut host, Value::Null, &[]).unwrap_err();
    assert!(matches!(err, ExecError::Host(HostFault { code: 1009, .. })));
}

/// `return Math.max(3, 9)`
fn math_max() -> (ConstantPool, Vec<u8>) {
    let mut pool = ConstantPool::new();
    let math = pool.add_public_qname("Math");
    let max = pool.add_public_qname("max");
    let mut w = CodeWriter::new();
    w.op_u30(Opcode::GetLex, math)
        .push_byte(3)
        .push_byte(9)
        .op_u30_u30(Opcode::CallProperty, max, 2)
        .op(Opcode::ReturnValue);
    (pool, w.finish().unwrap())
}

#[test]
fn test_hoisted_lookup_persists_across_calls() {
    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    let (pool, code) = math_max();
    let desc = MethodDescriptor::new(MethodBody::new("peak", code), Rc::new(pool)).with_outer_scope(host.global_scope());

    assert_eq!(engine.invoke(&desc, &mut host, Value::Undefined, &[]).unwrap(), Value::Int(9));
    let procedure = engine.compile(&desc).callable().and_then(|c| c.procedure()).unwrap();
    assert_eq!(procedure.preamble.hoisted.len(), 1);

    // The cell still holds the original `Math`.
    let empty = host.object_with(&[]);
    host.define_global("Math", empty);
    assert_eq!(engine.invoke(&desc, &mut host, Value::Undefined, &[]).unwrap(), Value::Int(9));
}

#[test]
fn test_unhoisted_lookup_sees_redefinition() {
    let engine = JitEngine::with_config(without(OptimizerFlags::LEX_HOIST));
    let mut host = SimpleHost::new();
    let (pool, code) = math_max();
    let desc = MethodDescriptor::new(MethodBody::new("peak", code), Rc::new(pool)).with_outer_scope(host.global_scope());

    assert_eq!(engine.invoke(&desc, &mut host, Value::Undefined, &[]).unwrap(), Value::Int(9));
    let empty = host.object_with(&[]);
    host.define_global("Math", empty);
    assert!(engine.invoke(&desc, &mut host, Value::Undefined, &[]).is_err());
}

/// `return arg.loaderInfo.parameters.url`
fn guarded_chain() -> (ConstantPool, Vec<u8>) {
    let mut pool = ConstantPool::new();
    let names: Vec<u32> = ["loaderInfo", "parameters", "url"].iter().map(|n| pool.add_public_qname(n)).collect();
    let mut w = CodeWriter::new();
    w.op(Opcode::GetLocal1);
    for &n in &names {
        w.op_u30(Opcode::GetProperty, n);
    }
    w.op(Opcode::ReturnValue);
    (pool, w.finish().unwrap())
}

#[test]
fn test_null_guard_keeps_plain_read_faults() {
    let mut host = SimpleHost::new();
    let missing = host.object_with(&[("loaderInfo", Value::Null)]);
    let params = host.object_with(&[("url", Value::string("a.swf"))]);
    let info = host.object_with(&[("parameters", params)]);
    let present = host.object_with(&[("loaderInfo", info)]);

    let guarded = JitEngine::new();
    let plain = JitEngine::with_config(without(OptimizerFlags::NULL_GUARD));
    let (pool, code) = guarded_chain();
    let pool = Rc::new(pool);
    let body = MethodBody::new("url", code).with_params(1);
    let (a, b) = (
        MethodDescriptor::new(body.clone(), Rc::clone(&pool)),
        MethodDescriptor::new(body, Rc::clone(&pool)),
    );

    for arg in [missing, present, Value::Null] {
        let args = [arg];
        let with_guard = guarded.invoke(&a, &mut host, Value::Undefined, &args);
        let without_guard = plain.invoke(&b, &mut host, Value::Undefined, &args);
        let interpreted = interpret(&a.body, &pool, &[], &mut host, Value::Undefined, &args);
        assert_eq!(with_guard, without_guard, "{:?}", args[0]);
        assert_eq!(with_guard, interpreted, "{:?}", args[0]);
    }
    assert_eq!(a.status(), CompileStatus::Compiled);
    let procedure = a.result().and_then(|r| r.callable()).and_then(|c| c.procedure()).unwrap();
    assert!(procedure.to_string().contains("= guard "));

    let r = guarded.invoke(&a, &mut host, Value::Undefined, &[Value::Null]);
    assert!(matches!(r, Err(ExecError::Host(HostFault { code: 1009, .. }))));
}

#[test]
fn test_fast_call_matches_generic_call() {
    let mut pool = ConstantPool::new();
    let twice = pool.add_public_qname("twice");
    let mut w = CodeWriter::new();
    w.op(Opcode::GetLocal1)
        .op_u30(Opcode::GetProperty, twice)
        .op(Opcode::GetLocal1)
        .push_byte(21)
        .op_u30(Opcode::Call, 1)
        .op(Opcode::ReturnValue);
    let body = MethodBody::new("call_twice", w.finish().unwrap()).with_params(1);
    let pool = Rc::new(pool);

    let mut host = SimpleHost::new();
    let f = host.function(|h, _, args| {
        let n = args.first().cloned().unwrap_or(Value::Undefined);
        Ok(Value::from_f64(avmjit_engine::jit::runtime::ops::to_number(h, &n)? * 2.0))
    });
    let target = host.object_with(&[("twice", f)]);

    for config in [JitConfig::default(), without(OptimizerFlags::FAST_CALL)] {
        let engine = JitEngine::with_config(config);
        let desc = MethodDescriptor::new(body.clone(), Rc::clone(&pool));
        let r = engine.invoke(&desc, &mut host, Value::Undefined, &[target.clone()]).unwrap();
        assert_eq!(r, Value::Int(42));
    }
    let r = interpret(&body, &pool, &[], &mut host, Value::Undefined, &[target]).unwrap();
    assert_eq!(r, Value::Int(42));
}

#[test]
fn test_dispatch_fuse_stops_runaway_loop() {
    let mut w = CodeWriter::new();
    let top = w.new_label();
    w.bind(top).branch(Opcode::Jump, top);
    let desc = MethodDescriptor::new(MethodBody::new("spin", w.finish().unwrap()), Rc::new(ConstantPool::new()));

    let engine = JitEngine::with_config(JitConfig { dispatch_fuse_limit: 1_000, ..JitConfig::default() });
    let mut host = SimpleHost::new();
    let err = engine.invoke(&desc, &mut host, Value::Undefined, &[]).unwrap_err();
    assert!(matches!(err, ExecError::Abort(msg) if msg.contains("fuse")));
}

#[test]
fn test_loop_with_fuse_completes() {
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
    let desc = MethodDescriptor::new(body, Rc::new(ConstantPool::new()));

    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    let r = engine.invoke(&desc, &mut host, Value::Undefined, &[Value::Int(100)]).unwrap();
    assert_eq!(r, Value::Int(5050));
    assert_eq!(desc.status(), CompileStatus::Compiled);
}

#[test]
fn test_prewarm_fills_descriptors() {
    let engine = JitEngine::new();
    let pool = Rc::new(ConstantPool::new());
    let descs = vec![
        MethodDescriptor::new(MethodBody::new("a", vec![0x47]), Rc::clone(&pool)),
        MethodDescriptor::new(MethodBody::new("b", vec![0xFF]), Rc::clone(&pool)),
    ];
    let result = engine.prewarm(&descs);
    assert_eq!(result.compiled, vec![0]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(descs[1].status(), CompileStatus::Failed);

    // Pre-warming does not count as a use.
    assert_eq!(descs[0].use_count(), 0);
    let mut host = SimpleHost::new();
    engine.invoke(&descs[0], &mut host, Value::Undefined, &[]).unwrap();
    assert_eq!(descs[0].use_count(), 1);
}

#[test]
fn test_scope_elision_skips_null_scope_check() {
    let mut w = CodeWriter::new();
    w.op(Opcode::PushNull).op(Opcode::PushScope).push_byte(1).op(Opcode::ReturnValue);
    let body = MethodBody::new("scoped", w.finish().unwrap());
    let pool = Rc::new(ConstantPool::new());
    let mut host = SimpleHost::new();

    let elided = MethodDescriptor::new(body.clone(), Rc::clone(&pool));
    let r = JitEngine::new().invoke(&elided, &mut host, Value::Undefined, &[]);
    assert_eq!(r, Ok(Value::Int(1)));

    let kept = MethodDescriptor::new(body, Rc::clone(&pool));
    let engine = JitEngine::with_config(without(OptimizerFlags::SCOPE_ELISION));
    let compiled = engine.invoke(&kept, &mut host, Value::Undefined, &[]);
    let interpreted = interpret(&kept.body, &pool, &[], &mut host, Value::Undefined, &[]);
    assert!(matches!(compiled, Err(ExecError::Host(HostFault { code: 1009, .. }))));
    assert_eq!(compiled, interpreted);
}
