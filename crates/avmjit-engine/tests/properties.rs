//! End-to-end properties of analysis, generation and execution

use std::rc::Rc;

use avmjit_engine::abc::{CodeWriter, ConstantPool, ExceptionInfo, MethodBody, Opcode};
use avmjit_engine::jit::analysis::analyze;
use avmjit_engine::jit::analysis::reader::decode_u30;
use avmjit_engine::jit::ir::ControlShape;
use avmjit_engine::jit::runtime::{interpret, ExecError, ObjectModel};
use avmjit_engine::{CompileStatus, FailureReason, JitEngine, MethodDescriptor, SimpleHost, Value};

fn sum_code() -> Vec<u8> {
    let mut w = CodeWriter::new();
    w.push_byte(2).push_byte(3).op(Opcode::Add).op(Opcode::ReturnValue);
    w.finish().unwrap()
}

fn descriptor(body: MethodBody, pool: ConstantPool) -> MethodDescriptor {
    MethodDescriptor::new(body, Rc::new(pool))
}

#[test]
fn test_linear_code_depths_follow_effects() {
    let body = MethodBody::new("sum", sum_code());
    let analysis = analyze(&body, &ConstantPool::new(), true).unwrap();
    let before: Vec<u32> = analysis.instructions.iter().map(|i| i.stack_before.unwrap()).collect();
    let after: Vec<u32> = analysis.instructions.iter().map(|i| i.stack_after().unwrap()).collect();
    assert_eq!(before, vec![0, 1, 2, 1]);
    assert_eq!(&before[1..], &after[..3]);
    assert_eq!(analysis.max_stack, 2);
}

#[test]
fn test_linear_code_has_no_dispatcher() {
    let engine = JitEngine::new();
    let desc = descriptor(MethodBody::new("sum", sum_code()), ConstantPool::new());
    let procedure = engine.compile(&desc).callable().and_then(|c| c.procedure()).unwrap();
    assert_eq!(procedure.shape, ControlShape::Linear);
    assert_eq!(procedure.blocks.len(), 1);
    assert_eq!(procedure.fuse, None);
}

#[test]
fn test_sum_compiled_and_interpreted() {
    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    let desc = descriptor(MethodBody::new("sum", sum_code()), ConstantPool::new());

    let compiled = engine.invoke(&desc, &mut host, Value::Undefined, &[]).unwrap();
    assert_eq!(desc.status(), CompileStatus::Compiled);
    let interpreted = interpret(&desc.body, &desc.pool, &[], &mut host, Value::Undefined, &[]).unwrap();
    assert_eq!(compiled, Value::Int(5));
    assert_eq!(interpreted, Value::Int(5));
}

#[test]
fn test_underrun_is_reported() {
    let mut w = CodeWriter::new();
    w.op(Opcode::Add).op(Opcode::ReturnValue);
    let desc = descriptor(MethodBody::new("bad", w.finish().unwrap()), ConstantPool::new());
    let engine = JitEngine::new();
    let failure = engine.compile(&desc).failure().unwrap();
    assert_eq!(failure.reason, FailureReason::Underrun);
    assert_eq!(failure.reason.as_str(), "UNDERRUN");
    assert_eq!(desc.status(), CompileStatus::Failed);
}

#[test]
fn test_unknown_opcode_is_reported() {
    let desc = descriptor(MethodBody::new("bad", vec![0xFF]), ConstantPool::new());
    let failure = JitEngine::new().compile(&desc).failure().unwrap().clone();
    assert_eq!(failure.reason.as_str(), "UNKNOWN_BYTECODE");
}

/// `throw arg; handler: return caught` with a catch typed `catch_type`
fn typed_catch(pool: &mut ConstantPool, catch_type: &str) -> MethodBody {
    let ty = pool.add_public_qname(catch_type);
    let mut w = CodeWriter::new();
    w.op(Opcode::GetLocal1).op(Opcode::Throw);
    let handler = w.position() as u32;
    w.op(Opcode::ReturnValue);
    MethodBody::new("catcher", w.finish().unwrap())
        .with_params(1)
        .with_exception(ExceptionInfo::typed(0, handler, handler, ty))
}

fn type_error(host: &mut SimpleHost) -> Value {
    let class = host.get(&host.global(), "TypeError");
    host.construct(&class, &[Value::string("boom")]).unwrap()
}

#[test]
fn test_typed_catch_only_catches_its_type() {
    let engine = JitEngine::new();
    let mut host = SimpleHost::new();

    for (catch_type, caught) in [("RangeError", false), ("TypeError", true), ("Error", true)] {
        let mut pool = ConstantPool::new();
        let body = typed_catch(&mut pool, catch_type);
        let desc = descriptor(body, pool);
        let thrown = type_error(&mut host);

        let compiled = engine.invoke(&desc, &mut host, Value::Undefined, &[thrown.clone()]);
        assert_eq!(desc.status(), CompileStatus::Compiled, "{catch_type}");
        let interpreted = interpret(&desc.body, &desc.pool, &[], &mut host, Value::Undefined, &[thrown.clone()]);

        if caught {
            assert_eq!(compiled, Ok(thrown.clone()), "{catch_type}");
        } else {
            assert_eq!(compiled, Err(ExecError::Throw(thrown.clone())), "{catch_type}");
        }
        assert_eq!(compiled, interpreted, "{catch_type}");
    }
}

/// `return arg.x`, guarded by an inner `RangeError` region and an outer
/// `TypeError` region that return 1 and 2
fn nested_regions(pool: &mut ConstantPool) -> MethodBody {
    let x = pool.add_public_qname("x");
    let range_error = pool.add_public_qname("RangeError");
    let type_error = pool.add_public_qname("TypeError");
    let mut w = CodeWriter::new();
    w.op(Opcode::GetLocal1).op_u30(Opcode::GetProperty, x);
    let inner_end = w.position() as u32;
    w.op(Opcode::ReturnValue);
    let outer_end = w.position() as u32;
    let inner = w.position() as u32;
    w.op(Opcode::Pop).push_byte(1).op(Opcode::ReturnValue);
    let outer = w.position() as u32;
    w.op(Opcode::Pop).push_byte(2).op(Opcode::ReturnValue);
    MethodBody::new("nested", w.finish().unwrap())
        .with_params(1)
        .with_exception(ExceptionInfo::typed(0, inner_end, inner, range_error))
        .with_exception(ExceptionInfo::typed(0, outer_end, outer, type_error))
}

#[test]
fn test_unmatched_catch_passes_to_enclosing_region() {
    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    let mut pool = ConstantPool::new();
    let desc = descriptor(nested_regions(&mut pool), pool);

    let compiled = engine.invoke(&desc, &mut host, Value::Undefined, &[Value::Null]);
    assert_eq!(desc.status(), CompileStatus::Compiled);
    let interpreted = interpret(&desc.body, &desc.pool, &[], &mut host, Value::Undefined, &[Value::Null]);
    assert_eq!(compiled, Ok(Value::Int(2)));
    assert_eq!(compiled, interpreted);

    let obj = host.object_with(&[("x", Value::Int(7))]);
    let compiled = engine.invoke(&desc, &mut host, Value::Undefined, &[obj.clone()]);
    let interpreted = interpret(&desc.body, &desc.pool, &[], &mut host, Value::Undefined, &[obj]);
    assert_eq!(compiled, Ok(Value::Int(7)));
    assert_eq!(compiled, interpreted);
}

#[test]
fn test_host_fault_is_caught_as_guest_type_error() {
    // try { return arg.x } catch (e: TypeError) { return e.errorID }
    let mut pool = ConstantPool::new();
    let x = pool.add_public_qname("x");
    let error_id = pool.add_public_qname("errorID");
    let type_error = pool.add_public_qname("TypeError");
    let mut w = CodeWriter::new();
    w.op(Opcode::GetLocal1).op_u30(Opcode::GetProperty, x).op(Opcode::ReturnValue);
    let handler = w.position() as u32;
    w.op_u30(Opcode::GetProperty, error_id).op(Opcode::ReturnValue);
    let body = MethodBody::new("caught", w.finish().unwrap())
        .with_params(1)
        .with_exception(ExceptionInfo::typed(0, handler, handler, type_error));
    let desc = descriptor(body, pool);

    let engine = JitEngine::new();
    let mut host = SimpleHost::new();
    for (arg, code) in [(Value::Null, 1009), (Value::Undefined, 1010)] {
        let compiled = engine.invoke(&desc, &mut host, Value::Undefined, &[arg.clone()]);
        let interpreted = interpret(&desc.body, &desc.pool, &[], &mut host, Value::Undefined, &[arg]);
        assert_eq!(compiled, Ok(Value::Int(code)));
        assert_eq!(compiled, interpreted);
    }
    assert_eq!(desc.status(), CompileStatus::Compiled);
}

#[test]
fn test_generation_is_deterministic() {
    let build = || {
        let mut pool = ConstantPool::new();
        let math = pool.add_public_qname("Math");
        let max = pool.add_public_qname("max");
        let mut w = CodeWriter::new();
        let skip = w.new_label();
        w.op(Opcode::GetLocal1)
            .branch(Opcode::IfFalse, skip)
            .op_u30(Opcode::GetLex, math)
            .push_byte(1)
            .push_byte(2)
            .op_u30_u30(Opcode::CallProperty, max, 2)
            .op(Opcode::ReturnValue)
            .bind(skip)
            .op(Opcode::ReturnVoid);
        descriptor(MethodBody::new("pick", w.finish().unwrap()).with_params(1), pool)
    };

    let (a, b) = (build(), build());
    let first = JitEngine::new().compile(&a).callable().and_then(|c| c.procedure()).unwrap().clone();
    let second = JitEngine::new().compile(&b).callable().and_then(|c| c.procedure()).unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_u30_encodings() {
    assert_eq!(decode_u30(&[0x00]).unwrap(), 0);
    assert_eq!(decode_u30(&[0x7F]).unwrap(), 127);
    assert_eq!(decode_u30(&[0x80, 0x01]).unwrap(), 128);
    assert_eq!(decode_u30(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]).unwrap(), u32::MAX);
}
