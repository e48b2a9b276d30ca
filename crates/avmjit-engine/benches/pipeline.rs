use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use avmjit_engine::abc::{CodeWriter, ConstantPool, MethodBody, Opcode};
use avmjit_engine::jit::analysis::analyze;
use avmjit_engine::jit::runtime::{interpret, PathTable};
use avmjit_engine::{JitEngine, MethodDescriptor, SimpleHost, Value};

/// sum = 0; while (n > 0) { sum += n; n-- } return sum
fn sum_loop() -> MethodBody {
    let mut w = CodeWriter::new();
    let top = w.new_label();
    let done = w.new_label();
    w.push_byte(0).op(Opcode::SetLocal2);
    w.bind(top).op(Opcode::GetLocal1).push_byte(0).branch(Opcode::IfNgt, done);
    w.op(Opcode::GetLocal2).op(Opcode::GetLocal1).op(Opcode::Add).op(Opcode::SetLocal2);
    w.op_u30(Opcode::DecLocalI, 1).branch(Opcode::Jump, top);
    w.bind(done).op(Opcode::GetLocal2).op(Opcode::ReturnValue);
    MethodBody::new("sum", w.finish().unwrap()).with_params(1).with_locals(3)
}

/// A long straight-line body: `n` additions of small constants
fn straight_line(n: usize) -> MethodBody {
    let mut w = CodeWriter::new();
    w.push_byte(0);
    for i in 0..n {
        w.push_byte((i % 100) as i8).op(Opcode::Add);
    }
    w.op(Opcode::ReturnValue);
    MethodBody::new("straight", w.finish().unwrap())
}

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");
    let pool = ConstantPool::new();
    for n in [16, 256, 4096] {
        let body = straight_line(n);
        group.bench_with_input(BenchmarkId::new("straight_line", n), &body, |b, body| {
            b.iter(|| analyze(black_box(body), &pool, true).unwrap());
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let pool = Rc::new(ConstantPool::new());
    let engine = JitEngine::new();
    let body = sum_loop();

    c.bench_function("compile_sum_loop", |b| {
        let mut paths = PathTable::new();
        b.iter(|| {
            let desc = MethodDescriptor::new(body.clone(), Rc::clone(&pool));
            engine.pipeline().compile(black_box(&desc), &mut paths)
        });
    });
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum_loop");
    let pool = Rc::new(ConstantPool::new());
    let engine = JitEngine::new();
    let desc = MethodDescriptor::new(sum_loop(), Rc::clone(&pool));
    let mut host = SimpleHost::new();
    let args = [Value::Int(1000)];

    group.bench_function("compiled", |b| {
        b.iter(|| engine.invoke(&desc, &mut host, Value::Undefined, black_box(&args)).unwrap());
    });
    group.bench_function("interpreted", |b| {
        b.iter(|| interpret(&desc.body, &pool, &[], &mut host, Value::Undefined, black_box(&args)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_analyze, bench_compile, bench_execute);
criterion_main!(benches);
