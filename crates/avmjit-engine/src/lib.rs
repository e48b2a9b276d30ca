//! AVM2 method JIT
//!
//! Compiles ActionScript 3 method bodies into verified procedures over
//! fixed frame slots, falling back to a bytecode interpreter for methods
//! that do not compile.
//!
//! # Modules
//!
//! - `abc`: opcodes, constant pool, names and method bodies
//! - `jit`: analysis, IR, compile pipeline, backends and runtime
//!
//! # Example
//!
//! ```rust,ignore
//! use avmjit_engine::abc::{CodeWriter, ConstantPool, MethodBody, Opcode};
//! use avmjit_engine::{JitEngine, MethodDescriptor, SimpleHost, Value};
//!
//! let mut w = CodeWriter::new();
//! w.push_byte(2).push_byte(3).op(Opcode::Add).op(Opcode::ReturnValue);
//! let desc = MethodDescriptor::new(MethodBody::new("sum", w.finish()?), Rc::new(ConstantPool::new()));
//!
//! let engine = JitEngine::new();
//! let mut host = SimpleHost::new();
//! assert_eq!(engine.invoke(&desc, &mut host, Value::Undefined, &[])?, Value::Int(5));
//! ```

#![warn(rust_2018_idioms)]

pub mod abc;
pub mod jit;

pub use jit::flags::OptimizerFlags;
pub use jit::pipeline::{CompileFailure, FailureReason};
pub use jit::runtime::{CompileResult, CompileStatus, MethodDescriptor, ObjectModel, SimpleHost, Value};
pub use jit::{JitConfig, JitEngine};
