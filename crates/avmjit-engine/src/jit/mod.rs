//! Method JIT for AVM2 bytecode
//!
//! This module compiles method bodies into verified procedures and runs
//! them. It includes:
//! - Bytecode analysis (decoding, stack/scope depth simulation, rewrite)
//! - Procedure IR over fixed frame slots, with a textual rendering
//! - The compile pipeline: code generator, naming and site optimizers
//! - Backends that verify and load procedures
//! - The runtime: executor, fallback interpreter, object-model trait,
//!   memoized per-method compile state
//! - Pre-warming: compile methods before their first call

pub mod analysis;
pub mod backend;
pub mod flags;
pub mod ir;
pub mod pipeline;
pub mod runtime;

mod engine;
pub use engine::{JitConfig, JitEngine};
