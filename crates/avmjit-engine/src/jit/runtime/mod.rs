//! Execution support for compiled procedures
//!
//! Holds the guest value model, the host object-model trait, the procedure
//! executor, the bytecode interpreter used as a fallback for methods that
//! do not compile, and the memoized per-method compile state.

pub mod context;
pub mod executor;
pub mod host;
pub mod interpreter;
pub mod method_cache;
pub mod ops;
pub mod simple_host;
pub mod value;

pub use context::MethodContext;
pub use executor::execute;
pub use host::{ErrorKind, ExecError, Hint, HostFault, HostResult, MethodRef, ObjectModel, ScopeEntry};
pub use interpreter::interpret;
pub use method_cache::{CompileResult, CompileStatus, MethodDescriptor, PathTable};
pub use simple_host::{NativeFn, SimpleHost};
pub use value::{ObjectId, Value};
