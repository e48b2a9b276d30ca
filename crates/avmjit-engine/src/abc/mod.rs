//! ABC input model
//!
//! The pieces of an ABC (ActionScript Byte Code) file the JIT consumes: the
//! opcode table, the constant pool, resolved names and method bodies. Parsing
//! the container itself happens elsewhere.

pub mod constants;
pub mod method;
pub mod names;
pub mod opcode;
pub mod writer;

pub use constants::{ConstantPool, Multiname, PoolError, RuntimeParts};
pub use method::{ExceptionInfo, MethodBody};
pub use names::{Name, Namespace, NamespaceKind};
pub use opcode::{OperandFormat, Opcode};
pub use writer::{CodeWriter, Label};
