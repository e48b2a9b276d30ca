//! Backends that make generated procedures callable
//!
//! - `traits`: the `CodegenBackend` trait and the `CompiledMethod` it yields
//! - `verify`: structural checks run before a procedure is loaded
//! - `eval`: the default backend, evaluating the procedure IR

pub mod eval;
pub mod traits;
pub mod verify;

pub use eval::EvalBackend;
pub use traits::{CodegenBackend, CompiledMethod, LoadError, LoadedProcedure};
pub use verify::verify;
