//! Backend trait and loaded-method types
//!
//! A backend turns a generated [`Procedure`] plus its [`MethodContext`] into
//! something callable. The pipeline is:
//!   MethodBody → Procedure → load() → CompiledMethod

use std::fmt;
use std::rc::Rc;

use crate::jit::ir::Procedure;
use crate::jit::runtime::{execute, ExecError, MethodContext, ObjectModel, Value};

/// Errors from loading a procedure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Procedure {procedure} failed verification: {reason}")]
    Invalid { procedure: String, reason: String },
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A procedure bound to the context it runs against
#[derive(Debug)]
pub struct LoadedProcedure {
    pub procedure: Procedure,
    pub context: MethodContext,
}

/// A callable produced by a backend
#[derive(Clone)]
pub enum CompiledMethod {
    Procedure(Rc<LoadedProcedure>),
    /// A constructor whose only work is calling the base constructor with
    /// no arguments
    TrivialConstructor { name: Rc<str> },
}

impl CompiledMethod {
    /// Disambiguated procedure identifier
    pub fn name(&self) -> &str {
        match self {
            CompiledMethod::Procedure(loaded) => &loaded.procedure.name,
            CompiledMethod::TrivialConstructor { name } => name,
        }
    }

    pub fn procedure(&self) -> Option<&Procedure> {
        match self {
            CompiledMethod::Procedure(loaded) => Some(&loaded.procedure),
            CompiledMethod::TrivialConstructor { .. } => None,
        }
    }

    pub fn context(&self) -> Option<&MethodContext> {
        match self {
            CompiledMethod::Procedure(loaded) => Some(&loaded.context),
            CompiledMethod::TrivialConstructor { .. } => None,
        }
    }

    pub fn invoke(&self, host: &mut dyn ObjectModel, this: Value, args: &[Value]) -> Result<Value, ExecError> {
        match self {
            CompiledMethod::Procedure(loaded) => execute(&loaded.procedure, &loaded.context, host, this, args),
            CompiledMethod::TrivialConstructor { .. } => {
                host.construct_super(&this, &[])?;
                Ok(Value::Undefined)
            }
        }
    }
}

impl fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledMethod::Procedure(loaded) => f
                .debug_struct("Procedure")
                .field("name", &loaded.procedure.name)
                .field("shape", &loaded.procedure.shape)
                .finish(),
            CompiledMethod::TrivialConstructor { name } => {
                f.debug_struct("TrivialConstructor").field("name", name).finish()
            }
        }
    }
}

/// The loading trait
///
/// Backends implement this to make generated procedures callable.
pub trait CodegenBackend {
    /// Backend name (for diagnostics)
    fn name(&self) -> &str;

    /// Verify `procedure` and bind it to `context`
    fn load(&self, procedure: Procedure, context: MethodContext) -> Result<CompiledMethod, LoadError>;
}
