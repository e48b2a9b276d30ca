//! Object-model contract
//!
//! Compiled procedures and the interpreter never touch objects directly:
//! property access, calls, coercion, scope-chain lookup and allocation all
//! go through [`ObjectModel`]. A host embeds the engine by implementing it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::abc::{Name, Namespace};
use super::value::{ObjectId, Value};

/// Guest error classes a host fault maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    ArgumentError,
    VerifyError,
}

impl ErrorKind {
    /// Guest class name
    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::VerifyError => "VerifyError",
        }
    }
}

/// A fault raised by host logic rather than a guest `throw`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}: Error #{code}: {message}", .kind.class_name())]
pub struct HostFault {
    pub kind: ErrorKind,
    pub code: u32,
    pub message: String,
}

impl HostFault {
    pub fn new(kind: ErrorKind, code: u32, message: impl Into<String>) -> Self {
        HostFault { kind, code, message: message.into() }
    }

    pub fn type_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, code, message)
    }

    pub fn reference_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReferenceError, code, message)
    }

    pub fn range_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, code, message)
    }

    pub fn verify_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VerifyError, code, message)
    }

    /// Property access on null or undefined
    pub fn null_reference(value: &Value) -> Self {
        match value {
            Value::Undefined => Self::type_error(1010, "A term is undefined and has no properties."),
            _ => Self::type_error(1009, "Cannot access a property or method of a null object reference."),
        }
    }
}

/// Why execution left a procedure abnormally
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    /// A guest value was thrown and not caught
    #[error("Uncaught guest exception: {0}")]
    Throw(Value),
    #[error(transparent)]
    Host(#[from] HostFault),
    /// Execution was stopped by the engine (never catchable)
    #[error("Execution aborted: {0}")]
    Abort(String),
}

/// Result of an object-model operation
pub type HostResult<T> = Result<T, ExecError>;

/// One entry of a scope chain
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub value: Value,
    /// Pushed by `pushwith`: dynamic properties are visible
    pub with: bool,
}

impl ScopeEntry {
    pub fn new(value: Value) -> Self {
        ScopeEntry { value, with: false }
    }
}

/// Identity of the method being executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub name: Rc<str>,
    pub index: Option<u32>,
}

/// Conversion hint for [`ObjectModel::to_primitive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Number,
    String,
}

/// The runtime object model
pub trait ObjectModel {
    // ===== Properties =====

    fn get_property(&mut self, obj: &Value, name: &Name) -> HostResult<Value>;

    fn set_property(&mut self, obj: &Value, name: &Name, value: Value) -> HostResult<()>;

    /// Initialize a property (`initproperty`); writes through read-only slots
    fn init_property(&mut self, obj: &Value, name: &Name, value: Value) -> HostResult<()> {
        self.set_property(obj, name, value)
    }

    fn delete_property(&mut self, obj: &Value, name: &Name) -> HostResult<bool>;

    fn has_property(&mut self, obj: &Value, name: &Name) -> HostResult<bool>;

    /// Storage key `name` resolves to on `obj`
    fn resolve_key(&mut self, _obj: &Value, name: &Name) -> Option<Rc<str>> {
        name.local.clone()
    }

    fn call_property(&mut self, obj: &Value, name: &Name, receiver: &Value, args: &[Value]) -> HostResult<Value> {
        let callee = self.get_property(obj, name)?;
        self.call(&callee, receiver, args)
    }

    fn construct_property(&mut self, obj: &Value, name: &Name, args: &[Value]) -> HostResult<Value> {
        let ctor = self.get_property(obj, name)?;
        self.construct(&ctor, args)
    }

    // ===== Calls =====

    /// Generic call: validates that `callee` is callable
    fn call(&mut self, callee: &Value, receiver: &Value, args: &[Value]) -> HostResult<Value>;

    /// Whether `value` is a plain function that [`call_function`] accepts
    ///
    /// [`call_function`]: ObjectModel::call_function
    fn is_plain_function(&self, _value: &Value) -> bool {
        false
    }

    /// Direct call of a value known to be a plain function
    fn call_function(&mut self, callee: &Value, receiver: &Value, args: &[Value]) -> HostResult<Value> {
        self.call(callee, receiver, args)
    }

    fn construct(&mut self, ctor: &Value, args: &[Value]) -> HostResult<Value>;

    fn call_method(&mut self, receiver: &Value, disp: u32, args: &[Value]) -> HostResult<Value>;

    fn call_static(&mut self, receiver: &Value, method: u32, args: &[Value]) -> HostResult<Value>;

    // ===== Super =====

    fn get_super(&mut self, obj: &Value, name: &Name) -> HostResult<Value>;

    fn set_super(&mut self, obj: &Value, name: &Name, value: Value) -> HostResult<()>;

    fn call_super(&mut self, obj: &Value, name: &Name, args: &[Value]) -> HostResult<Value>;

    fn construct_super(&mut self, obj: &Value, args: &[Value]) -> HostResult<()>;

    // ===== Scope chain =====

    /// Object on `scopes` (searched innermost first) that has `name`.
    ///
    /// Falls back to the outermost scope, or fails with a ReferenceError
    /// when `strict`.
    fn find_property(&mut self, scopes: &[ScopeEntry], name: &Name, strict: bool) -> HostResult<Value> {
        for entry in scopes.iter().rev() {
            if entry.value.is_nullish() {
                continue;
            }
            if self.has_property(&entry.value, name)? {
                return Ok(entry.value.clone());
            }
        }
        if strict {
            return Err(HostFault::reference_error(1065, format!("Variable {name} is not defined.")).into());
        }
        Ok(scopes.first().map_or(Value::Undefined, |e| e.value.clone()))
    }

    /// Script object defining `name` (`finddef`)
    fn find_definition(&mut self, name: &Name) -> HostResult<Value>;

    // ===== Types =====

    /// Coerce to the type `ty` names
    fn coerce(&mut self, value: Value, ty: &Name) -> HostResult<Value>;

    fn is_type(&mut self, value: &Value, ty: &Name) -> HostResult<bool>;

    /// `istypelate`/`astypelate`: type given as a class value
    fn is_type_value(&mut self, value: &Value, ty: &Value) -> HostResult<bool>;

    fn instance_of(&mut self, value: &Value, ctor: &Value) -> HostResult<bool>;

    /// `typeof` for objects
    fn type_of(&self, _obj: ObjectId) -> &'static str {
        "object"
    }

    /// Primitive value of an object
    fn to_primitive(&mut self, value: &Value, hint: Hint) -> HostResult<Value>;

    // ===== Allocation =====

    fn new_object(&mut self, pairs: Vec<(Rc<str>, Value)>) -> HostResult<Value>;

    fn new_array(&mut self, elements: Vec<Value>) -> HostResult<Value>;

    fn new_activation(&mut self, method: &MethodRef) -> HostResult<Value>;

    fn new_function(&mut self, method: u32, scope: Vec<ScopeEntry>) -> HostResult<Value>;

    fn new_catch_scope(&mut self, index: u32) -> HostResult<Value>;

    fn apply_type(&mut self, base: &Value, params: &[Value]) -> HostResult<Value>;

    // ===== Slots =====

    fn get_slot(&mut self, obj: &Value, index: u32) -> HostResult<Value>;

    fn set_slot(&mut self, obj: &Value, index: u32, value: Value) -> HostResult<()>;

    // ===== Enumeration =====

    /// Next enumeration index after `index`; 0 when done
    fn next_index(&mut self, obj: &Value, index: u32) -> HostResult<u32>;

    fn next_name(&mut self, obj: &Value, index: u32) -> HostResult<Value>;

    fn next_value(&mut self, obj: &Value, index: u32) -> HostResult<Value>;

    // ===== Errors & memory =====

    /// Guest error object for a host fault
    fn make_error(&mut self, fault: &HostFault) -> Value;

    /// Domain memory backing `li*`/`si*`
    fn domain_memory(&self) -> Option<Rc<RefCell<Vec<u8>>>> {
        None
    }

    /// Complete a runtime multiname from stack operands
    fn runtime_name(&mut self, template: &Name, ns: Option<&Value>, local: Option<&Value>) -> HostResult<Name> {
        let ns = match ns {
            None => None,
            Some(Value::Namespace(ns)) => Some(Namespace::clone(ns)),
            Some(other) => {
                return Err(HostFault::type_error(1117, format!("Invalid namespace value {other}")).into())
            }
        };
        let local = match local {
            None => None,
            Some(v) => {
                let prim = match v {
                    Value::Object(_) => self.to_primitive(v, Hint::String)?,
                    other => other.clone(),
                };
                prim.primitive_to_string()
            }
        };
        Ok(template.with_runtime(ns, local))
    }
}
