//! Per-method bindings a loaded procedure runs against

use std::cell::RefCell;
use std::rc::Rc;

use crate::abc::{ConstantPool, Name};
use crate::jit::ir::Procedure;
use super::host::{MethodRef, ScopeEntry};
use super::value::Value;

/// Everything a procedure needs besides its frame: resolved names, the
/// scope chain it closes over, and hoisted lookups that persist across
/// invocations.
#[derive(Debug)]
pub struct MethodContext {
    pub method: MethodRef,
    pub pool: Rc<ConstantPool>,
    /// Resolved names indexed by `NameId`
    pub names: Rc<[Name]>,
    /// Scope chain captured when the method was created, outermost first
    pub outer_scope: Rc<[ScopeEntry]>,
    hoisted: RefCell<Vec<Option<Value>>>,
}

impl MethodContext {
    pub fn new(procedure: &Procedure, method: MethodRef, pool: Rc<ConstantPool>, outer_scope: Rc<[ScopeEntry]>) -> Self {
        MethodContext {
            method,
            pool,
            names: procedure.names.iter().map(|r| r.name.clone()).collect(),
            outer_scope,
            hoisted: RefCell::new(vec![None; procedure.preamble.hoisted.len()]),
        }
    }

    pub fn name(&self, index: u32) -> Option<&Name> {
        self.names.get(index as usize)
    }

    /// Value of a hoisted cell, if it has been resolved
    pub fn hoisted(&self, cell: u32) -> Option<Value> {
        self.hoisted.borrow().get(cell as usize).cloned().flatten()
    }

    pub fn set_hoisted(&self, cell: u32, value: Value) {
        if let Some(slot) = self.hoisted.borrow_mut().get_mut(cell as usize) {
            *slot = Some(value);
        }
    }

    pub fn hoisted_len(&self) -> usize {
        self.hoisted.borrow().len()
    }
}
