//! Evaluating backend
//!
//! Loads a procedure as-is and runs it through the executor. Verification
//! happens once at load time so the executor never sees an ill-formed
//! procedure.

use std::rc::Rc;

use crate::jit::ir::Procedure;
use crate::jit::runtime::MethodContext;
use super::traits::{CodegenBackend, CompiledMethod, LoadError, LoadedProcedure};
use super::verify::verify;

/// Backend that evaluates the procedure IR directly
#[derive(Debug, Clone)]
pub struct EvalBackend {
    verify: bool,
}

impl EvalBackend {
    pub fn new() -> Self {
        EvalBackend { verify: true }
    }

    /// Skip load-time verification (for procedures built by trusted code)
    pub fn unverified() -> Self {
        EvalBackend { verify: false }
    }
}

impl Default for EvalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CodegenBackend for EvalBackend {
    fn name(&self) -> &str {
        "eval"
    }

    fn load(&self, procedure: Procedure, context: MethodContext) -> Result<CompiledMethod, LoadError> {
        if self.verify {
            verify(&procedure, &context)?;
        }
        tracing::trace!(procedure = %procedure.name, "loaded");
        Ok(CompiledMethod::Procedure(Rc::new(LoadedProcedure { procedure, context })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::ConstantPool;
    use crate::jit::ir::{Block, ControlShape, FrameLayout, Label, Preamble, Slot, Stmt};
    use crate::jit::runtime::{MethodRef, SimpleHost, Value};

    fn load(backend: &EvalBackend, stmts: Vec<Stmt>) -> Result<CompiledMethod, LoadError> {
        let procedure = Procedure {
            name: "answer".into(),
            shape: ControlShape::Linear,
            blocks: vec![Block { label: Label(0), stmts, next: None, handlers: Vec::new() }],
            handlers: Vec::new(),
            frame: FrameLayout { params: 0, locals: 1, stack: 1, scope: 0 },
            preamble: Preamble::default(),
            fuse: None,
            names: Vec::new(),
        };
        let context = MethodContext::new(
            &procedure,
            MethodRef { name: Rc::from("answer"), index: None },
            Rc::new(ConstantPool::new()),
            Rc::from(Vec::new()),
        );
        backend.load(procedure, context)
    }

    #[test]
    fn test_load_and_invoke() {
        let stmts = vec![Stmt::Const { dest: Slot(0), value: Value::Int(42) }, Stmt::Return(Some(Slot(0)))];
        let method = load(&EvalBackend::new(), stmts).unwrap();
        assert_eq!(method.name(), "answer");
        let mut host = SimpleHost::new();
        assert_eq!(method.invoke(&mut host, Value::Undefined, &[]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_verification_can_be_skipped() {
        let stmts = vec![Stmt::Return(Some(Slot(5)))];
        assert!(load(&EvalBackend::new(), stmts.clone()).is_err());
        assert!(load(&EvalBackend::unverified(), stmts).is_ok());
    }
}
