//! Trivial-constructor detection
//!
//! A constructor that only sets up its scope and calls the base
//! constructor with no arguments does not need analysis or generation; the
//! loader gives it a minimal callable instead.

use crate::abc::{ConstantPool, MethodBody};
use crate::jit::analysis::{decode_method, Op};

const MAX_CODE_LEN: usize = 16;
const MAX_STACK: u32 = 2;
const MAX_SCOPE_SPAN: u32 = 1;
const MAX_LOCALS: u32 = 1;

/// Recognizes `getlocal0, pushscope, getlocal0, constructsuper 0, returnvoid`
#[derive(Debug, Default, Clone, Copy)]
pub struct TrivialCtorDetector;

impl TrivialCtorDetector {
    pub fn new() -> Self {
        TrivialCtorDetector
    }

    /// Whether `body` is a trivial constructor
    pub fn test(&self, body: &MethodBody, pool: &ConstantPool) -> bool {
        let within_bounds = body.is_constructor
            && body.param_count == 0
            && body.code.len() <= MAX_CODE_LEN
            && body.max_stack <= MAX_STACK
            && body.scope_span() <= MAX_SCOPE_SPAN
            && body.local_count <= MAX_LOCALS
            && body.exceptions.is_empty();
        if !within_bounds {
            return false;
        }
        let Ok(decoded) = decode_method(&body.code, pool) else {
            return false;
        };
        let ops: Vec<&Op> = decoded.iter().map(|d| &d.op).filter(|op| **op != Op::Nop).collect();
        matches!(
            ops.as_slice(),
            [Op::GetLocal(0), Op::PushScope, Op::GetLocal(0), Op::ConstructSuper(0), Op::ReturnVoid]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::{CodeWriter, Opcode};

    fn ctor(w: CodeWriter) -> MethodBody {
        MethodBody::new("Foo", w.finish().unwrap()).with_class("Foo").constructor().with_bounds(1, 0, 1)
    }

    fn trivial_code() -> CodeWriter {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0)
            .op(Opcode::PushScope)
            .op(Opcode::GetLocal0)
            .op_u30(Opcode::ConstructSuper, 0)
            .op(Opcode::ReturnVoid);
        w
    }

    #[test]
    fn test_detects_trivial_constructor() {
        let pool = ConstantPool::new();
        assert!(TrivialCtorDetector::new().test(&ctor(trivial_code()), &pool));
    }

    #[test]
    fn test_debug_markers_allowed() {
        let mut w = CodeWriter::new();
        w.op_u30(Opcode::DebugLine, 3)
            .op(Opcode::GetLocal0)
            .op(Opcode::PushScope)
            .op(Opcode::Nop)
            .op(Opcode::GetLocal0)
            .op_u30(Opcode::ConstructSuper, 0)
            .op(Opcode::ReturnVoid);
        assert!(TrivialCtorDetector::new().test(&ctor(w), &ConstantPool::new()));
    }

    #[test]
    fn test_rejects_non_constructor_and_arguments() {
        let pool = ConstantPool::new();
        let detector = TrivialCtorDetector::new();
        let plain = MethodBody::new("f", trivial_code().finish().unwrap());
        assert!(!detector.test(&plain, &pool));

        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0)
            .op(Opcode::PushScope)
            .op(Opcode::GetLocal0)
            .push_byte(1)
            .op_u30(Opcode::ConstructSuper, 1)
            .op(Opcode::ReturnVoid);
        assert!(!detector.test(&ctor(w), &pool));
    }

    #[test]
    fn test_rejects_params() {
        let body = ctor(trivial_code()).with_params(1);
        assert!(!TrivialCtorDetector::new().test(&body, &ConstantPool::new()));
    }
}
