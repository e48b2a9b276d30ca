//! Annotation rewrite pass
//!
//! Produces a new instruction list in which provably redundant conversions
//! and unread scope pushes become no-ops. Stack shape never changes: a
//! rewritten instruction keeps its stack delta and depths.

use crate::jit::flags::OptimizerFlags;
use super::decoder::{Conversion, Op};
use super::depth::{Instruction, MethodAnalysis, ValueTag};

/// Rewrite `analysis` according to `flags`
pub fn rewrite(analysis: MethodAnalysis, flags: OptimizerFlags) -> MethodAnalysis {
    let elide_scopes = analysis.scope_elided && flags.contains(OptimizerFlags::SCOPE_ELISION);
    let skip_null_coercion = flags.contains(OptimizerFlags::NULL_COERCION_SKIP);

    let mut out: Vec<Instruction> = Vec::with_capacity(analysis.instructions.len());
    for (i, instr) in analysis.instructions.iter().enumerate() {
        let mut next = instr.clone();
        if instr.is_reachable() {
            let prev = i
                .checked_sub(1)
                .map(|p| &analysis.instructions[p])
                .filter(|p| p.is_reachable() && !p.is_terminal())
                .filter(|_| !analysis.join_points.contains(&instr.position));
            if let Some((op, note)) = rewritten(instr, prev, elide_scopes, skip_null_coercion) {
                next.op = op;
                next.effect = next.op.effect();
                next.note = Some(note);
                if next.tag.is_none() {
                    next.tag = prev.and_then(|p| p.tag);
                }
            }
        }
        out.push(next);
    }

    let rewrites = out.iter().filter(|i| i.note.is_some()).count();
    if rewrites > 0 {
        tracing::trace!(rewrites, "annotation pass collapsed instructions");
    }
    analysis.with_instructions(out)
}

/// Replacement op for `instr`, if any. `prev` is the predecessor that falls
/// through into it and is its only way in.
fn rewritten(
    instr: &Instruction,
    prev: Option<&Instruction>,
    elide_scopes: bool,
    skip_null_coercion: bool,
) -> Option<(Op, String)> {
    match &instr.op {
        Op::PushScope | Op::PushWith if elide_scopes => {
            Some((Op::Pop, format!("{} elided: scope chain never read", instr.opcode)))
        }
        Op::PopScope if elide_scopes => {
            Some((Op::Nop, format!("{} elided: scope chain never read", instr.opcode)))
        }
        Op::Convert(Conversion::CoerceA) => Some((Op::Nop, "coerce_a is the identity".to_string())),
        Op::Convert(conv) => {
            let prev = prev?;
            let redundant = match (conv, prev.tag?) {
                (Conversion::ConvertD | Conversion::CoerceD, ValueTag::Number | ValueTag::Int | ValueTag::UInt) => true,
                (Conversion::ConvertI | Conversion::CoerceI, ValueTag::Int) => true,
                (Conversion::ConvertU | Conversion::CoerceU, ValueTag::UInt) => true,
                (Conversion::ConvertB | Conversion::CoerceB, ValueTag::Boolean) => true,
                (Conversion::ConvertS | Conversion::CoerceS, ValueTag::String) => true,
                (Conversion::CoerceO | Conversion::CoerceS, ValueTag::Null) => skip_null_coercion,
                _ => false,
            };
            redundant.then(|| (Op::Nop, format!("redundant {} after {}", instr.opcode, prev.opcode)))
        }
        Op::Coerce(_) if skip_null_coercion => {
            let prev = prev?;
            (prev.op == Op::PushNull).then(|| (Op::Nop, "coercion of null skipped".to_string()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::{CodeWriter, ConstantPool, MethodBody, Opcode};
    use crate::jit::analysis::depth::analyze;

    fn run(w: CodeWriter, pool: &ConstantPool, flags: OptimizerFlags) -> MethodAnalysis {
        let body = MethodBody::new("t", w.finish().unwrap());
        rewrite(analyze(&body, pool, true).unwrap(), flags)
    }

    #[test]
    fn test_redundant_conversion_becomes_nop() {
        let mut w = CodeWriter::new();
        w.push_byte(3).op(Opcode::ConvertI).op(Opcode::ConvertD).op(Opcode::ReturnValue);
        let a = run(w, &ConstantPool::new(), OptimizerFlags::DEFAULT);
        assert_eq!(a.instructions[1].op, Op::Nop);
        assert!(a.instructions[1].note.as_deref().unwrap().contains("convert_i"));
        // tag flows through the collapsed conversion
        assert_eq!(a.instructions[2].op, Op::Nop);
        assert_eq!(a.instructions[3].stack_before, Some(1));
    }

    #[test]
    fn test_conversion_at_join_point_is_kept() {
        let mut w = CodeWriter::new();
        let join = w.new_label();
        let skip = w.new_label();
        w.op(Opcode::GetLocal0)
            .branch(Opcode::IfTrue, skip)
            .push_byte(1)
            .branch(Opcode::Jump, join)
            .bind(skip)
            .op(Opcode::GetLocal0)
            .bind(join)
            .op(Opcode::ConvertI)
            .op(Opcode::ReturnValue);
        let a = run(w, &ConstantPool::new(), OptimizerFlags::DEFAULT);
        let conv = a.instructions.iter().find(|i| i.opcode == Opcode::ConvertI).unwrap();
        assert_eq!(conv.op, Op::Convert(Conversion::ConvertI));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let mut w = CodeWriter::new();
        w.push_byte(3).op(Opcode::CoerceA).op(Opcode::ReturnValue);
        let body = MethodBody::new("t", w.finish().unwrap());
        let before = analyze(&body, &ConstantPool::new(), true).unwrap();
        let after = rewrite(before.clone(), OptimizerFlags::DEFAULT);
        assert_eq!(before.instructions[1].op, Op::Convert(Conversion::CoerceA));
        assert_eq!(after.instructions[1].op, Op::Nop);
    }

    #[test]
    fn test_null_coercion_skip_flag() {
        let mut pool = ConstantPool::new();
        let ty = pool.add_public_qname("Sprite");
        let mut w = CodeWriter::new();
        w.op(Opcode::PushNull).op_u30(Opcode::Coerce, ty).op(Opcode::ReturnValue);
        let code = w.finish().unwrap();
        let body = MethodBody::new("t", code);

        let on = rewrite(analyze(&body, &pool, true).unwrap(), OptimizerFlags::DEFAULT);
        assert_eq!(on.instructions[1].op, Op::Nop);

        let off = rewrite(
            analyze(&body, &pool, true).unwrap(),
            OptimizerFlags::DEFAULT.difference(OptimizerFlags::NULL_COERCION_SKIP),
        );
        assert!(matches!(off.instructions[1].op, Op::Coerce(_)));
    }

    #[test]
    fn test_scope_push_becomes_pop() {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0).op(Opcode::PushScope).op(Opcode::PopScope).op(Opcode::ReturnVoid);
        let a = run(w, &ConstantPool::new(), OptimizerFlags::DEFAULT);
        assert_eq!(a.instructions[1].op, Op::Pop);
        assert_eq!(a.instructions[1].effect.scope_delta(), 0);
        assert_eq!(a.instructions[2].op, Op::Nop);
        assert_eq!(a.instructions[3].stack_before, Some(0));
    }
}
