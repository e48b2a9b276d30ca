//! Stack and scope depth analysis
//!
//! Simulates operand-stack and scope-stack depth at every reachable
//! instruction. Propagation starts at offset 0 with both depths zero and at
//! every exception handler whose region is reachable (stack 1, scope depth
//! of the region start). Every path into an instruction must agree on its
//! depths; a disagreement is reported, not guessed around.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::abc::{ConstantPool, MethodBody, Opcode};
use super::decoder::{decode_method, BinaryOp, Conversion, DecodeError, Op, UnaryOp};
use super::effects::Effect;

/// Errors found while analyzing a method
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Stack underrun at offset {offset}: needs {needed}, has {depth}")]
    Underrun { offset: usize, needed: u32, depth: u32 },
    #[error("Scope stack underrun at offset {offset}: needs {needed}, has {depth}")]
    ScopeUnderrun { offset: usize, needed: u32, depth: u32 },
    #[error("{kind} depth mismatch at offset {offset}: {expected} on one path, {found} on another")]
    DepthMismatch { offset: usize, kind: &'static str, expected: u32, found: u32 },
    #[error("Control falls off the end of the code after offset {0}")]
    FallsOffEnd(usize),
    #[error("Branch at offset {offset} targets {target}, which is not an instruction boundary")]
    MisalignedTarget { offset: usize, target: usize },
    #[error("Exception entry {index} is malformed: {reason}")]
    BadRegion { index: usize, reason: &'static str },
}

impl AnalyzeError {
    pub fn is_underrun(&self) -> bool {
        matches!(self, AnalyzeError::Underrun { .. } | AnalyzeError::ScopeUnderrun { .. })
    }
}

/// Coarse shape of the value an instruction leaves on top of the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTag {
    Int,
    UInt,
    Number,
    Boolean,
    String,
    Null,
    Undefined,
}

/// An instruction annotated with its simulated depths
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset; the instruction's identity
    pub position: usize,
    pub size: usize,
    pub opcode: Opcode,
    pub op: Op,
    pub effect: Effect,
    /// `None` until reached; never reassigned once set
    pub stack_before: Option<u32>,
    pub scope_before: Option<u32>,
    pub tag: Option<ValueTag>,
    pub note: Option<String>,
}

impl Instruction {
    pub fn is_reachable(&self) -> bool {
        self.stack_before.is_some()
    }

    pub fn stack_after(&self) -> Option<u32> {
        self.stack_before.and_then(|d| u32::try_from(i64::from(d) + self.effect.stack_delta()).ok())
    }

    pub fn scope_after(&self) -> Option<u32> {
        self.scope_before.and_then(|d| u32::try_from(i64::from(d) + self.effect.scope_delta()).ok())
    }

    pub fn jump_targets(&self) -> &[usize] {
        self.op.jump_targets()
    }

    pub fn is_terminal(&self) -> bool {
        self.effect.terminal
    }
}

/// An exception table entry with boundaries snapped to instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Position in the method's exception table
    pub index: usize,
    /// First covered instruction
    pub start: usize,
    /// First instruction past the region, or the code length
    pub end: usize,
    pub target: usize,
    /// Multiname index of the caught type; `None` catches everything
    pub filter: Option<u32>,
    /// Multiname index of the catch variable
    pub binding: Option<u32>,
}

impl ExceptionRegion {
    pub fn covers(&self, position: usize) -> bool {
        self.start <= position && position < self.end
    }
}

/// Result of analyzing one method
#[derive(Debug, Clone)]
pub struct MethodAnalysis {
    pub instructions: Vec<Instruction>,
    pub regions: Vec<ExceptionRegion>,
    /// Positions entered from somewhere other than the previous instruction
    pub join_points: BTreeSet<usize>,
    pub max_stack: u32,
    pub max_scope: u32,
    pub has_back_edge: bool,
    pub uses_memory: bool,
    /// The scope pass was skipped because nothing reads the scope chain
    pub scope_elided: bool,
    pub code_len: usize,
    index: FxHashMap<usize, usize>,
}

impl MethodAnalysis {
    /// Index into `instructions` of the instruction at `position`
    pub fn index_of(&self, position: usize) -> Option<usize> {
        self.index.get(&position).copied()
    }

    pub fn at(&self, position: usize) -> Option<&Instruction> {
        self.index_of(position).map(|i| &self.instructions[i])
    }

    pub fn reachable(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().filter(|i| i.is_reachable())
    }

    /// Replace the instruction list, keeping positions and sizes
    pub(crate) fn with_instructions(mut self, instructions: Vec<Instruction>) -> Self {
        debug_assert_eq!(instructions.len(), self.instructions.len());
        self.instructions = instructions;
        self
    }

    /// Distinct branch targets, excluding handler entries
    pub fn branch_targets(&self) -> BTreeSet<usize> {
        self.reachable().flat_map(|i| i.jump_targets().iter().copied()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Stack,
    Scope,
}

impl Pass {
    fn name(self) -> &'static str {
        match self {
            Pass::Stack => "Stack",
            Pass::Scope => "Scope",
        }
    }
}

struct Underrun {
    offset: usize,
    needed: u32,
    depth: u32,
}

/// Analyze a method body.
///
/// With `elide_scopes`, the scope pass is skipped when no instruction reads
/// the scope chain; every reachable instruction then records scope depth 0.
pub fn analyze(body: &MethodBody, pool: &ConstantPool, elide_scopes: bool) -> Result<MethodAnalysis, AnalyzeError> {
    let decoded = decode_method(&body.code, pool)?;
    let mut instructions: Vec<Instruction> = decoded
        .into_iter()
        .map(|d| Instruction {
            position: d.offset,
            size: d.size,
            opcode: d.opcode,
            effect: d.op.effect(),
            tag: infer_tag(&d.op),
            op: d.op,
            stack_before: None,
            scope_before: None,
            note: None,
        })
        .collect();
    let index: FxHashMap<usize, usize> =
        instructions.iter().enumerate().map(|(i, instr)| (instr.position, i)).collect();
    let code_len = body.code.len();

    if instructions.is_empty() {
        return Err(AnalyzeError::FallsOffEnd(0));
    }

    let regions = resolve_regions(body, pool, &instructions, &index, code_len)?;

    // Stack pass
    let mut underruns = Vec::new();
    run_pass(&mut instructions, &index, &regions, Pass::Stack, &mut underruns)?;
    if let Some(u) = underruns.iter().min_by_key(|u| u.offset) {
        return Err(AnalyzeError::Underrun { offset: u.offset, needed: u.needed, depth: u.depth });
    }

    // Scope pass
    let reads_scope = instructions.iter().any(|i| i.is_reachable() && i.op.reads_scope_chain());
    let scope_elided = elide_scopes && !reads_scope;
    if scope_elided {
        for instr in instructions.iter_mut().filter(|i| i.stack_before.is_some()) {
            instr.scope_before = Some(0);
        }
    } else {
        run_pass(&mut instructions, &index, &regions, Pass::Scope, &mut underruns)?;
        if let Some(u) = underruns.iter().min_by_key(|u| u.offset) {
            return Err(AnalyzeError::ScopeUnderrun { offset: u.offset, needed: u.needed, depth: u.depth });
        }
    }

    let mut join_points = BTreeSet::new();
    let mut has_back_edge = false;
    let mut max_stack = 0;
    let mut max_scope = 0;
    let mut uses_memory = false;
    for instr in instructions.iter().filter(|i| i.is_reachable()) {
        for &t in instr.jump_targets() {
            join_points.insert(t);
            has_back_edge |= t <= instr.position;
        }
        max_stack = max_stack.max(instr.stack_before.unwrap_or(0)).max(instr.stack_after().unwrap_or(0));
        if !scope_elided {
            max_scope = max_scope.max(instr.scope_before.unwrap_or(0)).max(instr.scope_after().unwrap_or(0));
        }
        uses_memory |= instr.op.uses_memory();
    }
    for region in &regions {
        if instructions[index[&region.target]].is_reachable() {
            join_points.insert(region.target);
        }
    }
    // The handler entry holds the caught value.
    if !regions.is_empty() {
        max_stack = max_stack.max(1);
    }

    if max_stack > body.max_stack {
        tracing::debug!(method = %body.name, max_stack, declared = body.max_stack, "stack deeper than declared");
    }

    Ok(MethodAnalysis {
        instructions,
        regions,
        join_points,
        max_stack,
        max_scope,
        has_back_edge,
        uses_memory,
        scope_elided,
        code_len,
        index,
    })
}

fn resolve_regions(
    body: &MethodBody,
    pool: &ConstantPool,
    instructions: &[Instruction],
    index: &FxHashMap<usize, usize>,
    code_len: usize,
) -> Result<Vec<ExceptionRegion>, AnalyzeError> {
    body.exceptions
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let bad = |reason| AnalyzeError::BadRegion { index: i, reason };
            let (from, to, target) = (e.from as usize, e.to as usize, e.target as usize);
            if from >= to || from >= code_len {
                return Err(bad("empty or out of range"));
            }
            // The instruction containing `from` starts the region.
            let start_idx = instructions.partition_point(|instr| instr.position <= from) - 1;
            let start = instructions[start_idx].position;
            let end = if to >= code_len {
                code_len
            } else {
                let end_idx = instructions.partition_point(|instr| instr.position < to);
                instructions.get(end_idx).map_or(code_len, |instr| instr.position)
            };
            if !index.contains_key(&target) {
                return Err(bad("handler target is not an instruction boundary"));
            }
            let filter = (e.exc_type != 0).then_some(e.exc_type);
            if let Some(ty) = filter {
                pool.multiname(ty).map_err(|_| bad("unknown catch type"))?;
            }
            Ok(ExceptionRegion {
                index: i,
                start,
                end,
                target,
                filter,
                binding: (e.var_name != 0).then_some(e.var_name),
            })
        })
        .collect()
}

/// Run one pass to a fixpoint over handler roots
fn run_pass(
    instructions: &mut [Instruction],
    index: &FxHashMap<usize, usize>,
    regions: &[ExceptionRegion],
    pass: Pass,
    underruns: &mut Vec<Underrun>,
) -> Result<(), AnalyzeError> {
    let mut seeded = vec![false; regions.len()];
    let mut roots = vec![(0usize, 0u32)];
    while !roots.is_empty() {
        propagate(instructions, index, std::mem::take(&mut roots), pass, underruns)?;
        for (region, done) in regions.iter().zip(seeded.iter_mut()) {
            if *done {
                continue;
            }
            // Depth captured at the first reached instruction of the region.
            let entry = instructions
                .iter()
                .filter(|i| region.covers(i.position))
                .find_map(|i| match pass {
                    Pass::Stack => i.stack_before.map(|_| 1),
                    Pass::Scope => i.scope_before,
                });
            if let Some(depth) = entry {
                *done = true;
                roots.push((index[&region.target], depth));
            }
        }
    }
    Ok(())
}

fn propagate(
    instructions: &mut [Instruction],
    index: &FxHashMap<usize, usize>,
    roots: Vec<(usize, u32)>,
    pass: Pass,
    underruns: &mut Vec<Underrun>,
) -> Result<(), AnalyzeError> {
    let len = instructions.len();
    let mut work = roots;
    while let Some((i, depth)) = work.pop() {
        let instr = &mut instructions[i];
        let slot = match pass {
            Pass::Stack => &mut instr.stack_before,
            Pass::Scope => &mut instr.scope_before,
        };
        match *slot {
            Some(existing) if existing == depth => continue,
            Some(existing) => {
                return Err(AnalyzeError::DepthMismatch {
                    offset: instr.position,
                    kind: pass.name(),
                    expected: existing,
                    found: depth,
                })
            }
            None => *slot = Some(depth),
        }

        let (needed, delta) = match pass {
            Pass::Stack => (instr.effect.pops, instr.effect.stack_delta()),
            Pass::Scope => (instr.effect.scope_required(), instr.effect.scope_delta()),
        };
        if depth < needed {
            underruns.push(Underrun { offset: instr.position, needed, depth });
            continue;
        }
        // `depth >= needed` bounds the result to `depth + pushes`
        let after = (i64::from(depth) + delta) as u32;

        for &target in instr.op.jump_targets() {
            let t = *index
                .get(&target)
                .ok_or(AnalyzeError::MisalignedTarget { offset: instr.position, target })?;
            work.push((t, after));
        }
        if !instr.effect.terminal {
            if i + 1 >= len {
                return Err(AnalyzeError::FallsOffEnd(instr.position));
            }
            work.push((i + 1, after));
        }
    }
    Ok(())
}

fn infer_tag(op: &Op) -> Option<ValueTag> {
    Some(match op {
        Op::PushInt(_) => ValueTag::Int,
        Op::PushUInt(_) => ValueTag::UInt,
        Op::PushDouble(_) | Op::PushNaN => ValueTag::Number,
        Op::PushString(_) => ValueTag::String,
        Op::PushTrue | Op::PushFalse | Op::IsType(_) => ValueTag::Boolean,
        Op::PushNull => ValueTag::Null,
        Op::PushUndefined => ValueTag::Undefined,
        Op::Unary(UnaryOp::Not) => ValueTag::Boolean,
        Op::Unary(UnaryOp::TypeOf) => ValueTag::String,
        Op::Unary(
            UnaryOp::NegateI
            | UnaryOp::IncrementI
            | UnaryOp::DecrementI
            | UnaryOp::BitNot
            | UnaryOp::Sxi1
            | UnaryOp::Sxi8
            | UnaryOp::Sxi16,
        ) => ValueTag::Int,
        Op::Binary(b) if b.yields_boolean() => ValueTag::Boolean,
        Op::Binary(
            BinaryOp::AddI
            | BinaryOp::SubtractI
            | BinaryOp::MultiplyI
            | BinaryOp::LShift
            | BinaryOp::RShift
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor,
        ) => ValueTag::Int,
        Op::Binary(BinaryOp::URShift) => ValueTag::UInt,
        Op::Convert(Conversion::ConvertI | Conversion::CoerceI) => ValueTag::Int,
        Op::Convert(Conversion::ConvertU | Conversion::CoerceU) => ValueTag::UInt,
        Op::Convert(Conversion::ConvertD | Conversion::CoerceD) => ValueTag::Number,
        Op::Convert(Conversion::ConvertB | Conversion::CoerceB) => ValueTag::Boolean,
        Op::Convert(Conversion::ConvertS) => ValueTag::String,
        _ => return None,
    })
}

/// Disassembly of the instructions around `offset`, for diagnostics
pub fn listing_around(code: &[u8], pool: &ConstantPool, offset: usize, radius: usize) -> String {
    let mut out = String::new();
    let Ok(decoded) = decode_method(code, pool) else {
        let _ = write!(out, "  <undecodable code, offending offset {offset}>");
        return out;
    };
    let at = decoded.partition_point(|d| d.offset < offset);
    let from = at.saturating_sub(radius);
    let to = (at + radius + 1).min(decoded.len());
    for d in &decoded[from..to] {
        let marker = if d.offset == offset { ">>" } else { "  " };
        let _ = writeln!(out, "{marker} {:>5}: {}", d.offset, d.op);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::{CodeWriter, ExceptionInfo};

    fn body(w: CodeWriter) -> MethodBody {
        MethodBody::new("test", w.finish().unwrap())
    }

    #[test]
    fn test_linear_depths() {
        let mut w = CodeWriter::new();
        w.push_byte(2).push_byte(3).op(Opcode::Add).op(Opcode::ReturnValue);
        let a = analyze(&body(w), &ConstantPool::new(), true).unwrap();
        let depths: Vec<_> = a.instructions.iter().map(|i| i.stack_before.unwrap()).collect();
        assert_eq!(depths, vec![0, 1, 2, 1]);
        assert_eq!(a.max_stack, 2);
        assert!(a.join_points.is_empty());
        assert!(!a.has_back_edge);
    }

    #[test]
    fn test_underrun_reports_lowest_offset() {
        let mut w = CodeWriter::new();
        w.op(Opcode::Add).op(Opcode::ReturnValue);
        let err = analyze(&body(w), &ConstantPool::new(), true).unwrap_err();
        assert_eq!(err, AnalyzeError::Underrun { offset: 0, needed: 2, depth: 0 });
    }

    #[test]
    fn test_partial_underrun() {
        let mut w = CodeWriter::new();
        w.push_byte(1).op(Opcode::Add).op(Opcode::ReturnValue);
        let err = analyze(&body(w), &ConstantPool::new(), true).unwrap_err();
        assert!(matches!(err, AnalyzeError::Underrun { offset: 2, needed: 2, depth: 1 }));
    }

    #[test]
    fn test_depth_mismatch_at_join() {
        // iftrue skips a push, so the join sees depth 0 and 1
        let mut w = CodeWriter::new();
        let join = w.new_label();
        w.op(Opcode::PushTrue)
            .branch(Opcode::IfTrue, join)
            .push_byte(1)
            .bind(join)
            .op(Opcode::ReturnVoid);
        let err = analyze(&body(w), &ConstantPool::new(), true).unwrap_err();
        assert!(matches!(err, AnalyzeError::DepthMismatch { kind: "Stack", .. }));
    }

    #[test]
    fn test_loop_back_edge() {
        let mut w = CodeWriter::new();
        let top = w.new_label();
        let done = w.new_label();
        w.bind(top)
            .op(Opcode::GetLocal0)
            .branch(Opcode::IfFalse, done)
            .branch(Opcode::Jump, top)
            .bind(done)
            .op(Opcode::ReturnVoid);
        let a = analyze(&body(w), &ConstantPool::new(), true).unwrap();
        assert!(a.has_back_edge);
        assert!(a.join_points.contains(&0));
        assert!(a.instructions.iter().all(|i| i.is_reachable()));
    }

    #[test]
    fn test_falls_off_end() {
        let mut w = CodeWriter::new();
        w.push_byte(1);
        let err = analyze(&body(w), &ConstantPool::new(), true).unwrap_err();
        assert_eq!(err, AnalyzeError::FallsOffEnd(0));
    }

    #[test]
    fn test_unreachable_code_stays_unresolved() {
        let mut w = CodeWriter::new();
        w.op(Opcode::ReturnVoid).op(Opcode::Add).op(Opcode::ReturnValue);
        let a = analyze(&body(w), &ConstantPool::new(), true).unwrap();
        assert!(a.instructions[0].is_reachable());
        assert!(!a.instructions[1].is_reachable());
    }

    #[test]
    fn test_handler_entry_depths() {
        // try { getlocal0; pushscope; pushbyte 1; pop } catch { returnvalue }
        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0).op(Opcode::PushScope); // 0..2
        w.push_byte(1).op(Opcode::Pop); // 2..5
        w.op(Opcode::ReturnVoid); // 5
        w.op(Opcode::GetScopeObject).byte(0); // 6: handler
        w.op(Opcode::Pop).op(Opcode::ReturnValue); // 8, 9
        let b = body(w).with_exception(ExceptionInfo::catch_all(2, 5, 6));
        let a = analyze(&b, &ConstantPool::new(), true).unwrap();
        let handler = a.at(6).unwrap();
        assert_eq!(handler.stack_before, Some(1));
        assert_eq!(handler.scope_before, Some(1));
        assert!(a.join_points.contains(&6));
        assert_eq!(a.regions[0].start, 2);
        assert_eq!(a.regions[0].end, 5);
    }

    #[test]
    fn test_region_boundaries_snap_to_instructions() {
        let mut w = CodeWriter::new();
        w.push_byte(1).op(Opcode::Pop).op(Opcode::ReturnVoid).op(Opcode::ReturnVoid);
        // `from` lands inside pushbyte, `to` inside nothing past pop
        let b = body(w).with_exception(ExceptionInfo::catch_all(1, 3, 4));
        let a = analyze(&b, &ConstantPool::new(), true).unwrap();
        assert_eq!(a.regions[0].start, 0);
        assert_eq!(a.regions[0].end, 3);
    }

    #[test]
    fn test_bad_handler_target() {
        let mut w = CodeWriter::new();
        w.push_byte(1).op(Opcode::Pop).op(Opcode::ReturnVoid);
        let b = body(w).with_exception(ExceptionInfo::catch_all(0, 2, 1));
        let err = analyze(&b, &ConstantPool::new(), true).unwrap_err();
        assert!(matches!(err, AnalyzeError::BadRegion { index: 0, .. }));
    }

    #[test]
    fn test_scope_pass_elided_without_readers() {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0).op(Opcode::PushScope).op(Opcode::PopScope).op(Opcode::ReturnVoid);
        let a = analyze(&body(w), &ConstantPool::new(), true).unwrap();
        assert!(a.scope_elided);
        assert!(a.instructions.iter().all(|i| i.scope_before == Some(0)));

        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0).op(Opcode::PushScope).op(Opcode::PopScope).op(Opcode::ReturnVoid);
        let a = analyze(&body(w), &ConstantPool::new(), false).unwrap();
        assert!(!a.scope_elided);
        assert_eq!(a.instructions[2].scope_before, Some(1));
        assert_eq!(a.max_scope, 1);
    }

    #[test]
    fn test_scope_underrun() {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetScopeObject).byte(0).op(Opcode::ReturnValue);
        let err = analyze(&body(w), &ConstantPool::new(), true).unwrap_err();
        assert!(matches!(err, AnalyzeError::ScopeUnderrun { offset: 0, needed: 1, depth: 0 }));
    }

    #[test]
    fn test_listing_marks_offset() {
        let mut w = CodeWriter::new();
        w.push_byte(1).op(Opcode::Add).op(Opcode::ReturnValue);
        let code = w.finish().unwrap();
        let text = listing_around(&code, &ConstantPool::new(), 2, 1);
        assert!(text.contains(">>     2: Add"));
        assert_eq!(text.lines().count(), 3);
    }
}
