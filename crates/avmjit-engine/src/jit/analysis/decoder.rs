//! Bytecode instruction decoder
//!
//! Decodes raw AVM2 code bytes into typed instructions. Constant-pool
//! literals are resolved here so later stages never touch the pool for them;
//! multiname operands keep their pool index and record which parts are
//! supplied on the stack.

use std::fmt;
use std::rc::Rc;

use crate::abc::{ConstantPool, Namespace, Opcode, PoolError, RuntimeParts};
use super::reader::CodeReader;

/// Error during bytecode decoding
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown bytecode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("Unsupported bytecode {opcode} at offset {offset}")]
    Unsupported { opcode: Opcode, offset: usize },
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),
    #[error("Bad constant reference at offset {offset}: {source}")]
    Constant {
        offset: usize,
        #[source]
        source: PoolError,
    },
    #[error("Branch at offset {offset} targets {target}, outside the method")]
    BranchOutOfRange { offset: usize, target: i64 },
    #[error("{opcode} at offset {offset} cannot take a runtime multiname")]
    RuntimeNameNotAllowed { opcode: Opcode, offset: usize },
}

impl DecodeError {
    /// Whether this is an unknown or unsupported opcode rather than a
    /// malformed stream
    pub fn is_unknown_bytecode(&self) -> bool {
        matches!(self, DecodeError::UnknownOpcode { .. } | DecodeError::Unsupported { .. })
    }

    pub fn offset(&self) -> usize {
        match self {
            DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::Unsupported { offset, .. }
            | DecodeError::Constant { offset, .. }
            | DecodeError::BranchOutOfRange { offset, .. }
            | DecodeError::RuntimeNameNotAllowed { offset, .. } => *offset,
            DecodeError::UnexpectedEnd(offset) => *offset,
        }
    }
}

/// Multiname operand: pool index plus the parts taken from the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MnOperand {
    pub index: u32,
    pub runtime: RuntimeParts,
}

impl MnOperand {
    pub fn is_static(&self) -> bool {
        self.runtime == RuntimeParts::None
    }
}

/// Comparison used by conditional branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compare {
    Eq,
    StrictEq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Flavour of a property call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `callproperty`
    Normal,
    /// `callproplex`: receiver passed as null
    Lex,
    /// `callpropvoid`: result discarded
    Void,
}

/// Conversion and coercion opcodes without operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    ConvertS,
    ConvertI,
    ConvertU,
    ConvertD,
    ConvertB,
    ConvertO,
    CoerceA,
    CoerceB,
    CoerceI,
    CoerceD,
    CoerceS,
    CoerceU,
    CoerceO,
}

/// One-operand arithmetic and logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    NegateI,
    Increment,
    IncrementI,
    Decrement,
    DecrementI,
    Not,
    BitNot,
    TypeOf,
    Sxi1,
    Sxi8,
    Sxi16,
}

/// Two-operand arithmetic, comparison and late type tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    AddI,
    Subtract,
    SubtractI,
    Multiply,
    MultiplyI,
    Divide,
    Modulo,
    LShift,
    RShift,
    URShift,
    BitAnd,
    BitOr,
    BitXor,
    Equals,
    StrictEquals,
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
    InstanceOf,
    In,
    IsTypeLate,
    AsTypeLate,
}

impl BinaryOp {
    /// Whether the result is always a Boolean
    pub fn yields_boolean(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::StrictEquals
                | BinaryOp::LessThan
                | BinaryOp::LessEquals
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterEquals
                | BinaryOp::InstanceOf
                | BinaryOp::In
                | BinaryOp::IsTypeLate
        )
    }
}

/// Domain memory access width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemKind {
    /// 8-bit, zero-extended on load
    U8,
    /// 16-bit, zero-extended on load
    U16,
    I32,
    F32,
    F64,
}

impl MemKind {
    pub fn width(self) -> usize {
        match self {
            MemKind::U8 => 1,
            MemKind::U16 => 2,
            MemKind::I32 | MemKind::F32 => 4,
            MemKind::F64 => 8,
        }
    }
}

/// A supported instruction with its decoded operands.
///
/// Only opcodes the engine can translate have a variant; everything else is
/// rejected by the decoder, so later stages match exhaustively on this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // ===== Control =====
    /// `nop`, `label`, `bkpt`, debug markers, and rewritten no-ops
    Nop,
    Kill(u32),
    Throw,
    Jump(usize),
    IfTrue(usize),
    IfFalse(usize),
    IfCompare { cmp: Compare, negate: bool, target: usize },
    /// Default target first, then the cases
    LookupSwitch { targets: Vec<usize> },
    ReturnVoid,
    ReturnValue,

    // ===== Stack & literals =====
    Pop,
    Dup,
    Swap,
    PushNull,
    PushUndefined,
    PushTrue,
    PushFalse,
    PushNaN,
    /// `pushbyte`, `pushshort`, `pushint`
    PushInt(i32),
    PushUInt(u32),
    PushDouble(f64),
    PushString(Rc<str>),
    PushNamespace(Namespace),

    // ===== Locals =====
    GetLocal(u32),
    SetLocal(u32),
    IncLocal { reg: u32, delta: i32, int: bool },

    // ===== Scope =====
    PushScope,
    PushWith,
    PopScope,
    GetScopeObject(u32),
    GetOuterScope(u32),
    GetGlobalScope,

    // ===== Properties =====
    FindProperty { name: MnOperand, strict: bool },
    FindDef(MnOperand),
    GetLex(MnOperand),
    GetProperty(MnOperand),
    SetProperty(MnOperand),
    InitProperty(MnOperand),
    DeleteProperty(MnOperand),
    GetSuper(MnOperand),
    SetSuper(MnOperand),
    GetSlot(u32),
    SetSlot(u32),
    GetGlobalSlot(u32),
    SetGlobalSlot(u32),

    // ===== Calls =====
    Call(u32),
    Construct(u32),
    CallMethod { disp: u32, argc: u32 },
    CallStatic { method: u32, argc: u32 },
    CallProperty { name: MnOperand, argc: u32, kind: CallKind },
    CallSuper { name: MnOperand, argc: u32, void: bool },
    ConstructProp { name: MnOperand, argc: u32 },
    ConstructSuper(u32),

    // ===== Allocation =====
    NewObject(u32),
    NewArray(u32),
    NewActivation,
    NewFunction(u32),
    NewCatch(u32),
    ApplyType(u32),

    // ===== Enumeration =====
    HasNext,
    HasNext2 { object_reg: u32, index_reg: u32 },
    NextName,
    NextValue,

    // ===== Types & arithmetic =====
    Convert(Conversion),
    Coerce(MnOperand),
    AsType(MnOperand),
    IsType(MnOperand),
    Unary(UnaryOp),
    Binary(BinaryOp),

    // ===== Domain memory =====
    Load(MemKind),
    Store(MemKind),
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstr {
    /// Byte offset in the method's code
    pub offset: usize,
    /// Opcode as it appeared in the stream
    pub opcode: Opcode,
    pub op: Op,
    /// Total size in bytes (opcode + operands)
    pub size: usize,
}

/// Decode every instruction of a method
pub fn decode_method(code: &[u8], pool: &ConstantPool) -> Result<Vec<DecodedInstr>, DecodeError> {
    let mut instrs = Vec::new();
    let mut pos = 0;
    while pos < code.len() {
        let instr = decode_at(code, pos, pool)?;
        pos += instr.size;
        instrs.push(instr);
    }
    Ok(instrs)
}

/// Decode the instruction starting at `offset`
pub fn decode_at(code: &[u8], offset: usize, pool: &ConstantPool) -> Result<DecodedInstr, DecodeError> {
    let mut r = CodeReader::new(code, offset);
    r.begin_instruction();
    let byte = r.read_u8()?;
    let opcode = Opcode::from_u8(byte).ok_or(DecodeError::UnknownOpcode { byte, offset })?;
    let mut d = OpDecoder { r, pool, offset, len: code.len(), opcode };
    let op = d.decode()?;
    let size = d.r.position() - offset;
    Ok(DecodedInstr { offset, opcode, op, size })
}

struct OpDecoder<'a> {
    r: CodeReader<'a>,
    pool: &'a ConstantPool,
    offset: usize,
    len: usize,
    opcode: Opcode,
}

impl OpDecoder<'_> {
    fn constant(&self, source: PoolError) -> DecodeError {
        DecodeError::Constant { offset: self.offset, source }
    }

    fn multiname(&mut self) -> Result<MnOperand, DecodeError> {
        let index = self.r.read_u30()?;
        let runtime = self.pool.multiname(index).map_err(|e| self.constant(e))?.runtime_parts();
        Ok(MnOperand { index, runtime })
    }

    /// Multiname operand that must be fully known at compile time
    fn static_multiname(&mut self) -> Result<MnOperand, DecodeError> {
        let mn = self.multiname()?;
        if !mn.is_static() {
            return Err(DecodeError::RuntimeNameNotAllowed { opcode: self.opcode, offset: self.offset });
        }
        Ok(mn)
    }

    fn target(&self, base: usize, rel: i32) -> Result<usize, DecodeError> {
        let target = base as i64 + rel as i64;
        if target < 0 || target >= self.len as i64 {
            return Err(DecodeError::BranchOutOfRange { offset: self.offset, target });
        }
        Ok(target as usize)
    }

    fn branch(&mut self) -> Result<usize, DecodeError> {
        let rel = self.r.read_s24()?;
        self.target(self.r.position(), rel)
    }

    fn compare(&mut self, cmp: Compare, negate: bool) -> Result<Op, DecodeError> {
        Ok(Op::IfCompare { cmp, negate, target: self.branch()? })
    }

    fn lookup_switch(&mut self) -> Result<Op, DecodeError> {
        let default = self.r.read_s24()?;
        let count = self.r.read_u30()?;
        let mut targets = vec![self.target(self.offset, default)?];
        for _ in 0..=count {
            let rel = self.r.read_s24()?;
            targets.push(self.target(self.offset, rel)?);
        }
        Ok(Op::LookupSwitch { targets })
    }

    fn decode(&mut self) -> Result<Op, DecodeError> {
        use Opcode as O;
        let op = match self.opcode {
            // ===== Control =====
            O::Bkpt | O::Nop | O::Label | O::Timestamp => Op::Nop,
            O::Debug => {
                self.r.read_u8()?;
                self.r.read_u30()?;
                self.r.read_u8()?;
                self.r.read_u30()?;
                Op::Nop
            }
            O::DebugLine | O::DebugFile | O::BkptLine => {
                self.r.read_u30()?;
                Op::Nop
            }
            O::Kill => Op::Kill(self.r.read_u30()?),
            O::Throw => Op::Throw,
            O::Jump => Op::Jump(self.branch()?),
            O::IfTrue => Op::IfTrue(self.branch()?),
            O::IfFalse => Op::IfFalse(self.branch()?),
            O::IfEq => self.compare(Compare::Eq, false)?,
            O::IfNe => self.compare(Compare::Eq, true)?,
            O::IfStrictEq => self.compare(Compare::StrictEq, false)?,
            O::IfStrictNe => self.compare(Compare::StrictEq, true)?,
            O::IfLt => self.compare(Compare::Lt, false)?,
            O::IfNlt => self.compare(Compare::Lt, true)?,
            O::IfLe => self.compare(Compare::Le, false)?,
            O::IfNle => self.compare(Compare::Le, true)?,
            O::IfGt => self.compare(Compare::Gt, false)?,
            O::IfNgt => self.compare(Compare::Gt, true)?,
            O::IfGe => self.compare(Compare::Ge, false)?,
            O::IfNge => self.compare(Compare::Ge, true)?,
            O::LookupSwitch => self.lookup_switch()?,
            O::ReturnVoid => Op::ReturnVoid,
            O::ReturnValue => Op::ReturnValue,

            // ===== Stack & literals =====
            O::Pop => Op::Pop,
            O::Dup => Op::Dup,
            O::Swap => Op::Swap,
            O::PushNull => Op::PushNull,
            O::PushUndefined => Op::PushUndefined,
            O::PushTrue => Op::PushTrue,
            O::PushFalse => Op::PushFalse,
            O::PushNaN => Op::PushNaN,
            O::PushByte => Op::PushInt(self.r.read_s8()?),
            // The operand is a u30 whose low 16 bits are a signed short.
            O::PushShort => Op::PushInt(self.r.read_u30()? as u16 as i16 as i32),
            O::PushInt => {
                let index = self.r.read_u30()?;
                Op::PushInt(self.pool.int(index).map_err(|e| self.constant(e))?)
            }
            O::PushUInt => {
                let index = self.r.read_u30()?;
                Op::PushUInt(self.pool.uint(index).map_err(|e| self.constant(e))?)
            }
            O::PushDouble => {
                let index = self.r.read_u30()?;
                Op::PushDouble(self.pool.double(index).map_err(|e| self.constant(e))?)
            }
            O::PushString => {
                let index = self.r.read_u30()?;
                Op::PushString(self.pool.string(index).map_err(|e| self.constant(e))?)
            }
            O::PushNamespace => {
                let index = self.r.read_u30()?;
                Op::PushNamespace(self.pool.namespace(index).map_err(|e| self.constant(e))?)
            }

            // ===== Locals =====
            O::GetLocal => Op::GetLocal(self.r.read_u30()?),
            O::SetLocal => Op::SetLocal(self.r.read_u30()?),
            O::GetLocal0 => Op::GetLocal(0),
            O::GetLocal1 => Op::GetLocal(1),
            O::GetLocal2 => Op::GetLocal(2),
            O::GetLocal3 => Op::GetLocal(3),
            O::SetLocal0 => Op::SetLocal(0),
            O::SetLocal1 => Op::SetLocal(1),
            O::SetLocal2 => Op::SetLocal(2),
            O::SetLocal3 => Op::SetLocal(3),
            O::IncLocal => Op::IncLocal { reg: self.r.read_u30()?, delta: 1, int: false },
            O::DecLocal => Op::IncLocal { reg: self.r.read_u30()?, delta: -1, int: false },
            O::IncLocalI => Op::IncLocal { reg: self.r.read_u30()?, delta: 1, int: true },
            O::DecLocalI => Op::IncLocal { reg: self.r.read_u30()?, delta: -1, int: true },

            // ===== Scope =====
            O::PushScope => Op::PushScope,
            O::PushWith => Op::PushWith,
            O::PopScope => Op::PopScope,
            O::GetScopeObject => Op::GetScopeObject(self.r.read_u8()? as u32),
            O::GetOuterScope => Op::GetOuterScope(self.r.read_u30()?),
            O::GetGlobalScope => Op::GetGlobalScope,

            // ===== Properties =====
            O::FindPropStrict => Op::FindProperty { name: self.multiname()?, strict: true },
            O::FindProperty => Op::FindProperty { name: self.multiname()?, strict: false },
            O::FindDef => Op::FindDef(self.static_multiname()?),
            O::GetLex => Op::GetLex(self.static_multiname()?),
            O::GetProperty => Op::GetProperty(self.multiname()?),
            O::SetProperty => Op::SetProperty(self.multiname()?),
            O::InitProperty => Op::InitProperty(self.multiname()?),
            O::DeleteProperty => Op::DeleteProperty(self.multiname()?),
            O::GetSuper => Op::GetSuper(self.multiname()?),
            O::SetSuper => Op::SetSuper(self.multiname()?),
            O::GetSlot => Op::GetSlot(self.r.read_u30()?),
            O::SetSlot => Op::SetSlot(self.r.read_u30()?),
            O::GetGlobalSlot => Op::GetGlobalSlot(self.r.read_u30()?),
            O::SetGlobalSlot => Op::SetGlobalSlot(self.r.read_u30()?),

            // ===== Calls =====
            O::Call => Op::Call(self.r.read_u30()?),
            O::Construct => Op::Construct(self.r.read_u30()?),
            O::CallMethod => Op::CallMethod { disp: self.r.read_u30()?, argc: self.r.read_u30()? },
            O::CallStatic => Op::CallStatic { method: self.r.read_u30()?, argc: self.r.read_u30()? },
            O::CallProperty | O::CallPropLex | O::CallPropVoid => {
                let kind = match self.opcode {
                    O::CallPropLex => CallKind::Lex,
                    O::CallPropVoid => CallKind::Void,
                    _ => CallKind::Normal,
                };
                Op::CallProperty { name: self.multiname()?, argc: self.r.read_u30()?, kind }
            }
            O::CallSuper | O::CallSuperVoid => Op::CallSuper {
                name: self.multiname()?,
                argc: self.r.read_u30()?,
                void: self.opcode == O::CallSuperVoid,
            },
            O::ConstructProp => Op::ConstructProp { name: self.multiname()?, argc: self.r.read_u30()? },
            O::ConstructSuper => Op::ConstructSuper(self.r.read_u30()?),

            // ===== Allocation =====
            O::NewObject => Op::NewObject(self.r.read_u30()?),
            O::NewArray => Op::NewArray(self.r.read_u30()?),
            O::NewActivation => Op::NewActivation,
            O::NewFunction => Op::NewFunction(self.r.read_u30()?),
            O::NewCatch => Op::NewCatch(self.r.read_u30()?),
            O::ApplyType => Op::ApplyType(self.r.read_u30()?),

            // ===== Enumeration =====
            O::HasNext => Op::HasNext,
            O::HasNext2 => Op::HasNext2 { object_reg: self.r.read_u30()?, index_reg: self.r.read_u30()? },
            O::NextName => Op::NextName,
            O::NextValue => Op::NextValue,

            // ===== Types =====
            O::ConvertS => Op::Convert(Conversion::ConvertS),
            O::ConvertI => Op::Convert(Conversion::ConvertI),
            O::ConvertU => Op::Convert(Conversion::ConvertU),
            O::ConvertD => Op::Convert(Conversion::ConvertD),
            O::ConvertB => Op::Convert(Conversion::ConvertB),
            O::ConvertO => Op::Convert(Conversion::ConvertO),
            O::CoerceA => Op::Convert(Conversion::CoerceA),
            O::CoerceB => Op::Convert(Conversion::CoerceB),
            O::CoerceI => Op::Convert(Conversion::CoerceI),
            O::CoerceD => Op::Convert(Conversion::CoerceD),
            O::CoerceS => Op::Convert(Conversion::CoerceS),
            O::CoerceU => Op::Convert(Conversion::CoerceU),
            O::CoerceO => Op::Convert(Conversion::CoerceO),
            O::Coerce => Op::Coerce(self.static_multiname()?),
            O::AsType => Op::AsType(self.static_multiname()?),
            O::IsType => Op::IsType(self.static_multiname()?),
            O::AsTypeLate => Op::Binary(BinaryOp::AsTypeLate),
            O::IsTypeLate => Op::Binary(BinaryOp::IsTypeLate),
            O::InstanceOf => Op::Binary(BinaryOp::InstanceOf),
            O::In => Op::Binary(BinaryOp::In),

            // ===== Arithmetic =====
            O::Negate => Op::Unary(UnaryOp::Negate),
            O::NegateI => Op::Unary(UnaryOp::NegateI),
            O::Increment => Op::Unary(UnaryOp::Increment),
            O::IncrementI => Op::Unary(UnaryOp::IncrementI),
            O::Decrement => Op::Unary(UnaryOp::Decrement),
            O::DecrementI => Op::Unary(UnaryOp::DecrementI),
            O::Not => Op::Unary(UnaryOp::Not),
            O::BitNot => Op::Unary(UnaryOp::BitNot),
            O::TypeOf => Op::Unary(UnaryOp::TypeOf),
            O::Sxi1 => Op::Unary(UnaryOp::Sxi1),
            O::Sxi8 => Op::Unary(UnaryOp::Sxi8),
            O::Sxi16 => Op::Unary(UnaryOp::Sxi16),
            O::Add => Op::Binary(BinaryOp::Add),
            O::AddI => Op::Binary(BinaryOp::AddI),
            O::Subtract => Op::Binary(BinaryOp::Subtract),
            O::SubtractI => Op::Binary(BinaryOp::SubtractI),
            O::Multiply => Op::Binary(BinaryOp::Multiply),
            O::MultiplyI => Op::Binary(BinaryOp::MultiplyI),
            O::Divide => Op::Binary(BinaryOp::Divide),
            O::Modulo => Op::Binary(BinaryOp::Modulo),
            O::LShift => Op::Binary(BinaryOp::LShift),
            O::RShift => Op::Binary(BinaryOp::RShift),
            O::URShift => Op::Binary(BinaryOp::URShift),
            O::BitAnd => Op::Binary(BinaryOp::BitAnd),
            O::BitOr => Op::Binary(BinaryOp::BitOr),
            O::BitXor => Op::Binary(BinaryOp::BitXor),
            O::Equals => Op::Binary(BinaryOp::Equals),
            O::StrictEquals => Op::Binary(BinaryOp::StrictEquals),
            O::LessThan => Op::Binary(BinaryOp::LessThan),
            O::LessEquals => Op::Binary(BinaryOp::LessEquals),
            O::GreaterThan => Op::Binary(BinaryOp::GreaterThan),
            O::GreaterEquals => Op::Binary(BinaryOp::GreaterEquals),

            // ===== Domain memory =====
            O::Li8 => Op::Load(MemKind::U8),
            O::Li16 => Op::Load(MemKind::U16),
            O::Li32 => Op::Load(MemKind::I32),
            O::Lf32 => Op::Load(MemKind::F32),
            O::Lf64 => Op::Load(MemKind::F64),
            O::Si8 => Op::Store(MemKind::U8),
            O::Si16 => Op::Store(MemKind::U16),
            O::Si32 => Op::Store(MemKind::I32),
            O::Sf32 => Op::Store(MemKind::F32),
            O::Sf64 => Op::Store(MemKind::F64),

            // ===== Not translated: E4X and class creation =====
            O::Dxns
            | O::DxnsLate
            | O::EscXElem
            | O::EscXAttr
            | O::CheckFilter
            | O::GetDescendants
            | O::NewClass => {
                return Err(DecodeError::Unsupported { opcode: self.opcode, offset: self.offset })
            }
        };
        Ok(op)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Nop => f.write_str("nop"),
            Op::Kill(r) => write!(f, "kill {r}"),
            Op::Throw => f.write_str("throw"),
            Op::Jump(t) => write!(f, "jump @{t}"),
            Op::IfTrue(t) => write!(f, "iftrue @{t}"),
            Op::IfFalse(t) => write!(f, "iffalse @{t}"),
            Op::IfCompare { cmp, negate, target } => {
                write!(f, "if{}{:?} @{}", if *negate { "not." } else { "" }, cmp, target)
            }
            Op::LookupSwitch { targets } => write!(f, "lookupswitch {targets:?}"),
            Op::ReturnVoid => f.write_str("returnvoid"),
            Op::ReturnValue => f.write_str("returnvalue"),
            Op::Pop => f.write_str("pop"),
            Op::Dup => f.write_str("dup"),
            Op::Swap => f.write_str("swap"),
            Op::PushNull => f.write_str("pushnull"),
            Op::PushUndefined => f.write_str("pushundefined"),
            Op::PushTrue => f.write_str("pushtrue"),
            Op::PushFalse => f.write_str("pushfalse"),
            Op::PushNaN => f.write_str("pushnan"),
            Op::PushInt(v) => write!(f, "pushint {v}"),
            Op::PushUInt(v) => write!(f, "pushuint {v}"),
            Op::PushDouble(v) => write!(f, "pushdouble {v}"),
            Op::PushString(s) => write!(f, "pushstring {s:?}"),
            Op::PushNamespace(ns) => write!(f, "pushnamespace {:?}", ns.uri),
            Op::GetLocal(r) => write!(f, "getlocal {r}"),
            Op::SetLocal(r) => write!(f, "setlocal {r}"),
            Op::IncLocal { reg, delta, int } => {
                write!(f, "{}local{} {}", if *delta > 0 { "inc" } else { "dec" }, if *int { "_i" } else { "" }, reg)
            }
            Op::PushScope => f.write_str("pushscope"),
            Op::PushWith => f.write_str("pushwith"),
            Op::PopScope => f.write_str("popscope"),
            Op::GetScopeObject(i) => write!(f, "getscopeobject {i}"),
            Op::GetOuterScope(i) => write!(f, "getouterscope {i}"),
            Op::GetGlobalScope => f.write_str("getglobalscope"),
            Op::FindProperty { name, strict } => {
                write!(f, "findprop{} #{}", if *strict { "strict" } else { "erty" }, name.index)
            }
            Op::FindDef(n) => write!(f, "finddef #{}", n.index),
            Op::GetLex(n) => write!(f, "getlex #{}", n.index),
            Op::GetProperty(n) => write!(f, "getproperty #{}", n.index),
            Op::SetProperty(n) => write!(f, "setproperty #{}", n.index),
            Op::InitProperty(n) => write!(f, "initproperty #{}", n.index),
            Op::DeleteProperty(n) => write!(f, "deleteproperty #{}", n.index),
            Op::GetSuper(n) => write!(f, "getsuper #{}", n.index),
            Op::SetSuper(n) => write!(f, "setsuper #{}", n.index),
            Op::GetSlot(s) => write!(f, "getslot {s}"),
            Op::SetSlot(s) => write!(f, "setslot {s}"),
            Op::GetGlobalSlot(s) => write!(f, "getglobalslot {s}"),
            Op::SetGlobalSlot(s) => write!(f, "setglobalslot {s}"),
            Op::Call(n) => write!(f, "call {n}"),
            Op::Construct(n) => write!(f, "construct {n}"),
            Op::CallMethod { disp, argc } => write!(f, "callmethod {disp} {argc}"),
            Op::CallStatic { method, argc } => write!(f, "callstatic {method} {argc}"),
            Op::CallProperty { name, argc, kind } => {
                let m = match kind {
                    CallKind::Normal => "callproperty",
                    CallKind::Lex => "callproplex",
                    CallKind::Void => "callpropvoid",
                };
                write!(f, "{m} #{} {argc}", name.index)
            }
            Op::CallSuper { name, argc, void } => {
                write!(f, "callsuper{} #{} {}", if *void { "void" } else { "" }, name.index, argc)
            }
            Op::ConstructProp { name, argc } => write!(f, "constructprop #{} {argc}", name.index),
            Op::ConstructSuper(n) => write!(f, "constructsuper {n}"),
            Op::NewObject(n) => write!(f, "newobject {n}"),
            Op::NewArray(n) => write!(f, "newarray {n}"),
            Op::NewActivation => f.write_str("newactivation"),
            Op::NewFunction(m) => write!(f, "newfunction {m}"),
            Op::NewCatch(i) => write!(f, "newcatch {i}"),
            Op::ApplyType(n) => write!(f, "applytype {n}"),
            Op::HasNext => f.write_str("hasnext"),
            Op::HasNext2 { object_reg, index_reg } => write!(f, "hasnext2 {object_reg} {index_reg}"),
            Op::NextName => f.write_str("nextname"),
            Op::NextValue => f.write_str("nextvalue"),
            Op::Convert(c) => write!(f, "{c:?}"),
            Op::Coerce(n) => write!(f, "coerce #{}", n.index),
            Op::AsType(n) => write!(f, "astype #{}", n.index),
            Op::IsType(n) => write!(f, "istype #{}", n.index),
            Op::Unary(u) => write!(f, "{u:?}"),
            Op::Binary(b) => write!(f, "{b:?}"),
            Op::Load(k) => write!(f, "load.{k:?}"),
            Op::Store(k) => write!(f, "store.{k:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::CodeWriter;

    #[test]
    fn test_decode_simple_sequence() {
        let mut w = CodeWriter::new();
        w.push_byte(2).push_byte(3).op(Opcode::Add).op(Opcode::ReturnValue);
        let code = w.finish().unwrap();
        let instrs = decode_method(&code, &ConstantPool::new()).unwrap();
        assert_eq!(instrs.len(), 4);
        assert_eq!(instrs[0].op, Op::PushInt(2));
        assert_eq!(instrs[0].size, 2);
        assert_eq!(instrs[2].op, Op::Binary(BinaryOp::Add));
        assert_eq!(instrs[3].offset, 5);
    }

    #[test]
    fn test_decode_invalid_opcode() {
        let code = vec![0x02, 0xFF];
        let err = decode_method(&code, &ConstantPool::new()).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode { byte: 0xFF, offset: 1 });
        assert!(err.is_unknown_bytecode());
    }

    #[test]
    fn test_decode_unsupported_opcode() {
        let code = vec![Opcode::DxnsLate.to_u8()];
        let err = decode_method(&code, &ConstantPool::new()).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported { opcode: Opcode::DxnsLate, offset: 0 }));
    }

    #[test]
    fn test_decode_truncated_operand() {
        let code = vec![Opcode::PushByte.to_u8()];
        let err = decode_method(&code, &ConstantPool::new()).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedEnd(0));
    }

    #[test]
    fn test_decode_resolves_literals() {
        let mut pool = ConstantPool::new();
        let s = pool.add_string("hi");
        let d = pool.add_double(1.5);
        let mut w = CodeWriter::new();
        w.op_u30(Opcode::PushString, s).op_u30(Opcode::PushDouble, d).op_u30(Opcode::PushShort, 0xFFFF);
        let instrs = decode_method(&w.finish().unwrap(), &pool).unwrap();
        assert_eq!(instrs[0].op, Op::PushString(Rc::from("hi")));
        assert_eq!(instrs[1].op, Op::PushDouble(1.5));
        assert_eq!(instrs[2].op, Op::PushInt(-1));
    }

    #[test]
    fn test_decode_bad_constant() {
        let mut w = CodeWriter::new();
        w.op_u30(Opcode::PushInt, 7);
        let err = decode_method(&w.finish().unwrap(), &ConstantPool::new()).unwrap_err();
        assert!(matches!(err, DecodeError::Constant { offset: 0, .. }));
    }

    #[test]
    fn test_decode_branch_targets() {
        let mut w = CodeWriter::new();
        let end = w.new_label();
        w.op(Opcode::PushTrue).branch(Opcode::IfFalse, end).op(Opcode::Nop).bind(end).op(Opcode::ReturnVoid);
        let instrs = decode_method(&w.finish().unwrap(), &ConstantPool::new()).unwrap();
        assert_eq!(instrs[1].op, Op::IfFalse(6));
        assert_eq!(instrs[3].offset, 6);
    }

    #[test]
    fn test_decode_branch_out_of_range() {
        // jump +100 from a 4-byte method
        let code = vec![Opcode::Jump.to_u8(), 100, 0, 0];
        let err = decode_method(&code, &ConstantPool::new()).unwrap_err();
        assert!(matches!(err, DecodeError::BranchOutOfRange { offset: 0, target: 104 }));
    }

    #[test]
    fn test_decode_runtime_multiname() {
        let mut pool = ConstantPool::new();
        let late = pool.add_multiname(crate::abc::Multiname::RtqNameL { attribute: false });
        let mut w = CodeWriter::new();
        w.op_u30(Opcode::GetProperty, late);
        let instrs = decode_method(&w.finish().unwrap(), &pool).unwrap();
        assert_eq!(instrs[0].op, Op::GetProperty(MnOperand { index: late, runtime: RuntimeParts::Both }));

        let mut w = CodeWriter::new();
        w.op_u30(Opcode::GetLex, late);
        let err = decode_method(&w.finish().unwrap(), &pool).unwrap_err();
        assert!(matches!(err, DecodeError::RuntimeNameNotAllowed { opcode: Opcode::GetLex, .. }));
    }

    #[test]
    fn test_decode_lookup_switch() {
        let mut w = CodeWriter::new();
        let a = w.new_label();
        let b = w.new_label();
        w.push_byte(0).lookup_switch(a, &[a, b]).bind(a).op(Opcode::ReturnVoid).bind(b).op(Opcode::ReturnVoid);
        let instrs = decode_method(&w.finish().unwrap(), &ConstantPool::new()).unwrap();
        // pushbyte(2) + lookupswitch(1 + 3 + 1 + 3*2) = 13
        assert_eq!(instrs[1].op, Op::LookupSwitch { targets: vec![13, 13, 14] });
    }
}
