//! Instruction semantics shared by compiled procedures and the interpreter
//!
//! Both executors call into these helpers so a method behaves the same
//! whichever way it runs. Objects are reached only through the host.

use std::rc::Rc;

use crate::abc::Name;
use crate::jit::analysis::decoder::{BinaryOp, Compare, Conversion, MemKind, UnaryOp};
use super::host::{ExecError, Hint, HostFault, HostResult, ObjectModel};
use super::value::{to_int32, to_uint32, Value};

/// Primitive value of `v`
pub fn to_primitive(host: &mut dyn ObjectModel, v: &Value, hint: Hint) -> HostResult<Value> {
    match v {
        Value::Object(_) => host.to_primitive(v, hint),
        other => Ok(other.clone()),
    }
}

pub fn to_number(host: &mut dyn ObjectModel, v: &Value) -> HostResult<f64> {
    if let Some(n) = v.primitive_to_number() {
        return Ok(n);
    }
    let prim = host.to_primitive(v, Hint::Number)?;
    Ok(prim.primitive_to_number().unwrap_or(f64::NAN))
}

pub fn to_string(host: &mut dyn ObjectModel, v: &Value) -> HostResult<Rc<str>> {
    if let Some(s) = v.primitive_to_string() {
        return Ok(s);
    }
    let prim = host.to_primitive(v, Hint::String)?;
    Ok(prim.primitive_to_string().unwrap_or_else(|| Rc::from("[object Object]")))
}

pub fn type_of(host: &dyn ObjectModel, v: &Value) -> &'static str {
    match v {
        Value::Object(id) => host.type_of(*id),
        other => other.primitive_type_name().unwrap_or("object"),
    }
}

/// Fail with a TypeError when `v` cannot have properties
pub fn check_receiver(v: &Value) -> Result<(), HostFault> {
    if v.is_nullish() {
        return Err(HostFault::null_reference(v));
    }
    Ok(())
}

/// Complete a runtime name from its stack parts
pub fn runtime_name(
    host: &mut dyn ObjectModel,
    template: &Name,
    ns: Option<&Value>,
    local: Option<&Value>,
) -> HostResult<Name> {
    host.runtime_name(template, ns, local)
}

/// Abstract equality (`==`)
pub fn abstract_equals(host: &mut dyn ObjectModel, a: &Value, b: &Value) -> HostResult<bool> {
    Ok(match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Object(_), _) => {
            let pa = host.to_primitive(a, Hint::Number)?;
            return abstract_equals(host, &pa, b);
        }
        (_, Value::Object(_)) => {
            let pb = host.to_primitive(b, Hint::Number)?;
            return abstract_equals(host, a, &pb);
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Namespace(x), Value::Namespace(y)) => x.uri == y.uri,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => {
            // Remaining mixes compare numerically.
            let (x, y) = (to_number(host, a)?, to_number(host, b)?);
            x == y
        }
    })
}

/// `a < b`; `None` when the comparison is undefined (NaN involved)
pub fn less_than(host: &mut dyn ObjectModel, a: &Value, b: &Value) -> HostResult<Option<bool>> {
    let pa = to_primitive(host, a, Hint::Number)?;
    let pb = to_primitive(host, b, Hint::Number)?;
    if let (Value::String(x), Value::String(y)) = (&pa, &pb) {
        return Ok(Some(x < y));
    }
    let (x, y) = (to_number(host, &pa)?, to_number(host, &pb)?);
    if x.is_nan() || y.is_nan() {
        return Ok(None);
    }
    Ok(Some(x < y))
}

/// Evaluate a comparison
pub fn compare(host: &mut dyn ObjectModel, cmp: Compare, a: &Value, b: &Value) -> HostResult<bool> {
    Ok(match cmp {
        Compare::Eq => abstract_equals(host, a, b)?,
        Compare::StrictEq => a.strict_equals(b),
        Compare::Lt => less_than(host, a, b)? == Some(true),
        Compare::Gt => less_than(host, b, a)? == Some(true),
        Compare::Le => less_than(host, b, a)? == Some(false),
        Compare::Ge => less_than(host, a, b)? == Some(false),
    })
}

/// Whether a conditional branch on `cmp` is taken
pub fn branch_taken(host: &mut dyn ObjectModel, cmp: Compare, negate: bool, a: &Value, b: &Value) -> HostResult<bool> {
    Ok(compare(host, cmp, a, b)? != negate)
}

fn int_op(host: &mut dyn ObjectModel, a: &Value, b: &Value, f: impl Fn(i32, i32) -> i32) -> HostResult<Value> {
    let x = to_int32(to_number(host, a)?);
    let y = to_int32(to_number(host, b)?);
    Ok(Value::Int(f(x, y)))
}

fn num_op(host: &mut dyn ObjectModel, a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> HostResult<Value> {
    let x = to_number(host, a)?;
    let y = to_number(host, b)?;
    Ok(Value::from_f64(f(x, y)))
}

/// `add`: concatenation when either primitive is a string
pub fn add(host: &mut dyn ObjectModel, a: &Value, b: &Value) -> HostResult<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Ok(Value::from_f64(*x as f64 + *y as f64));
    }
    let pa = to_primitive(host, a, Hint::Number)?;
    let pb = to_primitive(host, b, Hint::Number)?;
    if matches!(pa, Value::String(_)) || matches!(pb, Value::String(_)) {
        let mut s = to_string(host, &pa)?.to_string();
        s.push_str(&to_string(host, &pb)?);
        return Ok(Value::String(Rc::from(s)));
    }
    num_op(host, &pa, &pb, |x, y| x + y)
}

pub fn binary(host: &mut dyn ObjectModel, op: BinaryOp, a: &Value, b: &Value) -> HostResult<Value> {
    match op {
        BinaryOp::Add => add(host, a, b),
        BinaryOp::AddI => int_op(host, a, b, i32::wrapping_add),
        BinaryOp::Subtract => num_op(host, a, b, |x, y| x - y),
        BinaryOp::SubtractI => int_op(host, a, b, i32::wrapping_sub),
        BinaryOp::Multiply => num_op(host, a, b, |x, y| x * y),
        BinaryOp::MultiplyI => int_op(host, a, b, i32::wrapping_mul),
        BinaryOp::Divide => num_op(host, a, b, |x, y| x / y),
        BinaryOp::Modulo => num_op(host, a, b, |x, y| x % y),
        BinaryOp::LShift => int_op(host, a, b, |x, y| x.wrapping_shl(y as u32 & 31)),
        BinaryOp::RShift => int_op(host, a, b, |x, y| x.wrapping_shr(y as u32 & 31)),
        BinaryOp::URShift => {
            let x = to_uint32(to_number(host, a)?);
            let y = to_uint32(to_number(host, b)?);
            Ok(Value::from_u32(x >> (y & 31)))
        }
        BinaryOp::BitAnd => int_op(host, a, b, |x, y| x & y),
        BinaryOp::BitOr => int_op(host, a, b, |x, y| x | y),
        BinaryOp::BitXor => int_op(host, a, b, |x, y| x ^ y),
        BinaryOp::Equals => Ok(Value::Bool(compare(host, Compare::Eq, a, b)?)),
        BinaryOp::StrictEquals => Ok(Value::Bool(a.strict_equals(b))),
        BinaryOp::LessThan => Ok(Value::Bool(compare(host, Compare::Lt, a, b)?)),
        BinaryOp::LessEquals => Ok(Value::Bool(compare(host, Compare::Le, a, b)?)),
        BinaryOp::GreaterThan => Ok(Value::Bool(compare(host, Compare::Gt, a, b)?)),
        BinaryOp::GreaterEquals => Ok(Value::Bool(compare(host, Compare::Ge, a, b)?)),
        BinaryOp::InstanceOf => Ok(Value::Bool(host.instance_of(a, b)?)),
        BinaryOp::In => {
            check_receiver(b)?;
            let key = to_string(host, a)?;
            Ok(Value::Bool(host.has_property(b, &Name::public(&key))?))
        }
        BinaryOp::IsTypeLate => Ok(Value::Bool(host.is_type_value(a, b)?)),
        BinaryOp::AsTypeLate => {
            let is = host.is_type_value(a, b)?;
            Ok(if is { a.clone() } else { Value::Null })
        }
    }
}

pub fn unary(host: &mut dyn ObjectModel, op: UnaryOp, v: &Value) -> HostResult<Value> {
    Ok(match op {
        UnaryOp::Negate => Value::from_f64(-to_number(host, v)?),
        UnaryOp::NegateI => Value::Int(to_int32(to_number(host, v)?).wrapping_neg()),
        UnaryOp::Increment => Value::from_f64(to_number(host, v)? + 1.0),
        UnaryOp::IncrementI => Value::Int(to_int32(to_number(host, v)?).wrapping_add(1)),
        UnaryOp::Decrement => Value::from_f64(to_number(host, v)? - 1.0),
        UnaryOp::DecrementI => Value::Int(to_int32(to_number(host, v)?).wrapping_sub(1)),
        UnaryOp::Not => Value::Bool(!v.to_boolean()),
        UnaryOp::BitNot => Value::Int(!to_int32(to_number(host, v)?)),
        UnaryOp::TypeOf => Value::string(type_of(host, v)),
        UnaryOp::Sxi1 => Value::Int(-(to_int32(to_number(host, v)?) & 1)),
        UnaryOp::Sxi8 => Value::Int(to_int32(to_number(host, v)?) as i8 as i32),
        UnaryOp::Sxi16 => Value::Int(to_int32(to_number(host, v)?) as i16 as i32),
    })
}

pub fn convert(host: &mut dyn ObjectModel, conv: Conversion, v: Value) -> HostResult<Value> {
    Ok(match conv {
        Conversion::ConvertS => Value::String(to_string(host, &v)?),
        Conversion::CoerceS => match v {
            Value::Undefined | Value::Null => Value::Null,
            other => Value::String(to_string(host, &other)?),
        },
        Conversion::ConvertI | Conversion::CoerceI => Value::Int(to_int32(to_number(host, &v)?)),
        Conversion::ConvertU | Conversion::CoerceU => Value::from_u32(to_uint32(to_number(host, &v)?)),
        Conversion::ConvertD | Conversion::CoerceD => Value::from_f64(to_number(host, &v)?),
        Conversion::ConvertB | Conversion::CoerceB => Value::Bool(v.to_boolean()),
        Conversion::ConvertO => {
            check_receiver(&v)?;
            v
        }
        Conversion::CoerceA => v,
        Conversion::CoerceO => match v {
            Value::Undefined => Value::Null,
            other => other,
        },
    })
}

/// `inclocal`/`declocal` and their integer forms
pub fn increment(host: &mut dyn ObjectModel, v: &Value, delta: i32, int: bool) -> HostResult<Value> {
    let n = to_number(host, v)?;
    Ok(if int { Value::Int(to_int32(n).wrapping_add(delta)) } else { Value::from_f64(n + delta as f64) })
}

/// `newobject` from flattened name/value pairs
pub fn new_object(host: &mut dyn ObjectModel, flat: &[Value]) -> HostResult<Value> {
    let mut pairs = Vec::with_capacity(flat.len() / 2);
    for pair in flat.chunks_exact(2) {
        let key = to_string(host, &pair[0])?;
        pairs.push((key, pair[1].clone()));
    }
    host.new_object(pairs)
}

/// `hasnext2`: advances the enumeration state held in two locals.
///
/// Returns the new object and index values and whether another property
/// remains.
pub fn has_next2(host: &mut dyn ObjectModel, obj: &Value, index: &Value) -> HostResult<(Value, Value, bool)> {
    if obj.is_nullish() {
        return Ok((Value::Null, Value::Int(0), false));
    }
    let current = to_uint32(to_number(host, index)?);
    let next = host.next_index(obj, current)?;
    let obj = if next == 0 { Value::Null } else { obj.clone() };
    Ok((obj, Value::from_u32(next), next != 0))
}

/// Whether a handler with catch type `filter` takes `thrown`
pub fn catches(host: &mut dyn ObjectModel, filter: Option<&Name>, thrown: &Value) -> HostResult<bool> {
    match filter {
        None => Ok(true),
        Some(ty) => host.is_type(thrown, ty),
    }
}

/// Guest-visible value of an error, or the error itself when it can never
/// be caught
pub fn catchable_value(host: &mut dyn ObjectModel, err: &ExecError) -> Option<Value> {
    match err {
        ExecError::Throw(v) => Some(v.clone()),
        ExecError::Host(fault) => Some(host.make_error(fault)),
        ExecError::Abort(_) => None,
    }
}

fn memory_range(len: usize, addr: i32, width: usize) -> Result<usize, HostFault> {
    let start = usize::try_from(addr).map_err(|_| HostFault::range_error(1506, "The specified range is invalid."))?;
    match start.checked_add(width) {
        Some(end) if end <= len => Ok(start),
        _ => Err(HostFault::range_error(1506, "The specified range is invalid.")),
    }
}

/// Read from domain memory
pub fn memory_load(mem: &[u8], kind: MemKind, addr: i32) -> Result<Value, HostFault> {
    let at = memory_range(mem.len(), addr, kind.width())?;
    let bytes = &mem[at..at + kind.width()];
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(match kind {
        MemKind::U8 => Value::Int(buf[0] as i32),
        MemKind::U16 => Value::Int(u16::from_le_bytes([buf[0], buf[1]]) as i32),
        MemKind::I32 => Value::Int(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        MemKind::F32 => Value::from_f64(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64),
        MemKind::F64 => Value::from_f64(f64::from_le_bytes(buf)),
    })
}

/// Write to domain memory
pub fn memory_store(mem: &mut [u8], kind: MemKind, addr: i32, value: f64) -> Result<(), HostFault> {
    let at = memory_range(mem.len(), addr, kind.width())?;
    let int = to_int32(value);
    match kind {
        MemKind::U8 => mem[at] = int as u8,
        MemKind::U16 => mem[at..at + 2].copy_from_slice(&(int as u16).to_le_bytes()),
        MemKind::I32 => mem[at..at + 4].copy_from_slice(&int.to_le_bytes()),
        MemKind::F32 => mem[at..at + 4].copy_from_slice(&(value as f32).to_le_bytes()),
        MemKind::F64 => mem[at..at + 8].copy_from_slice(&value.to_le_bytes()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::runtime::simple_host::SimpleHost;

    #[test]
    fn test_add_numbers_and_strings() {
        let mut host = SimpleHost::new();
        assert_eq!(add(&mut host, &Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(add(&mut host, &Value::Int(i32::MAX), &Value::Int(1)).unwrap(), Value::Number(2147483648.0));
        assert_eq!(add(&mut host, &Value::string("a"), &Value::Int(1)).unwrap(), Value::string("a1"));
        assert_eq!(add(&mut host, &Value::Number(0.5), &Value::Null).unwrap(), Value::Number(0.5));
    }

    #[test]
    fn test_int_arithmetic_wraps() {
        let mut host = SimpleHost::new();
        let r = binary(&mut host, BinaryOp::AddI, &Value::Int(i32::MAX), &Value::Int(1)).unwrap();
        assert_eq!(r, Value::Int(i32::MIN));
        let r = binary(&mut host, BinaryOp::URShift, &Value::Int(-1), &Value::Int(0)).unwrap();
        assert_eq!(r, Value::Number(4294967295.0));
        let r = binary(&mut host, BinaryOp::LShift, &Value::Int(1), &Value::Int(33)).unwrap();
        assert_eq!(r, Value::Int(2));
    }

    #[test]
    fn test_comparisons_with_nan() {
        let mut host = SimpleHost::new();
        let nan = Value::Number(f64::NAN);
        let one = Value::Int(1);
        assert!(!compare(&mut host, Compare::Lt, &nan, &one).unwrap());
        assert!(!compare(&mut host, Compare::Ge, &nan, &one).unwrap());
        // ifnlt jumps when the comparison is undefined
        assert!(branch_taken(&mut host, Compare::Lt, true, &nan, &one).unwrap());
        assert!(compare(&mut host, Compare::Le, &one, &one).unwrap());
    }

    #[test]
    fn test_abstract_equality() {
        let mut host = SimpleHost::new();
        assert!(abstract_equals(&mut host, &Value::Null, &Value::Undefined).unwrap());
        assert!(abstract_equals(&mut host, &Value::string("1"), &Value::Int(1)).unwrap());
        assert!(abstract_equals(&mut host, &Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!abstract_equals(&mut host, &Value::Null, &Value::Int(0)).unwrap());
    }

    #[test]
    fn test_conversions() {
        let mut host = SimpleHost::new();
        assert_eq!(convert(&mut host, Conversion::ConvertI, Value::Number(3.7)).unwrap(), Value::Int(3));
        assert_eq!(convert(&mut host, Conversion::CoerceS, Value::Undefined).unwrap(), Value::Null);
        assert_eq!(convert(&mut host, Conversion::ConvertS, Value::Null).unwrap(), Value::string("null"));
        assert_eq!(convert(&mut host, Conversion::CoerceO, Value::Undefined).unwrap(), Value::Null);
        assert!(convert(&mut host, Conversion::ConvertO, Value::Null).is_err());
    }

    #[test]
    fn test_sign_extension() {
        let mut host = SimpleHost::new();
        assert_eq!(unary(&mut host, UnaryOp::Sxi8, &Value::Int(0xFF)).unwrap(), Value::Int(-1));
        assert_eq!(unary(&mut host, UnaryOp::Sxi1, &Value::Int(3)).unwrap(), Value::Int(-1));
        assert_eq!(unary(&mut host, UnaryOp::Sxi16, &Value::Int(0x7FFF)).unwrap(), Value::Int(0x7FFF));
    }

    #[test]
    fn test_memory_access() {
        let mut mem = vec![0u8; 8];
        memory_store(&mut mem, MemKind::I32, 4, -2.0).unwrap();
        assert_eq!(memory_load(&mem, MemKind::I32, 4).unwrap(), Value::Int(-2));
        assert_eq!(memory_load(&mem, MemKind::U8, 4).unwrap(), Value::Int(0xFE));
        assert!(memory_load(&mem, MemKind::F64, 1).is_err());
        assert!(memory_store(&mut mem, MemKind::U8, -1, 0.0).is_err());
    }
}
