//! Guest values
//!
//! Primitives are held inline; objects are opaque handles owned by the host
//! object model. Numbers are canonical: an integral value that fits in an
//! `i32` (and is not negative zero) is always `Int`, anything else `Number`.

use std::fmt;
use std::rc::Rc;

use crate::abc::Namespace;

/// Handle to a host-owned object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// A guest value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Number(f64),
    String(Rc<str>),
    Namespace(Rc<Namespace>),
    Object(ObjectId),
}

impl Value {
    /// Canonical numeric value
    pub fn from_f64(n: f64) -> Value {
        if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 && !(n == 0.0 && n.is_sign_negative()) {
            Value::Int(n as i32)
        } else {
            Value::Number(n)
        }
    }

    pub fn from_u32(n: u32) -> Value {
        match i32::try_from(n) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Number(n as f64),
        }
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Number(_))
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric value without conversion
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Namespace(_) | Value::Object(_) => true,
        }
    }

    /// ToNumber for primitives; `None` for objects, which need the host
    pub fn primitive_to_number(&self) -> Option<f64> {
        Some(match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => *b as i32 as f64,
            Value::Int(i) => *i as f64,
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Namespace(ns) => string_to_number(&ns.uri),
            Value::Object(_) => return None,
        })
    }

    /// ToString for primitives; `None` for objects
    pub fn primitive_to_string(&self) -> Option<Rc<str>> {
        Some(match self {
            Value::Undefined => Rc::from("undefined"),
            Value::Null => Rc::from("null"),
            Value::Bool(b) => Rc::from(if *b { "true" } else { "false" }),
            Value::Int(i) => Rc::from(i.to_string()),
            Value::Number(n) => Rc::from(number_to_string(*n)),
            Value::String(s) => s.clone(),
            Value::Namespace(ns) => ns.uri.clone(),
            Value::Object(_) => return None,
        })
    }

    /// `typeof` result for primitives
    pub fn primitive_type_name(&self) -> Option<&'static str> {
        Some(match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Namespace(_) => "object",
            Value::Object(_) => return None,
        })
    }

    /// Strict equality (`===`)
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a.uri == b.uri,
            (Value::Object(a), Value::Object(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::from_f64(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.primitive_to_string() {
            Some(s) => f.write_str(&s),
            None => write!(f, "[object #{}]", self.as_object().map_or(0, |id| id.0)),
        }
    }
}

/// ECMAScript ToInt32
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(4294967296.0);
    m as u32 as i32
}

/// ECMAScript ToUint32
pub fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

/// String to number conversion (whitespace-trimmed, hex, Infinity)
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts spellings like "inf" and "nan" that guests must not.
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// Number to string conversion
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let s = format!("{n:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    if n.fract() == 0.0 {
        return format!("{}", n as i64);
    }
    format!("{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_numbers() {
        assert_eq!(Value::from_f64(5.0), Value::Int(5));
        assert_eq!(Value::from_f64(2.5), Value::Number(2.5));
        assert!(matches!(Value::from_f64(-0.0), Value::Number(_)));
        assert_eq!(Value::from_u32(u32::MAX), Value::Number(4294967295.0));
        assert_eq!(Value::from_f64(3e9), Value::Number(3e9));
    }

    #[test]
    fn test_to_int32() {
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(4294967295.0), -1);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(2147483648.0), i32::MIN);
        assert_eq!(to_uint32(-1.0), u32::MAX);
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert_eq!(string_to_number("1e3"), 1000.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("abc").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }

    #[test]
    fn test_strict_equals() {
        assert!(Value::Int(1).strict_equals(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::string("a").strict_equals(&Value::string("a")));
    }

    #[test]
    fn test_to_boolean() {
        assert!(!Value::string("").to_boolean());
        assert!(Value::string("0").to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(Value::Object(ObjectId(0)).to_boolean());
    }
}
